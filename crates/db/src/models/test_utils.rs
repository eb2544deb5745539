use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::employee::{CreateEmployee, Employee};
use super::scheduled_talk::{NewScheduledTalk, ScheduledTalk};
use super::toolbox_talk::{
    CreateQuestion, CreateSection, CreateToolboxTalk, QuestionType, ToolboxTalk,
    ToolboxTalkQuestion, ToolboxTalkSection,
};
use crate::DBService;

pub(crate) async fn setup_test_pool() -> SqlitePool {
    DBService::new_in_memory()
        .await
        .expect("failed to open sqlite memory db")
        .pool
}

pub(crate) async fn create_test_employee(pool: &SqlitePool, tenant_id: Uuid, name: &str) -> Employee {
    Employee::create(
        pool,
        CreateEmployee {
            tenant_id,
            full_name: name.to_string(),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            preferred_language: None,
        },
    )
    .await
    .expect("create employee")
}

/// Builds a talk with `sections` sections and `questions` questions. The
/// questions cycle through multiple choice (three options, index 1
/// correct), true/false ("True") and short answer ("hard hat").
pub(crate) async fn create_test_talk(
    pool: &SqlitePool,
    tenant_id: Uuid,
    sections: usize,
    questions: usize,
    with_video: bool,
) -> ToolboxTalk {
    let talk = ToolboxTalk::create(
        pool,
        CreateToolboxTalk {
            tenant_id,
            title: "Working at height".to_string(),
            description: Some("Ladders, harnesses and edge protection".to_string()),
            source_language: None,
            video_url: with_video.then(|| "https://videos.example.com/height.mp4".to_string()),
            minimum_video_watch_percent: None,
            passing_score: Some(70),
            max_quiz_attempts: None,
            generate_certificate: true,
        },
        90,
    )
    .await
    .expect("create talk");

    for n in 0..sections {
        ToolboxTalkSection::create(
            pool,
            talk.id,
            n as i32 + 1,
            CreateSection {
                title: format!("Section {}", n + 1),
                content: format!("Content of section {}", n + 1),
                requires_acknowledgment: true,
            },
        )
        .await
        .expect("create section");
    }

    for n in 0..questions {
        let data = match n % 3 {
            0 => CreateQuestion {
                question_text: "Which anchor point is rated for fall arrest?".to_string(),
                question_type: QuestionType::MultipleChoice,
                options: vec![
                    "Handrail".to_string(),
                    "Certified anchor".to_string(),
                    "Scaffold tube".to_string(),
                ],
                correct_answer: None,
                correct_option_index: Some(1),
                points: 1,
            },
            1 => CreateQuestion {
                question_text: "Harnesses must be inspected before each use.".to_string(),
                question_type: QuestionType::TrueFalse,
                options: vec![],
                correct_answer: Some("True".to_string()),
                correct_option_index: None,
                points: 1,
            },
            _ => CreateQuestion {
                question_text: "Name the head protection required on site.".to_string(),
                question_type: QuestionType::ShortAnswer,
                options: vec![],
                correct_answer: Some("Hard Hat".to_string()),
                correct_option_index: None,
                points: 1,
            },
        };
        ToolboxTalkQuestion::create(pool, talk.id, n as i32 + 1, data)
            .await
            .expect("create question");
    }

    talk
}

pub(crate) async fn create_test_scheduled_talk(
    pool: &SqlitePool,
    tenant_id: Uuid,
    talk_id: Uuid,
    employee_id: Uuid,
    due_date: DateTime<Utc>,
) -> ScheduledTalk {
    let total_sections = ToolboxTalkSection::count_by_talk(pool, talk_id)
        .await
        .expect("count sections") as i32;
    ScheduledTalk::insert_if_absent(
        pool,
        &NewScheduledTalk {
            tenant_id,
            talk_id,
            employee_id,
            schedule_id: None,
            occurrence_date: None,
            course_assignment_id: None,
            due_date,
            total_sections,
        },
    )
    .await
    .expect("insert scheduled talk")
    .expect("no idempotency conflict for ad-hoc rows")
}
