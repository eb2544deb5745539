use std::sync::Arc;

use db::{
    DBService,
    models::{
        employee::{CreateEmployee, Employee},
        toolbox_talk::{
            CreateQuestion, CreateSection, CreateToolboxTalk, QuestionType, ToolboxTalk,
            ToolboxTalkQuestion, ToolboxTalkSection,
        },
    },
};
use uuid::Uuid;

use super::{
    config::Config,
    content::{ContentStore, SqliteContentStore},
};

pub(crate) async fn setup_db() -> DBService {
    DBService::new_in_memory().await.expect("in-memory db")
}

pub(crate) fn content_store(db: &DBService) -> Arc<dyn ContentStore> {
    Arc::new(SqliteContentStore::new(db.clone()))
}

pub(crate) fn test_config() -> Config {
    Config::default()
}

pub(crate) async fn seed_employee(db: &DBService, tenant_id: Uuid, name: &str) -> Employee {
    Employee::create(
        &db.pool,
        CreateEmployee {
            tenant_id,
            full_name: name.to_string(),
            email: None,
            preferred_language: None,
        },
    )
    .await
    .expect("seed employee")
}

pub(crate) struct TalkFixture {
    pub sections: usize,
    pub questions: usize,
    pub with_video: bool,
    pub passing_score: Option<i32>,
    pub max_quiz_attempts: Option<i32>,
    pub generate_certificate: bool,
}

impl Default for TalkFixture {
    fn default() -> Self {
        Self {
            sections: 2,
            questions: 3,
            with_video: false,
            passing_score: Some(70),
            max_quiz_attempts: None,
            generate_certificate: true,
        }
    }
}

/// Questions cycle: multiple choice (index 1 of three is correct),
/// true/false ("True"), short answer ("Hard Hat").
pub(crate) async fn seed_talk(db: &DBService, tenant_id: Uuid, fixture: TalkFixture) -> ToolboxTalk {
    let talk = ToolboxTalk::create(
        &db.pool,
        CreateToolboxTalk {
            tenant_id,
            title: "Manual handling".to_string(),
            description: Some("Lifting technique and team lifts".to_string()),
            source_language: None,
            video_url: fixture
                .with_video
                .then(|| "https://videos.example.com/lifting.mp4".to_string()),
            minimum_video_watch_percent: Some(80),
            passing_score: fixture.passing_score,
            max_quiz_attempts: fixture.max_quiz_attempts,
            generate_certificate: fixture.generate_certificate,
        },
        90,
    )
    .await
    .expect("seed talk");

    for n in 0..fixture.sections {
        ToolboxTalkSection::create(
            &db.pool,
            talk.id,
            n as i32 + 1,
            CreateSection {
                title: format!("Step {}", n + 1),
                content: format!("Lifting step {}", n + 1),
                requires_acknowledgment: true,
            },
        )
        .await
        .expect("seed section");
    }

    for n in 0..fixture.questions {
        let data = match n % 3 {
            0 => CreateQuestion {
                question_text: "Where should the load be held?".to_string(),
                question_type: QuestionType::MultipleChoice,
                options: vec![
                    "At arm's length".to_string(),
                    "Close to the body".to_string(),
                    "Above the head".to_string(),
                ],
                correct_answer: None,
                correct_option_index: Some(1),
                points: 1,
            },
            1 => CreateQuestion {
                question_text: "Bend the knees, not the back.".to_string(),
                question_type: QuestionType::TrueFalse,
                options: vec![],
                correct_answer: Some("True".to_string()),
                correct_option_index: None,
                points: 1,
            },
            _ => CreateQuestion {
                question_text: "What PPE protects the head?".to_string(),
                question_type: QuestionType::ShortAnswer,
                options: vec![],
                correct_answer: Some("Hard Hat".to_string()),
                correct_option_index: None,
                points: 1,
            },
        };
        ToolboxTalkQuestion::create(&db.pool, talk.id, n as i32 + 1, data)
            .await
            .expect("seed question");
    }

    talk
}
