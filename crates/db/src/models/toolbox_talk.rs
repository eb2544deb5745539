use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type, types::Json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ToolboxTalkError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Toolbox talk not found")]
    NotFound,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "question_type", rename_all = "snake_case")]
#[ts(export)]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuestionType::MultipleChoice => write!(f, "multiple_choice"),
            QuestionType::TrueFalse => write!(f, "true_false"),
            QuestionType::ShortAnswer => write!(f, "short_answer"),
        }
    }
}

/// Training content as held by the content store.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolboxTalk {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub source_language: String,
    pub video_url: Option<String>,
    pub minimum_video_watch_percent: i32,
    pub passing_score: Option<i32>,
    pub max_quiz_attempts: Option<i32>,
    pub generate_certificate: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolboxTalk {
    pub fn has_video(&self) -> bool {
        self.video_url
            .as_deref()
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolboxTalkSection {
    pub id: Uuid,
    pub talk_id: Uuid,
    pub section_number: i32,
    pub title: String,
    pub content: String,
    pub requires_acknowledgment: bool,
}

/// Stored quiz question including its answer key. Never serialized to
/// employees directly; see the employee-facing question view instead.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolboxTalkQuestion {
    pub id: Uuid,
    pub talk_id: Uuid,
    pub question_number: i32,
    pub question_text: String,
    pub question_type: QuestionType,
    #[ts(type = "Array<string>")]
    pub options: Json<Vec<String>>,
    pub correct_answer: Option<String>,
    pub correct_option_index: Option<i32>,
    pub points: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateToolboxTalk {
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub source_language: Option<String>,
    pub video_url: Option<String>,
    pub minimum_video_watch_percent: Option<i32>,
    pub passing_score: Option<i32>,
    pub max_quiz_attempts: Option<i32>,
    pub generate_certificate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSection {
    pub title: String,
    pub content: String,
    pub requires_acknowledgment: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQuestion {
    pub question_text: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub correct_answer: Option<String>,
    pub correct_option_index: Option<i32>,
    pub points: i32,
}

impl ToolboxTalk {
    pub async fn create(
        pool: &SqlitePool,
        data: CreateToolboxTalk,
        default_min_watch_percent: i32,
    ) -> Result<Self, ToolboxTalkError> {
        let talk = sqlx::query_as::<_, ToolboxTalk>(
            r#"
            INSERT INTO toolbox_talks (
                id, tenant_id, title, description, source_language, video_url,
                minimum_video_watch_percent, passing_score, max_quiz_attempts,
                generate_certificate
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.source_language.unwrap_or_else(|| "en".to_string()))
        .bind(&data.video_url)
        .bind(
            data.minimum_video_watch_percent
                .unwrap_or(default_min_watch_percent)
                .clamp(0, 100),
        )
        .bind(data.passing_score)
        .bind(data.max_quiz_attempts)
        .bind(data.generate_certificate)
        .fetch_one(pool)
        .await?;

        Ok(talk)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, ToolboxTalkError> {
        let talk = sqlx::query_as::<_, ToolboxTalk>(
            "SELECT * FROM toolbox_talks WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(talk)
    }
}

impl ToolboxTalkSection {
    pub async fn create(
        pool: &SqlitePool,
        talk_id: Uuid,
        section_number: i32,
        data: CreateSection,
    ) -> Result<Self, ToolboxTalkError> {
        let section = sqlx::query_as::<_, ToolboxTalkSection>(
            r#"
            INSERT INTO toolbox_talk_sections (
                id, talk_id, section_number, title, content, requires_acknowledgment
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(talk_id)
        .bind(section_number)
        .bind(&data.title)
        .bind(&data.content)
        .bind(data.requires_acknowledgment)
        .fetch_one(pool)
        .await?;

        Ok(section)
    }

    pub async fn find_by_talk(
        pool: &SqlitePool,
        talk_id: Uuid,
    ) -> Result<Vec<Self>, ToolboxTalkError> {
        let sections = sqlx::query_as::<_, ToolboxTalkSection>(
            "SELECT * FROM toolbox_talk_sections WHERE talk_id = ?1 ORDER BY section_number",
        )
        .bind(talk_id)
        .fetch_all(pool)
        .await?;

        Ok(sections)
    }

    pub async fn count_by_talk(pool: &SqlitePool, talk_id: Uuid) -> Result<i64, ToolboxTalkError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM toolbox_talk_sections WHERE talk_id = ?1",
        )
        .bind(talk_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}

impl ToolboxTalkQuestion {
    pub async fn create(
        pool: &SqlitePool,
        talk_id: Uuid,
        question_number: i32,
        data: CreateQuestion,
    ) -> Result<Self, ToolboxTalkError> {
        let question = sqlx::query_as::<_, ToolboxTalkQuestion>(
            r#"
            INSERT INTO toolbox_talk_questions (
                id, talk_id, question_number, question_text, question_type,
                options, correct_answer, correct_option_index, points
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(talk_id)
        .bind(question_number)
        .bind(&data.question_text)
        .bind(data.question_type.to_string())
        .bind(Json(&data.options))
        .bind(&data.correct_answer)
        .bind(data.correct_option_index)
        .bind(data.points)
        .fetch_one(pool)
        .await?;

        Ok(question)
    }

    pub async fn find_by_talk(
        pool: &SqlitePool,
        talk_id: Uuid,
    ) -> Result<Vec<Self>, ToolboxTalkError> {
        let questions = sqlx::query_as::<_, ToolboxTalkQuestion>(
            "SELECT * FROM toolbox_talk_questions WHERE talk_id = ?1 ORDER BY question_number",
        )
        .bind(talk_id)
        .fetch_all(pool)
        .await?;

        Ok(questions)
    }
}
