use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, types::Json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Translation not found")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TranslatedSection {
    pub section_id: Uuid,
    pub title: String,
    pub content: String,
}

/// Options keep the canonical order of the source question, so position `i`
/// here is original index `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TranslatedQuestion {
    pub question_id: Uuid,
    pub question_text: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolboxTalkTranslation {
    pub talk_id: Uuid,
    pub language_code: String,
    pub title: String,
    pub description: Option<String>,
    #[ts(type = "Array<TranslatedSection>")]
    pub sections: Json<Vec<TranslatedSection>>,
    #[ts(type = "Array<TranslatedQuestion>")]
    pub questions: Json<Vec<TranslatedQuestion>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertTranslation {
    pub talk_id: Uuid,
    pub language_code: String,
    pub title: String,
    pub description: Option<String>,
    pub sections: Vec<TranslatedSection>,
    pub questions: Vec<TranslatedQuestion>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolboxTalkSubtitle {
    pub talk_id: Uuid,
    pub language_code: String,
    pub format: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolboxTalkTranslation {
    pub async fn find(
        pool: &SqlitePool,
        talk_id: Uuid,
        language_code: &str,
    ) -> Result<Option<Self>, TranslationError> {
        let translation = sqlx::query_as::<_, ToolboxTalkTranslation>(
            "SELECT * FROM toolbox_talk_translations WHERE talk_id = ?1 AND language_code = ?2",
        )
        .bind(talk_id)
        .bind(language_code)
        .fetch_optional(pool)
        .await?;

        Ok(translation)
    }

    pub async fn languages_for_talk(
        pool: &SqlitePool,
        talk_id: Uuid,
    ) -> Result<Vec<String>, TranslationError> {
        let languages = sqlx::query_scalar::<_, String>(
            "SELECT language_code FROM toolbox_talk_translations WHERE talk_id = ?1 ORDER BY language_code",
        )
        .bind(talk_id)
        .fetch_all(pool)
        .await?;

        Ok(languages)
    }

    /// Replaces any previous translation for the same language.
    pub async fn upsert(
        pool: &SqlitePool,
        data: UpsertTranslation,
    ) -> Result<Self, TranslationError> {
        let now = Utc::now();
        let translation = sqlx::query_as::<_, ToolboxTalkTranslation>(
            r#"
            INSERT INTO toolbox_talk_translations (
                talk_id, language_code, title, description, sections, questions,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT (talk_id, language_code) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                sections = excluded.sections,
                questions = excluded.questions,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(data.talk_id)
        .bind(&data.language_code)
        .bind(&data.title)
        .bind(&data.description)
        .bind(Json(&data.sections))
        .bind(Json(&data.questions))
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(translation)
    }
}

impl ToolboxTalkSubtitle {
    pub async fn find(
        pool: &SqlitePool,
        talk_id: Uuid,
        language_code: &str,
    ) -> Result<Option<Self>, TranslationError> {
        let subtitle = sqlx::query_as::<_, ToolboxTalkSubtitle>(
            "SELECT * FROM toolbox_talk_subtitles WHERE talk_id = ?1 AND language_code = ?2",
        )
        .bind(talk_id)
        .bind(language_code)
        .fetch_optional(pool)
        .await?;

        Ok(subtitle)
    }

    pub async fn upsert(
        pool: &SqlitePool,
        talk_id: Uuid,
        language_code: &str,
        format: &str,
        content: &str,
    ) -> Result<Self, TranslationError> {
        let now = Utc::now();
        let subtitle = sqlx::query_as::<_, ToolboxTalkSubtitle>(
            r#"
            INSERT INTO toolbox_talk_subtitles (
                talk_id, language_code, format, content, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT (talk_id, language_code) DO UPDATE SET
                format = excluded.format,
                content = excluded.content,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(talk_id)
        .bind(language_code)
        .bind(format)
        .bind(content)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(subtitle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::{create_test_talk, setup_test_pool};

    #[tokio::test]
    async fn upsert_replaces_existing_language() {
        let pool = setup_test_pool().await;
        let talk = create_test_talk(&pool, Uuid::new_v4(), 1, 0, false).await;

        let first = UpsertTranslation {
            talk_id: talk.id,
            language_code: "es".into(),
            title: "Seguridad".into(),
            description: None,
            sections: vec![],
            questions: vec![],
        };
        ToolboxTalkTranslation::upsert(&pool, first.clone()).await.unwrap();
        ToolboxTalkTranslation::upsert(
            &pool,
            UpsertTranslation {
                title: "Seguridad en obra".into(),
                ..first
            },
        )
        .await
        .unwrap();

        let stored = ToolboxTalkTranslation::find(&pool, talk.id, "es")
            .await
            .unwrap()
            .expect("translation stored");
        assert_eq!(stored.title, "Seguridad en obra");
        assert_eq!(
            ToolboxTalkTranslation::languages_for_talk(&pool, talk.id)
                .await
                .unwrap(),
            vec!["es".to_string()]
        );
    }
}
