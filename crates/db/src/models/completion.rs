use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Signed completion of a scheduled talk. One per talk.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CompletionRecord {
    pub scheduled_talk_id: Uuid,
    pub signed_by_name: String,
    #[serde(skip_serializing, default)]
    #[ts(skip)]
    pub signature_data: String,
    pub completed_at: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub certificate_reference: Option<String>,
    pub quiz_score: Option<i32>,
}

impl CompletionRecord {
    pub async fn insert<'e, E>(executor: E, record: &CompletionRecord) -> Result<Self, CompletionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let stored = sqlx::query_as::<_, CompletionRecord>(
            r#"
            INSERT INTO scheduled_talk_completions (
                scheduled_talk_id, signed_by_name, signature_data, completed_at,
                latitude, longitude, certificate_reference, quiz_score
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            RETURNING *
            "#,
        )
        .bind(record.scheduled_talk_id)
        .bind(&record.signed_by_name)
        .bind(&record.signature_data)
        .bind(record.completed_at)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.certificate_reference)
        .bind(record.quiz_score)
        .fetch_one(executor)
        .await?;

        Ok(stored)
    }

    pub async fn find(
        pool: &SqlitePool,
        scheduled_talk_id: Uuid,
    ) -> Result<Option<Self>, CompletionError> {
        let record = sqlx::query_as::<_, CompletionRecord>(
            "SELECT * FROM scheduled_talk_completions WHERE scheduled_talk_id = ?1",
        )
        .bind(scheduled_talk_id)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }
}
