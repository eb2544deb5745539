use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SectionProgressError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Read/acknowledge record for one section of one scheduled talk.
/// Write-once: the first record for a section is final.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SectionProgress {
    pub scheduled_talk_id: Uuid,
    pub section_id: Uuid,
    pub acknowledged: bool,
    pub time_spent_seconds: i32,
    pub read_at: DateTime<Utc>,
}

impl SectionProgress {
    /// Returns `true` when a new record was written, `false` when the
    /// section had already been read.
    pub async fn record_once<'e, E>(
        executor: E,
        scheduled_talk_id: Uuid,
        section_id: Uuid,
        acknowledged: bool,
        time_spent_seconds: i32,
        read_at: DateTime<Utc>,
    ) -> Result<bool, SectionProgressError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO scheduled_talk_section_progress
                (scheduled_talk_id, section_id, acknowledged, time_spent_seconds, read_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (scheduled_talk_id, section_id) DO NOTHING
            "#,
        )
        .bind(scheduled_talk_id)
        .bind(section_id)
        .bind(acknowledged)
        .bind(time_spent_seconds.max(0))
        .bind(read_at)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_by_scheduled_talk<'e, E>(
        executor: E,
        scheduled_talk_id: Uuid,
    ) -> Result<Vec<Self>, SectionProgressError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let rows = sqlx::query_as::<_, SectionProgress>(
            "SELECT * FROM scheduled_talk_section_progress WHERE scheduled_talk_id = ?1 ORDER BY read_at",
        )
        .bind(scheduled_talk_id)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }

    pub async fn count_for(
        pool: &SqlitePool,
        scheduled_talk_id: Uuid,
    ) -> Result<i64, SectionProgressError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM scheduled_talk_section_progress WHERE scheduled_talk_id = ?1",
        )
        .bind(scheduled_talk_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
