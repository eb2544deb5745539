use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LocalizationJobError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Localization job not found")]
    NotFound,
    #[error("Talk already has an active localization job")]
    ActiveJobExists,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "localization_job_status", rename_all = "snake_case")]
#[ts(export)]
pub enum LocalizationJobStatus {
    Pending,
    Transcribing,
    Translating,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl LocalizationJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LocalizationJobStatus::Completed
                | LocalizationJobStatus::Failed
                | LocalizationJobStatus::Cancelled
        )
    }

    /// Job-level status from the per-language rows.
    ///
    /// `finished` is true once the worker has exited. While running, the job
    /// reports the earliest step any language is on.
    pub fn aggregate(
        languages: &[LocalizationJobLanguage],
        cancel_requested: bool,
        finished: bool,
        current: LocalizationJobStatus,
    ) -> Self {
        let all_completed = !languages.is_empty()
            && languages
                .iter()
                .all(|l| l.status == LanguageStatus::Completed);
        if all_completed {
            return LocalizationJobStatus::Completed;
        }

        if finished {
            // Nothing is running any more, so a language that never reached
            // completed counts against the job.
            return if cancel_requested {
                LocalizationJobStatus::Cancelled
            } else {
                LocalizationJobStatus::Failed
            };
        }

        languages
            .iter()
            .filter(|l| l.status == LanguageStatus::InProgress)
            .filter_map(|l| l.current_step)
            .min()
            .map(LocalizationJobStatus::from)
            .unwrap_or(current)
    }
}

impl std::fmt::Display for LocalizationJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalizationJobStatus::Pending => write!(f, "pending"),
            LocalizationJobStatus::Transcribing => write!(f, "transcribing"),
            LocalizationJobStatus::Translating => write!(f, "translating"),
            LocalizationJobStatus::Uploading => write!(f, "uploading"),
            LocalizationJobStatus::Completed => write!(f, "completed"),
            LocalizationJobStatus::Failed => write!(f, "failed"),
            LocalizationJobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "language_status", rename_all = "snake_case")]
#[ts(export)]
pub enum LanguageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Pipeline step of one language, in execution order.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, TS)]
#[sqlx(type_name = "localization_step", rename_all = "snake_case")]
#[ts(export)]
pub enum LocalizationStep {
    Transcribing,
    Translating,
    Uploading,
}

impl From<LocalizationStep> for LocalizationJobStatus {
    fn from(step: LocalizationStep) -> Self {
        match step {
            LocalizationStep::Transcribing => LocalizationJobStatus::Transcribing,
            LocalizationStep::Translating => LocalizationJobStatus::Translating,
            LocalizationStep::Uploading => LocalizationJobStatus::Uploading,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LocalizationJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub talk_id: Uuid,
    pub status: LocalizationJobStatus,
    pub translate_content: bool,
    pub generate_subtitles: bool,
    pub source_language: String,
    pub cancel_requested: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LocalizationJobLanguage {
    pub job_id: Uuid,
    pub language_code: String,
    pub status: LanguageStatus,
    pub current_step: Option<LocalizationStep>,
    pub progress_percent: i32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateLocalizationJob {
    pub tenant_id: Uuid,
    pub talk_id: Uuid,
    pub source_language: String,
    pub languages: Vec<String>,
    pub translate_content: bool,
    pub generate_subtitles: bool,
    pub created_by: Option<Uuid>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl LocalizationJob {
    pub async fn create(
        pool: &SqlitePool,
        data: &CreateLocalizationJob,
    ) -> Result<Self, LocalizationJobError> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let job = sqlx::query_as::<_, LocalizationJob>(
            r#"
            INSERT INTO localization_jobs (
                id, tenant_id, talk_id, status, translate_content, generate_subtitles,
                source_language, created_by, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.talk_id)
        .bind(LocalizationJobStatus::Pending.to_string())
        .bind(data.translate_content)
        .bind(data.generate_subtitles)
        .bind(&data.source_language)
        .bind(data.created_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LocalizationJobError::ActiveJobExists
            } else {
                LocalizationJobError::Database(e)
            }
        })?;

        for language in &data.languages {
            sqlx::query(
                "INSERT INTO localization_job_languages (job_id, language_code) VALUES (?1, ?2)",
            )
            .bind(job.id)
            .bind(language)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, LocalizationJobError> {
        let job = sqlx::query_as::<_, LocalizationJob>(
            "SELECT * FROM localization_jobs WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Unscoped lookup for the worker, which runs outside any request.
    pub async fn find(pool: &SqlitePool, id: Uuid) -> Result<Self, LocalizationJobError> {
        sqlx::query_as::<_, LocalizationJob>("SELECT * FROM localization_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(LocalizationJobError::NotFound)
    }

    pub async fn find_by_talk(
        pool: &SqlitePool,
        tenant_id: Uuid,
        talk_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), LocalizationJobError> {
        let jobs = sqlx::query_as::<_, LocalizationJob>(
            r#"
            SELECT * FROM localization_jobs
            WHERE tenant_id = ?1 AND talk_id = ?2
            ORDER BY created_at DESC, id
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(tenant_id)
        .bind(talk_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM localization_jobs WHERE tenant_id = ?1 AND talk_id = ?2",
        )
        .bind(tenant_id)
        .bind(talk_id)
        .fetch_one(pool)
        .await?;

        Ok((jobs, total))
    }

    /// Jobs of every tenant that have not reached a terminal status.
    pub async fn find_unfinished(pool: &SqlitePool) -> Result<Vec<Self>, LocalizationJobError> {
        let jobs = sqlx::query_as::<_, LocalizationJob>(
            r#"
            SELECT * FROM localization_jobs
            WHERE status NOT IN ('completed', 'failed', 'cancelled')
            ORDER BY created_at
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(jobs)
    }

    pub async fn languages(
        pool: &SqlitePool,
        job_id: Uuid,
    ) -> Result<Vec<LocalizationJobLanguage>, LocalizationJobError> {
        let languages = sqlx::query_as::<_, LocalizationJobLanguage>(
            "SELECT * FROM localization_job_languages WHERE job_id = ?1 ORDER BY language_code",
        )
        .bind(job_id)
        .fetch_all(pool)
        .await?;

        Ok(languages)
    }

    pub async fn set_status(
        pool: &SqlitePool,
        id: Uuid,
        status: LocalizationJobStatus,
    ) -> Result<Self, LocalizationJobError> {
        let now = Utc::now();
        let completed_at = status.is_terminal().then_some(now);
        sqlx::query_as::<_, LocalizationJob>(
            r#"
            UPDATE localization_jobs
            SET status = ?2, updated_at = ?3, completed_at = ?4
            WHERE id = ?1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(now)
        .bind(completed_at)
        .fetch_optional(pool)
        .await?
        .ok_or(LocalizationJobError::NotFound)
    }

    /// Raises the cooperative cancel flag. Returns `None` when the job is
    /// already terminal.
    pub async fn request_cancel(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, LocalizationJobError> {
        let job = sqlx::query_as::<_, LocalizationJob>(
            r#"
            UPDATE localization_jobs
            SET cancel_requested = 1, updated_at = ?3
            WHERE id = ?1 AND tenant_id = ?2
              AND status NOT IN ('completed', 'failed', 'cancelled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    pub async fn is_cancel_requested(pool: &SqlitePool, id: Uuid) -> Result<bool, LocalizationJobError> {
        let requested = sqlx::query_scalar::<_, bool>(
            "SELECT cancel_requested FROM localization_jobs WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(LocalizationJobError::NotFound)?;

        Ok(requested)
    }

    /// Puts failed languages back to pending and reopens the job. Returns
    /// the reset language codes, or `None` when the job is not terminal.
    pub async fn reset_failed_for_retry(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Vec<String>>, LocalizationJobError> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let reopened = sqlx::query(
            r#"
            UPDATE localization_jobs
            SET status = 'pending', cancel_requested = 0, completed_at = NULL, updated_at = ?3
            WHERE id = ?1 AND tenant_id = ?2
              AND status IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LocalizationJobError::ActiveJobExists
            } else {
                LocalizationJobError::Database(e)
            }
        })?
        .rows_affected();

        if reopened == 0 {
            return Ok(None);
        }

        let languages = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE localization_job_languages
            SET status = 'pending', current_step = NULL, progress_percent = 0,
                error = NULL, started_at = NULL, completed_at = NULL
            WHERE job_id = ?1 AND status = 'failed'
            RETURNING language_code
            "#,
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(languages))
    }
}

impl LocalizationJobLanguage {
    pub async fn mark_step(
        pool: &SqlitePool,
        job_id: Uuid,
        language_code: &str,
        step: LocalizationStep,
        progress_percent: i32,
    ) -> Result<Self, LocalizationJobError> {
        sqlx::query_as::<_, LocalizationJobLanguage>(
            r#"
            UPDATE localization_job_languages
            SET status = 'in_progress', current_step = ?3, progress_percent = ?4,
                started_at = COALESCE(started_at, ?5)
            WHERE job_id = ?1 AND language_code = ?2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(language_code)
        .bind(step)
        .bind(progress_percent)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?
        .ok_or(LocalizationJobError::NotFound)
    }

    pub async fn mark_completed(
        pool: &SqlitePool,
        job_id: Uuid,
        language_code: &str,
    ) -> Result<Self, LocalizationJobError> {
        sqlx::query_as::<_, LocalizationJobLanguage>(
            r#"
            UPDATE localization_job_languages
            SET status = 'completed', current_step = NULL, progress_percent = 100,
                error = NULL, completed_at = ?3
            WHERE job_id = ?1 AND language_code = ?2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(language_code)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?
        .ok_or(LocalizationJobError::NotFound)
    }

    pub async fn mark_failed(
        pool: &SqlitePool,
        job_id: Uuid,
        language_code: &str,
        error: &str,
    ) -> Result<Self, LocalizationJobError> {
        sqlx::query_as::<_, LocalizationJobLanguage>(
            r#"
            UPDATE localization_job_languages
            SET status = 'failed', error = ?3, completed_at = ?4
            WHERE job_id = ?1 AND language_code = ?2
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(language_code)
        .bind(error)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?
        .ok_or(LocalizationJobError::NotFound)
    }

    /// Fails languages a stopped worker left behind: those in progress, and
    /// pending ones too unless `include_pending` is false. Returns the codes.
    pub async fn fail_unfinished(
        pool: &SqlitePool,
        job_id: Uuid,
        include_pending: bool,
        error: &str,
    ) -> Result<Vec<String>, LocalizationJobError> {
        let languages = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE localization_job_languages
            SET status = 'failed', error = ?2, completed_at = ?3
            WHERE job_id = ?1
              AND (status = 'in_progress' OR (?4 AND status = 'pending'))
            RETURNING language_code
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(Utc::now())
        .bind(include_pending)
        .fetch_all(pool)
        .await?;

        Ok(languages)
    }
}
