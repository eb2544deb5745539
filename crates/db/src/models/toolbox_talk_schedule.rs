use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Schedule not found")]
    NotFound,
    #[error("Schedule was modified concurrently")]
    Stale,
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "schedule_frequency", rename_all = "snake_case")]
#[ts(export)]
pub enum ScheduleFrequency {
    Once,
    Weekly,
    Monthly,
    Annually,
}

impl std::fmt::Display for ScheduleFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleFrequency::Once => write!(f, "once"),
            ScheduleFrequency::Weekly => write!(f, "weekly"),
            ScheduleFrequency::Monthly => write!(f, "monthly"),
            ScheduleFrequency::Annually => write!(f, "annually"),
        }
    }
}

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "schedule_status", rename_all = "snake_case")]
#[ts(export)]
pub enum ScheduleStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduleStatus::Completed | ScheduleStatus::Cancelled)
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleStatus::Draft => write!(f, "draft"),
            ScheduleStatus::Active => write!(f, "active"),
            ScheduleStatus::Completed => write!(f, "completed"),
            ScheduleStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolboxTalkSchedule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub talk_id: Uuid,
    pub frequency: ScheduleFrequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub assign_to_all: bool,
    pub status: ScheduleStatus,
    /// Next occurrence still to be expanded; `None` once exhausted or cancelled.
    pub next_run_date: Option<NaiveDate>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[ts(export)]
pub struct CreateSchedule {
    pub talk_id: Uuid,
    pub frequency: ScheduleFrequency,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub assign_to_all: bool,
    #[serde(default)]
    pub employee_ids: Vec<Uuid>,
    pub notes: Option<String>,
    /// Create directly as Active instead of Draft.
    #[serde(default)]
    pub activate: bool,
}

impl ToolboxTalkSchedule {
    pub async fn create(
        pool: &SqlitePool,
        tenant_id: Uuid,
        created_by: Option<Uuid>,
        data: &CreateSchedule,
    ) -> Result<Self, ScheduleError> {
        let (status, next_run_date) = if data.activate {
            (ScheduleStatus::Active, Some(data.start_date))
        } else {
            (ScheduleStatus::Draft, None)
        };

        let mut tx = pool.begin().await?;

        let schedule = sqlx::query_as::<_, ToolboxTalkSchedule>(
            r#"
            INSERT INTO toolbox_talk_schedules (
                id, tenant_id, talk_id, frequency, start_date, end_date,
                assign_to_all, status, next_run_date, notes, created_by
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(data.talk_id)
        .bind(data.frequency.to_string())
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(data.assign_to_all)
        .bind(status.to_string())
        .bind(next_run_date)
        .bind(&data.notes)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await?;

        if !data.assign_to_all {
            for employee_id in &data.employee_ids {
                sqlx::query(
                    r#"
                    INSERT INTO toolbox_talk_schedule_employees (schedule_id, employee_id)
                    VALUES (?1, ?2)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(schedule.id)
                .bind(employee_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(schedule)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, ScheduleError> {
        let schedule = sqlx::query_as::<_, ToolboxTalkSchedule>(
            "SELECT * FROM toolbox_talk_schedules WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(schedule)
    }

    pub async fn list(
        pool: &SqlitePool,
        tenant_id: Uuid,
        status: Option<ScheduleStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), ScheduleError> {
        let status = status.map(|s| s.to_string());

        let schedules = sqlx::query_as::<_, ToolboxTalkSchedule>(
            r#"
            SELECT * FROM toolbox_talk_schedules
            WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY created_at DESC, id
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(tenant_id)
        .bind(&status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM toolbox_talk_schedules WHERE tenant_id = ?1 AND (?2 IS NULL OR status = ?2)",
        )
        .bind(tenant_id)
        .bind(&status)
        .fetch_one(pool)
        .await?;

        Ok((schedules, total))
    }

    pub async fn employee_ids(pool: &SqlitePool, schedule_id: Uuid) -> Result<Vec<Uuid>, ScheduleError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT employee_id FROM toolbox_talk_schedule_employees WHERE schedule_id = ?1",
        )
        .bind(schedule_id)
        .fetch_all(pool)
        .await?;

        Ok(ids)
    }

    /// Active schedules of a tenant whose next occurrence is on or before `as_of`.
    pub async fn find_due(
        pool: &SqlitePool,
        tenant_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<Vec<Self>, ScheduleError> {
        let schedules = sqlx::query_as::<_, ToolboxTalkSchedule>(
            r#"
            SELECT * FROM toolbox_talk_schedules
            WHERE tenant_id = ?1
              AND status = 'active'
              AND next_run_date IS NOT NULL
              AND next_run_date <= ?2
            ORDER BY next_run_date, id
            "#,
        )
        .bind(tenant_id)
        .bind(as_of)
        .fetch_all(pool)
        .await?;

        Ok(schedules)
    }

    /// Tenants that have at least one due schedule.
    pub async fn tenants_with_due(
        pool: &SqlitePool,
        as_of: NaiveDate,
    ) -> Result<Vec<Uuid>, ScheduleError> {
        let tenants = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT DISTINCT tenant_id FROM toolbox_talk_schedules
            WHERE status = 'active' AND next_run_date IS NOT NULL AND next_run_date <= ?1
            "#,
        )
        .bind(as_of)
        .fetch_all(pool)
        .await?;

        Ok(tenants)
    }

    /// Draft → Active. Returns `None` when the schedule is not a draft.
    pub async fn activate(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, ScheduleError> {
        let schedule = sqlx::query_as::<_, ToolboxTalkSchedule>(
            r#"
            UPDATE toolbox_talk_schedules
            SET status = 'active', next_run_date = start_date, updated_at = ?3
            WHERE id = ?1 AND tenant_id = ?2 AND status = 'draft'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        Ok(schedule)
    }

    /// Returns `None` when the schedule is already terminal.
    pub async fn cancel(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, ScheduleError> {
        let schedule = sqlx::query_as::<_, ToolboxTalkSchedule>(
            r#"
            UPDATE toolbox_talk_schedules
            SET status = 'cancelled', next_run_date = NULL, updated_at = ?3
            WHERE id = ?1 AND tenant_id = ?2 AND status IN ('draft', 'active')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;

        Ok(schedule)
    }

    /// Moves `next_run_date` from `expected` to `next`, completing the
    /// schedule when `next` is `None`. Guarded on `expected` so a concurrent
    /// advance or cancellation makes this a `Stale` error.
    pub async fn advance<'e, E>(
        executor: E,
        id: Uuid,
        expected: NaiveDate,
        next: Option<NaiveDate>,
        processed_at: DateTime<Utc>,
    ) -> Result<Self, ScheduleError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let status = if next.is_some() {
            ScheduleStatus::Active
        } else {
            ScheduleStatus::Completed
        };

        sqlx::query_as::<_, ToolboxTalkSchedule>(
            r#"
            UPDATE toolbox_talk_schedules
            SET next_run_date = ?3,
                status = ?4,
                last_processed_at = ?5,
                updated_at = ?5
            WHERE id = ?1 AND status = 'active' AND next_run_date = ?2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(expected)
        .bind(next)
        .bind(status.to_string())
        .bind(processed_at)
        .fetch_optional(executor)
        .await?
        .ok_or(ScheduleError::Stale)
    }
}
