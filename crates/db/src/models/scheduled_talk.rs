use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScheduledTalkError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Scheduled talk not found")]
    NotFound,
    #[error("Scheduled talk was modified concurrently (expected version {expected})")]
    VersionConflict { expected: i64 },
    #[error("Scheduled talk is already {0}")]
    AlreadyTerminal(ScheduledTalkStatus),
}

/// Lifecycle status of one employee's assignment. Never stored: it is
/// derived from the progress facts, the due date and the clock.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[sqlx(type_name = "scheduled_talk_status", rename_all = "snake_case")]
#[ts(export)]
pub enum ScheduledTalkStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
    Cancelled,
}

impl ScheduledTalkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScheduledTalkStatus::Completed | ScheduledTalkStatus::Cancelled)
    }

    /// Keep in sync with [`DERIVED_STATUS_SQL`].
    pub fn derive(
        started: bool,
        completed: bool,
        cancelled: bool,
        due_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        if cancelled {
            ScheduledTalkStatus::Cancelled
        } else if completed {
            ScheduledTalkStatus::Completed
        } else if now > due_date {
            ScheduledTalkStatus::Overdue
        } else if started {
            ScheduledTalkStatus::InProgress
        } else {
            ScheduledTalkStatus::Pending
        }
    }
}

impl std::fmt::Display for ScheduledTalkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduledTalkStatus::Pending => write!(f, "pending"),
            ScheduledTalkStatus::InProgress => write!(f, "in_progress"),
            ScheduledTalkStatus::Completed => write!(f, "completed"),
            ScheduledTalkStatus::Overdue => write!(f, "overdue"),
            ScheduledTalkStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// SQL rendition of [`ScheduledTalkStatus::derive`]. Expects the current
/// time bound as `:now` via the query's own placeholder substitution.
pub const DERIVED_STATUS_SQL: &str = r#"
    CASE
        WHEN cancelled_at IS NOT NULL THEN 'cancelled'
        WHEN completed_at IS NOT NULL THEN 'completed'
        WHEN due_date < :now THEN 'overdue'
        WHEN started_at IS NOT NULL
          OR completed_sections > 0
          OR video_watch_percent > 0
          OR quiz_attempt_count > 0 THEN 'in_progress'
        ELSE 'pending'
    END
"#;

fn derived_status_sql(now_placeholder: &str) -> String {
    DERIVED_STATUS_SQL.replace(":now", now_placeholder)
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScheduledTalk {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub talk_id: Uuid,
    pub employee_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub occurrence_date: Option<NaiveDate>,
    pub course_assignment_id: Option<Uuid>,
    pub due_date: DateTime<Utc>,
    pub is_overdue: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
    pub total_sections: i32,
    pub completed_sections: i32,
    pub video_watch_percent: i32,
    pub quiz_attempt_count: i32,
    pub last_quiz_score: Option<i32>,
    pub last_quiz_passed: Option<bool>,
    pub reminder_count: i32,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTalk {
    pub fn has_progress(&self) -> bool {
        self.started_at.is_some()
            || self.completed_sections > 0
            || self.video_watch_percent > 0
            || self.quiz_attempt_count > 0
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ScheduledTalkStatus {
        ScheduledTalkStatus::derive(
            self.has_progress(),
            self.completed_at.is_some(),
            self.cancelled_at.is_some(),
            self.due_date,
            now,
        )
    }

    /// Stored terminal state, independent of the clock.
    pub fn terminal_status(&self) -> Option<ScheduledTalkStatus> {
        if self.cancelled_at.is_some() {
            Some(ScheduledTalkStatus::Cancelled)
        } else if self.completed_at.is_some() {
            Some(ScheduledTalkStatus::Completed)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewScheduledTalk {
    pub tenant_id: Uuid,
    pub talk_id: Uuid,
    pub employee_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub occurrence_date: Option<NaiveDate>,
    pub course_assignment_id: Option<Uuid>,
    pub due_date: DateTime<Utc>,
    pub total_sections: i32,
}

#[derive(Debug, Clone, Default, Deserialize, TS)]
#[ts(export)]
pub struct ScheduledTalkFilter {
    pub status: Option<ScheduledTalkStatus>,
    pub talk_id: Option<Uuid>,
    pub employee_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub course_assignment_id: Option<Uuid>,
}

const LIVE_GUARD: &str = "completed_at IS NULL AND cancelled_at IS NULL";

impl ScheduledTalk {
    /// Inserts unless a live row with the same idempotency key exists
    /// (schedule + employee + occurrence, or course assignment + talk).
    /// Returns `None` when the row already existed.
    pub async fn insert_if_absent<'e, E>(
        executor: E,
        data: &NewScheduledTalk,
    ) -> Result<Option<Self>, ScheduledTalkError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let created = sqlx::query_as::<_, ScheduledTalk>(
            r#"
            INSERT INTO scheduled_talks (
                id, tenant_id, talk_id, employee_id, schedule_id, occurrence_date,
                course_assignment_id, due_date, total_sections, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.tenant_id)
        .bind(data.talk_id)
        .bind(data.employee_id)
        .bind(data.schedule_id)
        .bind(data.occurrence_date)
        .bind(data.course_assignment_id)
        .bind(data.due_date)
        .bind(data.total_sections)
        .bind(now)
        .fetch_optional(executor)
        .await?;

        Ok(created)
    }

    pub async fn exists_for_occurrence<'e, E>(
        executor: E,
        schedule_id: Uuid,
        employee_id: Uuid,
        occurrence_date: NaiveDate,
    ) -> Result<bool, ScheduledTalkError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scheduled_talks
                WHERE schedule_id = ?1 AND employee_id = ?2 AND occurrence_date = ?3
                  AND cancelled_at IS NULL
            )
            "#,
        )
        .bind(schedule_id)
        .bind(employee_id)
        .bind(occurrence_date)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, ScheduledTalkError> {
        let talk = sqlx::query_as::<_, ScheduledTalk>(
            "SELECT * FROM scheduled_talks WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(talk)
    }

    async fn find_by_id_conn(
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<Option<Self>, ScheduledTalkError> {
        let talk = sqlx::query_as::<_, ScheduledTalk>("SELECT * FROM scheduled_talks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(talk)
    }

    pub async fn find_by_schedule(
        pool: &SqlitePool,
        schedule_id: Uuid,
    ) -> Result<Vec<Self>, ScheduledTalkError> {
        let talks = sqlx::query_as::<_, ScheduledTalk>(
            "SELECT * FROM scheduled_talks WHERE schedule_id = ?1 ORDER BY occurrence_date, employee_id",
        )
        .bind(schedule_id)
        .fetch_all(pool)
        .await?;

        Ok(talks)
    }

    pub async fn find_by_course_assignment(
        pool: &SqlitePool,
        course_assignment_id: Uuid,
    ) -> Result<Vec<Self>, ScheduledTalkError> {
        let talks = sqlx::query_as::<_, ScheduledTalk>(
            r#"
            SELECT st.* FROM scheduled_talks st
            JOIN course_assignments ca ON ca.id = st.course_assignment_id
            LEFT JOIN toolbox_talk_course_items ci
                   ON ci.course_id = ca.course_id AND ci.talk_id = st.talk_id
            WHERE st.course_assignment_id = ?1
            ORDER BY ci.order_index, st.created_at
            "#,
        )
        .bind(course_assignment_id)
        .fetch_all(pool)
        .await?;

        Ok(talks)
    }

    /// True when the employee has completed the talk through any assignment.
    pub async fn has_completed(
        pool: &SqlitePool,
        tenant_id: Uuid,
        employee_id: Uuid,
        talk_id: Uuid,
    ) -> Result<bool, ScheduledTalkError> {
        let completed = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scheduled_talks
                WHERE tenant_id = ?1 AND employee_id = ?2 AND talk_id = ?3
                  AND completed_at IS NOT NULL
            )
            "#,
        )
        .bind(tenant_id)
        .bind(employee_id)
        .bind(talk_id)
        .fetch_one(pool)
        .await?;

        Ok(completed)
    }

    /// True when the employee already holds a live, unfinished row for the talk.
    pub async fn has_open(
        pool: &SqlitePool,
        tenant_id: Uuid,
        employee_id: Uuid,
        talk_id: Uuid,
    ) -> Result<bool, ScheduledTalkError> {
        let open = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scheduled_talks
                WHERE tenant_id = ?1 AND employee_id = ?2 AND talk_id = ?3
                  AND completed_at IS NULL AND cancelled_at IS NULL
            )
            "#,
        )
        .bind(tenant_id)
        .bind(employee_id)
        .bind(talk_id)
        .fetch_one(pool)
        .await?;

        Ok(open)
    }

    pub async fn list(
        pool: &SqlitePool,
        tenant_id: Uuid,
        filter: &ScheduledTalkFilter,
        now: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), ScheduledTalkError> {
        let where_clause = format!(
            r#"
            WHERE tenant_id = ?1
              AND (?2 IS NULL OR ({status}) = ?2)
              AND (?3 IS NULL OR talk_id = ?3)
              AND (?4 IS NULL OR employee_id = ?4)
              AND (?5 IS NULL OR schedule_id = ?5)
              AND (?6 IS NULL OR course_assignment_id = ?6)
            "#,
            status = derived_status_sql("?7")
        );
        let status = filter.status.map(|s| s.to_string());

        let rows_sql = format!(
            "SELECT * FROM scheduled_talks {where_clause} ORDER BY due_date, id LIMIT ?8 OFFSET ?9"
        );
        let talks = sqlx::query_as::<_, ScheduledTalk>(&rows_sql)
            .bind(tenant_id)
            .bind(&status)
            .bind(filter.talk_id)
            .bind(filter.employee_id)
            .bind(filter.schedule_id)
            .bind(filter.course_assignment_id)
            .bind(now)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM scheduled_talks {where_clause}");
        let total = sqlx::query_scalar::<_, i64>(&count_sql)
            .bind(tenant_id)
            .bind(&status)
            .bind(filter.talk_id)
            .bind(filter.employee_id)
            .bind(filter.schedule_id)
            .bind(filter.course_assignment_id)
            .bind(now)
            .fetch_one(pool)
            .await?;

        Ok((talks, total))
    }

    /// Works out why a version-guarded update touched no row.
    async fn missed_update(
        conn: &mut SqliteConnection,
        id: Uuid,
        expected_version: i64,
    ) -> ScheduledTalkError {
        match Self::find_by_id_conn(conn, id).await {
            Ok(Some(current)) => match current.terminal_status() {
                Some(status) => ScheduledTalkError::AlreadyTerminal(status),
                None => ScheduledTalkError::VersionConflict {
                    expected: expected_version,
                },
            },
            Ok(None) => ScheduledTalkError::NotFound,
            Err(e) => e,
        }
    }

    /// Records the first progress event. Later calls keep the original
    /// start time and location.
    pub async fn mark_started(
        conn: &mut SqliteConnection,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET started_at = COALESCE(started_at, ?3),
                start_latitude = COALESCE(start_latitude, ?4),
                start_longitude = COALESCE(start_longitude, ?5),
                version = version + 1,
                updated_at = ?3
            WHERE id = ?1 AND version = ?2 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(now)
            .bind(latitude)
            .bind(longitude)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => Err(Self::missed_update(conn, id, expected_version).await),
        }
    }

    /// Section count only ever grows.
    pub async fn set_completed_sections(
        conn: &mut SqliteConnection,
        id: Uuid,
        expected_version: i64,
        completed_sections: i32,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET completed_sections = MAX(completed_sections, ?3),
                started_at = COALESCE(started_at, ?4),
                version = version + 1,
                updated_at = ?4
            WHERE id = ?1 AND version = ?2 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(completed_sections)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => Err(Self::missed_update(conn, id, expected_version).await),
        }
    }

    /// Watch percent only ever grows; lower values are absorbed.
    pub async fn raise_video_percent(
        conn: &mut SqliteConnection,
        id: Uuid,
        expected_version: i64,
        percent: i32,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET video_watch_percent = MAX(video_watch_percent, ?3),
                started_at = COALESCE(started_at, ?4),
                version = version + 1,
                updated_at = ?4
            WHERE id = ?1 AND version = ?2 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(percent.clamp(0, 100))
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => Err(Self::missed_update(conn, id, expected_version).await),
        }
    }

    /// The only path that lowers watch progress.
    pub async fn reset_video_percent(
        conn: &mut SqliteConnection,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET video_watch_percent = 0,
                started_at = COALESCE(started_at, ?3),
                version = version + 1,
                updated_at = ?3
            WHERE id = ?1 AND version = ?2 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => Err(Self::missed_update(conn, id, expected_version).await),
        }
    }

    pub async fn record_quiz_result(
        conn: &mut SqliteConnection,
        id: Uuid,
        expected_version: i64,
        percentage: i32,
        passed: bool,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET quiz_attempt_count = quiz_attempt_count + 1,
                last_quiz_score = ?3,
                last_quiz_passed = ?4,
                started_at = COALESCE(started_at, ?5),
                version = version + 1,
                updated_at = ?5
            WHERE id = ?1 AND version = ?2 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(percentage)
            .bind(passed)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => Err(Self::missed_update(conn, id, expected_version).await),
        }
    }

    pub async fn mark_completed(
        conn: &mut SqliteConnection,
        id: Uuid,
        expected_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET completed_at = ?3,
                started_at = COALESCE(started_at, ?3),
                is_overdue = 0,
                version = version + 1,
                updated_at = ?3
            WHERE id = ?1 AND version = ?2 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(expected_version)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => Err(Self::missed_update(conn, id, expected_version).await),
        }
    }

    /// Cancels a live row. Administrative, so not version-guarded.
    pub async fn cancel(
        conn: &mut SqliteConnection,
        id: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET cancelled_at = ?2,
                cancellation_reason = ?3,
                is_overdue = 0,
                version = version + 1,
                updated_at = ?2
            WHERE id = ?1 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(now)
            .bind(reason)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => match Self::find_by_id_conn(conn, id).await? {
                Some(current) => Err(ScheduledTalkError::AlreadyTerminal(
                    current
                        .terminal_status()
                        .unwrap_or(ScheduledTalkStatus::Cancelled),
                )),
                None => Err(ScheduledTalkError::NotFound),
            },
        }
    }

    pub async fn record_reminder(
        pool: &SqlitePool,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduledTalkError> {
        let sql = format!(
            r#"
            UPDATE scheduled_talks
            SET reminder_count = reminder_count + 1,
                last_reminder_at = ?2,
                updated_at = ?2
            WHERE id = ?1 AND {LIVE_GUARD}
            RETURNING *
            "#
        );
        let mut conn = pool.acquire().await?;
        let updated = sqlx::query_as::<_, ScheduledTalk>(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(talk) => Ok(talk),
            None => match Self::find_by_id_conn(&mut conn, id).await? {
                Some(current) => Err(ScheduledTalkError::AlreadyTerminal(
                    current
                        .terminal_status()
                        .unwrap_or(ScheduledTalkStatus::Cancelled),
                )),
                None => Err(ScheduledTalkError::NotFound),
            },
        }
    }

    /// Brings the reporting flag in line with the overdue predicate for every
    /// live row of a tenant. Returns `(flagged, cleared)` counts.
    pub async fn refresh_overdue_flags(
        pool: &SqlitePool,
        tenant_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(u64, u64), ScheduledTalkError> {
        let flagged = sqlx::query(&format!(
            r#"
            UPDATE scheduled_talks SET is_overdue = 1
            WHERE tenant_id = ?1 AND {LIVE_GUARD} AND due_date < ?2 AND is_overdue = 0
            "#
        ))
        .bind(tenant_id)
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

        let cleared = sqlx::query(
            r#"
            UPDATE scheduled_talks SET is_overdue = 0
            WHERE tenant_id = ?1 AND is_overdue = 1
              AND (completed_at IS NOT NULL OR cancelled_at IS NOT NULL OR due_date >= ?2)
            "#,
        )
        .bind(tenant_id)
        .bind(now)
        .execute(pool)
        .await?
        .rows_affected();

        Ok((flagged, cleared))
    }

    pub async fn tenants_with_live_rows(pool: &SqlitePool) -> Result<Vec<Uuid>, ScheduledTalkError> {
        let tenants = sqlx::query_scalar::<_, Uuid>(&format!(
            "SELECT DISTINCT tenant_id FROM scheduled_talks WHERE {LIVE_GUARD} OR is_overdue = 1"
        ))
        .fetch_all(pool)
        .await?;

        Ok(tenants)
    }
}
