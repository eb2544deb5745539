use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CourseAssignmentError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Course assignment not found")]
    NotFound,
}

/// Aggregate status of a course assignment, derived from its members.
#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, TS)]
#[sqlx(type_name = "course_assignment_status", rename_all = "snake_case")]
#[ts(export)]
pub enum CourseAssignmentStatus {
    Assigned,
    InProgress,
    Completed,
    Overdue,
    Cancelled,
}

impl std::fmt::Display for CourseAssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CourseAssignmentStatus::Assigned => write!(f, "assigned"),
            CourseAssignmentStatus::InProgress => write!(f, "in_progress"),
            CourseAssignmentStatus::Completed => write!(f, "completed"),
            CourseAssignmentStatus::Overdue => write!(f, "overdue"),
            CourseAssignmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CourseAssignment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub course_id: Uuid,
    pub employee_id: Uuid,
    pub due_date: DateTime<Utc>,
    pub assigned_by: Option<Uuid>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CourseAssignment {
    /// Returns the live assignment for `(course, employee)`, creating it if
    /// none exists. The boolean is `true` when a row was created.
    pub async fn find_or_create(
        conn: &mut sqlx::SqliteConnection,
        tenant_id: Uuid,
        course_id: Uuid,
        employee_id: Uuid,
        due_date: DateTime<Utc>,
        assigned_by: Option<Uuid>,
    ) -> Result<(Self, bool), CourseAssignmentError> {
        let created = sqlx::query_as::<_, CourseAssignment>(
            r#"
            INSERT INTO course_assignments
                (id, tenant_id, course_id, employee_id, due_date, assigned_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(course_id)
        .bind(employee_id)
        .bind(due_date)
        .bind(assigned_by)
        .bind(Utc::now())
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(assignment) = created {
            return Ok((assignment, true));
        }

        let existing = Self::find_live(&mut *conn, course_id, employee_id)
            .await?
            .ok_or(CourseAssignmentError::NotFound)?;
        Ok((existing, false))
    }

    pub async fn find_live<'e, E>(
        executor: E,
        course_id: Uuid,
        employee_id: Uuid,
    ) -> Result<Option<Self>, CourseAssignmentError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let assignment = sqlx::query_as::<_, CourseAssignment>(
            r#"
            SELECT * FROM course_assignments
            WHERE course_id = ?1 AND employee_id = ?2 AND cancelled_at IS NULL
            "#,
        )
        .bind(course_id)
        .bind(employee_id)
        .fetch_optional(executor)
        .await?;

        Ok(assignment)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, CourseAssignmentError> {
        let assignment = sqlx::query_as::<_, CourseAssignment>(
            "SELECT * FROM course_assignments WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(assignment)
    }

    pub async fn list(
        pool: &SqlitePool,
        tenant_id: Uuid,
        course_id: Option<Uuid>,
        employee_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Self>, i64), CourseAssignmentError> {
        let assignments = sqlx::query_as::<_, CourseAssignment>(
            r#"
            SELECT * FROM course_assignments
            WHERE tenant_id = ?1
              AND (?2 IS NULL OR course_id = ?2)
              AND (?3 IS NULL OR employee_id = ?3)
            ORDER BY created_at DESC, id
            LIMIT ?4 OFFSET ?5
            "#,
        )
        .bind(tenant_id)
        .bind(course_id)
        .bind(employee_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM course_assignments
            WHERE tenant_id = ?1
              AND (?2 IS NULL OR course_id = ?2)
              AND (?3 IS NULL OR employee_id = ?3)
            "#,
        )
        .bind(tenant_id)
        .bind(course_id)
        .bind(employee_id)
        .fetch_one(pool)
        .await?;

        Ok((assignments, total))
    }

    pub async fn mark_cancelled<'e, E>(
        executor: E,
        id: Uuid,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, CourseAssignmentError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, CourseAssignment>(
            r#"
            UPDATE course_assignments
            SET cancelled_at = ?2, cancellation_reason = ?3
            WHERE id = ?1 AND cancelled_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(reason)
        .fetch_optional(executor)
        .await?
        .ok_or(CourseAssignmentError::NotFound)
    }
}
