use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CourseError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Course not found")]
    NotFound,
}

/// An ordered bundle of toolbox talks.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ToolboxTalkCourse {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CourseTalk {
    pub talk_id: Uuid,
    pub title: String,
    pub order_index: i32,
}

impl ToolboxTalkCourse {
    pub async fn create(
        pool: &SqlitePool,
        tenant_id: Uuid,
        title: &str,
        description: Option<&str>,
        talk_ids: &[Uuid],
    ) -> Result<Self, CourseError> {
        let mut tx = pool.begin().await?;

        let course = sqlx::query_as::<_, ToolboxTalkCourse>(
            r#"
            INSERT INTO toolbox_talk_courses (id, tenant_id, title, description)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(title)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;

        for (index, talk_id) in talk_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO toolbox_talk_course_items (course_id, talk_id, order_index) VALUES (?1, ?2, ?3)",
            )
            .bind(course.id)
            .bind(talk_id)
            .bind(index as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(course)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, CourseError> {
        let course = sqlx::query_as::<_, ToolboxTalkCourse>(
            "SELECT * FROM toolbox_talk_courses WHERE id = ?1 AND tenant_id = ?2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        Ok(course)
    }

    pub async fn talks(pool: &SqlitePool, course_id: Uuid) -> Result<Vec<CourseTalk>, CourseError> {
        let talks = sqlx::query_as::<_, CourseTalk>(
            r#"
            SELECT ci.talk_id, t.title, ci.order_index
            FROM toolbox_talk_course_items ci
            JOIN toolbox_talks t ON t.id = ci.talk_id
            WHERE ci.course_id = ?1
            ORDER BY ci.order_index
            "#,
        )
        .bind(course_id)
        .fetch_all(pool)
        .await?;

        Ok(talks)
    }
}
