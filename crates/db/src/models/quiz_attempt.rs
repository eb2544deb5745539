use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, types::Json};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QuizAttemptError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// One submitted answer. Multiple choice answers carry the option's
/// original index; everything else is free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export)]
pub enum AnswerValue {
    OptionIndex(i32),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuestionResult {
    pub question_id: Uuid,
    pub correct: bool,
    pub points_awarded: i32,
    pub points_possible: i32,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuizAttempt {
    pub id: Uuid,
    pub scheduled_talk_id: Uuid,
    pub attempt_number: i32,
    #[ts(type = "Record<string, AnswerValue>")]
    pub answers: Json<BTreeMap<Uuid, AnswerValue>>,
    #[ts(type = "Array<QuestionResult>")]
    pub results: Json<Vec<QuestionResult>>,
    pub score: i32,
    pub max_score: i32,
    pub percentage: i32,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewQuizAttempt {
    pub scheduled_talk_id: Uuid,
    pub attempt_number: i32,
    pub answers: BTreeMap<Uuid, AnswerValue>,
    pub results: Vec<QuestionResult>,
    pub score: i32,
    pub max_score: i32,
    pub percentage: i32,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

impl QuizAttempt {
    /// Attempts are append-only; `attempt_number` is unique per talk.
    pub async fn append<'e, E>(executor: E, data: NewQuizAttempt) -> Result<Self, QuizAttemptError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let attempt = sqlx::query_as::<_, QuizAttempt>(
            r#"
            INSERT INTO scheduled_talk_quiz_attempts (
                id, scheduled_talk_id, attempt_number, answers, results,
                score, max_score, percentage, passed, submitted_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(data.scheduled_talk_id)
        .bind(data.attempt_number)
        .bind(Json(data.answers))
        .bind(Json(data.results))
        .bind(data.score)
        .bind(data.max_score)
        .bind(data.percentage)
        .bind(data.passed)
        .bind(data.submitted_at)
        .fetch_one(executor)
        .await?;

        Ok(attempt)
    }

    pub async fn find_by_scheduled_talk(
        pool: &SqlitePool,
        scheduled_talk_id: Uuid,
    ) -> Result<Vec<Self>, QuizAttemptError> {
        let attempts = sqlx::query_as::<_, QuizAttempt>(
            r#"
            SELECT * FROM scheduled_talk_quiz_attempts
            WHERE scheduled_talk_id = ?1
            ORDER BY attempt_number
            "#,
        )
        .bind(scheduled_talk_id)
        .fetch_all(pool)
        .await?;

        Ok(attempts)
    }

    pub async fn best_passing_score(
        pool: &SqlitePool,
        scheduled_talk_id: Uuid,
    ) -> Result<Option<i32>, QuizAttemptError> {
        let best = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT MAX(percentage) FROM scheduled_talk_quiz_attempts
            WHERE scheduled_talk_id = ?1 AND passed = 1
            "#,
        )
        .bind(scheduled_talk_id)
        .fetch_one(pool)
        .await?;

        Ok(best)
    }
}
