use axum::{extract::State, response::Json as ResponseJson};
use serde::Serialize;
use utils::response::ApiResponse;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: bool,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<HealthStatus>>, ApiError> {
    let database = sqlx::query("SELECT 1")
        .execute(&state.db().pool)
        .await
        .is_ok();
    if !database {
        tracing::warn!("Health check could not reach the database");
    }
    Ok(ResponseJson(ApiResponse::success(HealthStatus {
        status: if database { "ok" } else { "degraded" },
        database,
    })))
}
