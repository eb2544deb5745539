use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::NaiveDate;
use db::models::toolbox_talk_schedule::{CreateSchedule, ScheduleStatus, ToolboxTalkSchedule};
use serde::Deserialize;
use services::services::{context::RequestContext, schedule_engine::ProcessSummary};
use utils::{
    pagination::{Page, PageParams},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleListQuery {
    pub status: Option<ScheduleStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessQuery {
    /// Catch up every occurrence through this date instead of expanding
    /// just the pending one.
    pub as_of: Option<NaiveDate>,
}

pub async fn create_schedule(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<CreateSchedule>,
) -> Result<ResponseJson<ApiResponse<ToolboxTalkSchedule>>, ApiError> {
    let schedule = state.schedules().create_schedule(&ctx, payload).await?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

pub async fn list_schedules(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ScheduleListQuery>,
    Query(page): Query<PageParams>,
) -> Result<ResponseJson<ApiResponse<Page<ToolboxTalkSchedule>>>, ApiError> {
    let schedules = state.schedules().list(&ctx, query.status, page).await?;
    Ok(ResponseJson(ApiResponse::success(schedules)))
}

pub async fn get_schedule(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ToolboxTalkSchedule>>, ApiError> {
    let schedule = state.schedules().get(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

pub async fn activate_schedule(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ToolboxTalkSchedule>>, ApiError> {
    let schedule = state.schedules().activate(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

pub async fn process_schedule(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProcessQuery>,
) -> Result<ResponseJson<ApiResponse<ProcessSummary>>, ApiError> {
    let summary = match query.as_of {
        Some(as_of) => state.schedules().process_schedule(&ctx, id, as_of).await?,
        None => state.schedules().process_now(&ctx, id).await?,
    };
    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub async fn cancel_schedule(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ToolboxTalkSchedule>>, ApiError> {
    let schedule = state.schedules().cancel(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(schedule)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route("/schedules/{id}", get(get_schedule))
        .route("/schedules/{id}/activate", post(activate_schedule))
        .route("/schedules/{id}/process", post(process_schedule))
        .route("/schedules/{id}/cancel", post(cancel_schedule))
}
