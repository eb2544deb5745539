use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::scheduled_talk::ScheduledTalkFilter;
use serde::Deserialize;
use services::services::{assignment_status::ScheduledTalkView, context::RequestContext};
use utils::{
    pagination::{Page, PageParams},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn list_scheduled_talks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<ScheduledTalkFilter>,
    Query(page): Query<PageParams>,
) -> Result<ResponseJson<ApiResponse<Page<ScheduledTalkView>>>, ApiError> {
    let talks = state.assignments().list(&ctx, &filter, page).await?;
    Ok(ResponseJson(ApiResponse::success(talks)))
}

pub async fn get_scheduled_talk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ScheduledTalkView>>, ApiError> {
    let talk = state.assignments().get(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(talk)))
}

pub async fn send_reminder(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<ScheduledTalkView>>, ApiError> {
    let talk = state.assignments().send_reminder(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(talk)))
}

pub async fn cancel_scheduled_talk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<ResponseJson<ApiResponse<ScheduledTalkView>>, ApiError> {
    let talk = state
        .assignments()
        .cancel(&ctx, id, payload.reason.as_deref())
        .await?;
    Ok(ResponseJson(ApiResponse::success(talk)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scheduled-talks", get(list_scheduled_talks))
        .route("/scheduled-talks/{id}", get(get_scheduled_talk))
        .route("/scheduled-talks/{id}/remind", post(send_reminder))
        .route("/scheduled-talks/{id}/cancel", post(cancel_scheduled_talk))
}
