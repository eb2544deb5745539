use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::completion::CompletionRecord;
use serde::Deserialize;
use services::services::{
    assignment_status::{AssignmentBucket, ScheduledTalkView},
    completion_workflow::{
        AssignmentDetail, CompletionRequest, QuizSubmission, QuizSubmissionResult,
        SectionAckRequest, StartRequest, VersionedRequest, VideoProgressRequest,
    },
    context::RequestContext,
};
use utils::{
    pagination::{Page, PageParams},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct BucketQuery {
    #[serde(default)]
    pub bucket: AssignmentBucket,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailQuery {
    pub lang: Option<String>,
}

pub async fn my_talks(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<BucketQuery>,
    Query(page): Query<PageParams>,
) -> Result<ResponseJson<ApiResponse<Page<ScheduledTalkView>>>, ApiError> {
    let talks = state
        .assignments()
        .my_assignments(&ctx, query.bucket, page)
        .await?;
    Ok(ResponseJson(ApiResponse::success(talks)))
}

pub async fn talk_detail(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<DetailQuery>,
) -> Result<ResponseJson<ApiResponse<AssignmentDetail>>, ApiError> {
    let detail = state
        .workflow()
        .detail(&ctx, id, query.lang.as_deref())
        .await?;
    Ok(ResponseJson(ApiResponse::success(detail)))
}

pub async fn start_talk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StartRequest>,
) -> Result<ResponseJson<ApiResponse<ScheduledTalkView>>, ApiError> {
    let talk = state.workflow().start(&ctx, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(talk)))
}

pub async fn acknowledge_section(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, section_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<SectionAckRequest>,
) -> Result<ResponseJson<ApiResponse<ScheduledTalkView>>, ApiError> {
    let talk = state
        .workflow()
        .acknowledge_section(&ctx, id, section_id, payload)
        .await?;
    Ok(ResponseJson(ApiResponse::success(talk)))
}

pub async fn update_video(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VideoProgressRequest>,
) -> Result<ResponseJson<ApiResponse<ScheduledTalkView>>, ApiError> {
    let talk = state.workflow().update_video_progress(&ctx, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(talk)))
}

pub async fn reset_video(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VersionedRequest>,
) -> Result<ResponseJson<ApiResponse<ScheduledTalkView>>, ApiError> {
    let talk = state.workflow().reset_video(&ctx, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(talk)))
}

pub async fn submit_quiz(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<QuizSubmission>,
) -> Result<ResponseJson<ApiResponse<QuizSubmissionResult>>, ApiError> {
    let result = state.workflow().submit_quiz(&ctx, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(result)))
}

pub async fn complete_talk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompletionRequest>,
) -> Result<ResponseJson<ApiResponse<CompletionRecord>>, ApiError> {
    let record = state.workflow().complete(&ctx, id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(record)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/my/talks", get(my_talks))
        .route("/my/talks/{id}", get(talk_detail))
        .route("/my/talks/{id}/start", post(start_talk))
        .route(
            "/my/talks/{id}/sections/{section_id}/ack",
            post(acknowledge_section),
        )
        .route("/my/talks/{id}/video", post(update_video))
        .route("/my/talks/{id}/video/reset", post(reset_video))
        .route("/my/talks/{id}/quiz", post(submit_quiz))
        .route("/my/talks/{id}/complete", post(complete_talk))
}
