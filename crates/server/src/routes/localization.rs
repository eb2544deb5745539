use std::{convert::Infallible, time::Duration};

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    response::{
        Json as ResponseJson,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use db::models::localization_job::LocalizationJob;
use futures::{Stream, StreamExt};
use services::services::{
    context::RequestContext,
    localization::{LocalizationProgress, StartLocalization},
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use utils::{
    pagination::{Page, PageParams},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

pub async fn start_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(talk_id): Path<Uuid>,
    Json(payload): Json<StartLocalization>,
) -> Result<ResponseJson<ApiResponse<LocalizationProgress>>, ApiError> {
    let progress = state.localization().start(&ctx, talk_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(progress)))
}

pub async fn list_jobs_for_talk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(talk_id): Path<Uuid>,
    Query(page): Query<PageParams>,
) -> Result<ResponseJson<ApiResponse<Page<LocalizationJob>>>, ApiError> {
    let jobs = state.localization().jobs_for_talk(&ctx, talk_id, page).await?;
    Ok(ResponseJson(ApiResponse::success(jobs)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<LocalizationProgress>>, ApiError> {
    let progress = state.localization().snapshot(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(progress)))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<LocalizationProgress>>, ApiError> {
    let progress = state.localization().cancel(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(progress)))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<LocalizationProgress>>, ApiError> {
    let progress = state.localization().retry(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(progress)))
}

/// Pushes progress snapshots for the caller's tenant as they are published.
pub async fn stream_progress(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let tenant_id = ctx.tenant_id;
    let stream = BroadcastStream::new(state.localization().subscribe()).filter_map(
        move |message| async move {
            match message {
                Ok(progress) if progress.job.tenant_id == tenant_id => {
                    let json = serde_json::to_string(&progress).unwrap_or_else(|_| "{}".to_string());
                    Some(Ok(Event::default().event("localization_progress").data(json)))
                }
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "[LOCALIZATION] Progress stream lagged");
                    Some(Ok(Event::default().comment("lagged")))
                }
            }
        },
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/toolbox-talks/{id}/localization-jobs",
            get(list_jobs_for_talk).post(start_job),
        )
        .route("/localization-jobs/events", get(stream_progress))
        .route("/localization-jobs/{id}", get(get_job))
        .route("/localization-jobs/{id}/cancel", post(cancel_job))
        .route("/localization-jobs/{id}/retry", post(retry_job))
}
