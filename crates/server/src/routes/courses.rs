use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::{delete, get, post},
};
use serde::Deserialize;
use services::services::{
    context::RequestContext,
    course_planner::{
        AssignCourse, CourseAssignmentFilter, CourseAssignmentView, CoursePreview,
        EmployeeAssignResult, PreviewRequest,
    },
};
use utils::{
    pagination::{Page, PageParams},
    response::ApiResponse,
};
use uuid::Uuid;

use crate::{AppState, error::ApiError};

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    pub reason: Option<String>,
}

pub async fn preview_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<PreviewRequest>,
) -> Result<ResponseJson<ApiResponse<CoursePreview>>, ApiError> {
    let preview = state
        .courses()
        .preview(&ctx, course_id, &payload.employee_ids)
        .await?;
    Ok(ResponseJson(ApiResponse::success(preview)))
}

pub async fn assign_course(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(course_id): Path<Uuid>,
    Json(payload): Json<AssignCourse>,
) -> Result<ResponseJson<ApiResponse<Vec<EmployeeAssignResult>>>, ApiError> {
    let results = state.courses().assign(&ctx, course_id, payload).await?;
    Ok(ResponseJson(ApiResponse::success(results)))
}

pub async fn list_course_assignments(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<CourseAssignmentFilter>,
    Query(page): Query<PageParams>,
) -> Result<ResponseJson<ApiResponse<Page<CourseAssignmentView>>>, ApiError> {
    let assignments = state.courses().list(&ctx, &filter, page).await?;
    Ok(ResponseJson(ApiResponse::success(assignments)))
}

pub async fn get_course_assignment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<CourseAssignmentView>>, ApiError> {
    let assignment = state.courses().get(&ctx, id).await?;
    Ok(ResponseJson(ApiResponse::success(assignment)))
}

pub async fn delete_course_assignment(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<ResponseJson<ApiResponse<CourseAssignmentView>>, ApiError> {
    let assignment = state
        .courses()
        .delete(&ctx, id, query.reason.as_deref())
        .await?;
    Ok(ResponseJson(ApiResponse::success(assignment)))
}

pub async fn remove_talk(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, talk_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<CourseAssignmentView>>, ApiError> {
    let assignment = state.courses().remove_talk(&ctx, id, talk_id).await?;
    Ok(ResponseJson(ApiResponse::success(assignment)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/courses/{id}/preview", post(preview_course))
        .route("/courses/{id}/assign", post(assign_course))
        .route("/course-assignments", get(list_course_assignments))
        .route(
            "/course-assignments/{id}",
            get(get_course_assignment).delete(delete_course_assignment),
        )
        .route("/course-assignments/{id}/talks/{talk_id}", delete(remove_talk))
}
