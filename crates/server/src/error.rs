use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::{scheduled_talk::ScheduledTalkError, toolbox_talk_schedule::ScheduleError};
use services::services::{
    assignment_status::AssignmentError,
    completion_workflow::{WorkflowError, WorkflowStep},
    config::ConfigError,
    course_planner::CoursePlannerError,
    localization::LocalizationError,
    schedule_engine::ScheduleEngineError,
};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    BadRequest(String),
    #[error("Gate not satisfied: {0}")]
    GateNotSatisfied(WorkflowStep),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AlreadyTerminal(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    InternalError(String),
}

fn already(status: impl std::fmt::Display) -> ApiError {
    ApiError::AlreadyTerminal(format!("Already {status}"))
}

impl From<ScheduledTalkError> for ApiError {
    fn from(err: ScheduledTalkError) -> Self {
        match err {
            ScheduledTalkError::Database(e) => ApiError::Database(e),
            ScheduledTalkError::NotFound => ApiError::NotFound("Scheduled talk not found".into()),
            ScheduledTalkError::VersionConflict { expected } => ApiError::Conflict(format!(
                "Scheduled talk changed since version {expected}; reload and retry"
            )),
            ScheduledTalkError::AlreadyTerminal(status) => already(status),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::Database(e) => ApiError::Database(e),
            ScheduleError::NotFound => ApiError::NotFound("Schedule not found".into()),
            ScheduleError::Stale => ApiError::Conflict("Schedule was modified concurrently".into()),
        }
    }
}

impl From<ScheduleEngineError> for ApiError {
    fn from(err: ScheduleEngineError) -> Self {
        match err {
            ScheduleEngineError::Schedule(e) => e.into(),
            ScheduleEngineError::ScheduledTalk(e) => e.into(),
            ScheduleEngineError::Database(e) => ApiError::Database(e),
            ScheduleEngineError::Validation(msg) => ApiError::BadRequest(msg),
            ScheduleEngineError::NotFound => ApiError::NotFound("Schedule not found".into()),
            ScheduleEngineError::NotActive(status) => {
                ApiError::Conflict(format!("Schedule is {status}, not active"))
            }
            ScheduleEngineError::AlreadyTerminal(status) => already(status),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<AssignmentError> for ApiError {
    fn from(err: AssignmentError) -> Self {
        match err {
            AssignmentError::Database(e) => ApiError::Database(e),
            AssignmentError::Validation(msg) => ApiError::BadRequest(msg),
            AssignmentError::NotFound => ApiError::NotFound("Scheduled talk not found".into()),
            AssignmentError::AlreadyTerminal(status) => already(status),
            AssignmentError::Conflict { expected } => {
                ApiError::Conflict(format!("Scheduled talk changed since version {expected}"))
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Database(e) => ApiError::Database(e),
            WorkflowError::Validation(msg) => ApiError::BadRequest(msg),
            WorkflowError::GateNotSatisfied(step) => ApiError::GateNotSatisfied(step),
            WorkflowError::Conflict { expected } => ApiError::Conflict(format!(
                "Scheduled talk changed since version {expected}; reload and retry"
            )),
            WorkflowError::NotFound => ApiError::NotFound("Scheduled talk not found".into()),
            WorkflowError::AlreadyTerminal(status) => already(status),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<CoursePlannerError> for ApiError {
    fn from(err: CoursePlannerError) -> Self {
        match err {
            CoursePlannerError::Database(e) => ApiError::Database(e),
            CoursePlannerError::ScheduledTalk(e) => e.into(),
            CoursePlannerError::Validation(msg) => ApiError::BadRequest(msg),
            CoursePlannerError::NotFound => {
                ApiError::NotFound("Course or course assignment not found".into())
            }
            CoursePlannerError::AlreadyTerminal(status) => already(status),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<LocalizationError> for ApiError {
    fn from(err: LocalizationError) -> Self {
        match err {
            LocalizationError::Database(e) => ApiError::Database(e),
            LocalizationError::Validation(msg) => ApiError::BadRequest(msg),
            LocalizationError::NotFound => ApiError::NotFound("Localization job or talk not found".into()),
            LocalizationError::ActiveJobExists => {
                ApiError::Conflict("Talk already has an active localization job".into())
            }
            LocalizationError::JobActive => ApiError::Conflict("Localization job is still running".into()),
            LocalizationError::AlreadyTerminal(status) => already(status),
            LocalizationError::NotConfigured(provider) => {
                ApiError::ServiceUnavailable(format!("{provider} provider is not configured"))
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_type) = match &self {
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DatabaseError"),
            ApiError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Validation"),
            ApiError::GateNotSatisfied(_) => (StatusCode::CONFLICT, "GateNotSatisfied"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            ApiError::AlreadyTerminal(_) => (StatusCode::CONFLICT, "AlreadyTerminal"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            ApiError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "ServiceUnavailable"),
            ApiError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        let error_message = match &self {
            ApiError::Database(e) => {
                tracing::error!("Database error: {}", e);
                "Internal database error".to_string()
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let response = ApiResponse::<()>::error(&format!("{error_type}: {error_message}"));
        (status_code, Json(response)).into_response()
    }
}
