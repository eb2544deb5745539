use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use services::services::context::RequestContext;
use uuid::Uuid;

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";
pub const EMPLOYEE_HEADER: &str = "x-employee-id";
pub const ROLE_HEADER: &str = "x-role";

fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, ApiError> {
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{name} is not valid ASCII")))?;
    Uuid::parse_str(raw.trim())
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("{name} must be a UUID")))
}

/// Builds the caller context from the identity headers set by the upstream
/// gateway. Authentication happens before requests reach this service.
pub fn context_from_headers(headers: &HeaderMap) -> Result<RequestContext, ApiError> {
    let tenant_id = header_uuid(headers, TENANT_HEADER)?
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {TENANT_HEADER} header")))?;
    let user_id = header_uuid(headers, USER_HEADER)?;
    let employee_id = header_uuid(headers, EMPLOYEE_HEADER)?;
    let is_admin = headers
        .get(ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|role| role.eq_ignore_ascii_case("admin"));

    Ok(RequestContext {
        tenant_id,
        user_id,
        employee_id,
        is_admin,
        now: Utc::now(),
    })
}

/// Admin routes: `x-role: admin` is mandatory.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let ctx = context_from_headers(&parts.headers)?;
    if !ctx.is_admin {
        return Err(ApiError::Forbidden("admin role required".to_string()));
    }
    parts.extensions.insert(ctx);
    Ok(next.run(Request::from_parts(parts, body)).await)
}

/// Employee routes: acting employee comes from `x-employee-id`.
pub async fn require_employee(request: Request, next: Next) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    let ctx = context_from_headers(&parts.headers)?;
    if ctx.employee_id.is_none() {
        return Err(ApiError::Unauthorized(format!("missing {EMPLOYEE_HEADER} header")));
    }
    parts.extensions.insert(ctx);
    Ok(next.run(Request::from_parts(parts, body)).await)
}
