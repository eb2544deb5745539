use axum::{Router, middleware, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{AppState, middleware as app_middleware};

pub mod courses;
pub mod health;
pub mod localization;
pub mod my_talks;
pub mod scheduled_talks;
pub mod schedules;

pub fn router(state: AppState) -> Router {
    // Admin routes with require_admin applied before state
    let admin_routes = Router::new()
        .merge(schedules::router())
        .merge(scheduled_talks::router())
        .merge(courses::router())
        .merge(localization::router())
        .layer(middleware::from_fn(app_middleware::require_admin));

    let employee_routes =
        my_talks::router().layer(middleware::from_fn(app_middleware::require_employee));

    let api_routes = Router::new()
        .merge(admin_routes)
        .merge(employee_routes)
        .with_state(state.clone());

    Router::new()
        .route("/health", get(health::health_check))
        .with_state(state)
        .nest("/api", api_routes)
        .layer(middleware::from_fn(app_middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
