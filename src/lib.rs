pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::attempt_service::AttemptService;

/// Webcam snapshots ride along with monitor events.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub attempt_service: AttemptService,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(attempt_service: AttemptService, jwt_secret: &str) -> Self {
        Self {
            attempt_service,
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let student_api = Router::new()
        .route(
            "/api/assessments/available",
            get(routes::attempt::list_available),
        )
        .route(
            "/api/assessments/:id/attempts",
            post(routes::attempt::start_attempt),
        )
        .route(
            "/api/assessments/:id/history",
            get(routes::attempt::get_history),
        )
        .route("/api/attempts/:id", get(routes::attempt::get_status))
        .route(
            "/api/attempts/:id/questions",
            get(routes::attempt::get_questions),
        )
        .route(
            "/api/attempts/:id/answers",
            put(routes::attempt::save_answer),
        )
        .route(
            "/api/attempts/:id/submit",
            post(routes::attempt::submit_attempt),
        )
        .route(
            "/api/attempts/:id/monitor",
            post(routes::attempt::submit_monitor_event),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user,
        ));

    Router::new()
        .route("/health", get(routes::health::health))
        .merge(student_api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
}
