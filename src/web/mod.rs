//! HTTP submission and introspection surface.

pub mod errors;
pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

/// Assemble the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/liveness", get(handlers::health::liveness))
        .route("/readiness", get(handlers::health::readiness))
        .route("/api/tasks", post(handlers::tasks::create_task))
        .route("/api/tasks/{id}", get(handlers::tasks::get_task))
        .route(
            "/api/tasks/{id}/history",
            get(handlers::tasks::get_task_history),
        )
        .route("/api/stats", get(handlers::stats::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
