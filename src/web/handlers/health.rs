use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::database::connection::health_check;
use crate::web::state::AppState;

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

/// GET /liveness
pub async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "alive" }))
}

/// GET /readiness
pub async fn readiness(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if let Some(pool) = &state.pool {
        if health_check(pool).await.is_err() {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "not ready", "error": "database unavailable" })),
            ));
        }
    }

    Ok(Json(json!({ "status": "ready" })))
}
