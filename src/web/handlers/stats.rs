use axum::extract::State;
use axum::Json;

use crate::models::TaskStats;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<TaskStats>> {
    let stats = state.store.get_stats().await?;
    Ok(Json(stats))
}
