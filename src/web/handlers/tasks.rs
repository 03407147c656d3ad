//! Task submission and introspection handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::models::{CreateTaskRequest, CreateTaskResponse, TaskHistory, TaskResponse};
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;

#[derive(Debug, Serialize)]
pub struct TaskHistoryResponse {
    pub history: Vec<TaskHistory>,
}

/// POST /api/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<CreateTaskResponse>)> {
    if request.task_type.trim().is_empty() {
        return Err(ApiError::bad_request("task type is required"));
    }

    let task = state.store.create_task(request).await?;

    info!(
        task_id = task.id,
        task_name = %task.name,
        task_type = %task.task_type,
        priority = task.priority,
        max_retries = task.max_retries,
        "task created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            id: task.id,
            status: task.status,
        }),
    ))
}

/// GET /api/tasks/{id}
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.store.get_task(id).await?;
    Ok(Json(task.to_response()))
}

/// GET /api/tasks/{id}/history
pub async fn get_task_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<TaskHistoryResponse>> {
    // History of an unknown id is an empty sequence at the store, so check
    // existence explicitly to give clients a proper 404.
    state.store.get_task(id).await?;
    let history = state.store.get_task_history(id).await?;
    Ok(Json(TaskHistoryResponse { history }))
}
