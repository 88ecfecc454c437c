//! Task status endpoints: `GET /tasks[/<id>]`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::rest::{ApiError, AppState};

#[utoipa::path(
    get,
    path = "/v1/tasks",
    responses((status = 200, description = "List of tasks", body = Vec<pvc_core::entity::task::Task>)),
    tag = "tasks"
)]
pub async fn list(State(state): State<Arc<AppState>>) -> Response {
    match state.tasks.list().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/tasks/{id}",
    params(("id" = String, Path, description = "Task id")),
    responses(
        (status = 200, description = "Task found", body = pvc_core::entity::task::Task),
        (status = 404, description = "Task not found", body = crate::rest::ApiError)
    ),
    tag = "tasks"
)]
pub async fn get(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.tasks.status(&id).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
