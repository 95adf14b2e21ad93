//! Task submission and inspection.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use vmci_core::protocol::CreateTaskRequest;
use vmci_core::{Task, TaskEventKind, TaskId, TaskShellRecord};

use crate::http::ApiError;
use crate::state::AppState;

/// Submit a new pending task.
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    if req.configuration.machine.trim().is_empty() {
        return Err(ApiError::BadRequest("configuration.machine must not be empty".to_string()));
    }

    let task = Task::new(req.configuration).with_labels(req.project, req.commit);
    state.tasks.insert(task.clone()).await?;

    info!(
        task_id = %task.id,
        machine = %task.configuration.machine,
        project = task.project.as_deref().unwrap_or("-"),
        "Task created"
    );
    state.events.publish(&task.id, TaskEventKind::Created);

    Ok((StatusCode::CREATED, Json(task)))
}

/// List all tasks, newest first.
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Task>>, ApiError> {
    Ok(Json(state.tasks.list().await?))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let task_id = TaskId::new(task_id);
    state
        .tasks
        .get(&task_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("task not found: {task_id}")))
}

/// Shell output records of a task, ordered by index.
pub async fn get_task_shell(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<Vec<TaskShellRecord>>, ApiError> {
    let task_id = TaskId::new(task_id);
    if state.tasks.get(&task_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("task not found: {task_id}")));
    }
    Ok(Json(state.shells.list(&task_id).await?))
}
