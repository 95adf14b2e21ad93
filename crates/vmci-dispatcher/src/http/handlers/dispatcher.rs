//! Worker-facing RPC: leasing, progress updates and heartbeats.

use std::sync::Arc;

use axum::{extract::State, Json};
use tracing::{debug, info};

use vmci_core::protocol::{
    Ack, TaskPollRequest, TaskPollResponse, TaskUpdateFinishRequest, TaskUpdateShellRequest,
    TaskUpdateStartRequest, WorkerKeepAliveRequest,
};
use vmci_core::{TaskEventKind, TaskShellRecord};

use crate::http::ApiError;
use crate::state::AppState;
use crate::store::StoreError;

/// Lease the oldest pending task to the polling worker.
pub async fn poll_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskPollRequest>,
) -> Result<Json<TaskPollResponse>, ApiError> {
    let task = state.tasks.claim_pending(&req.worker_id).await?;

    match &task {
        Some(task) => {
            info!(task_id = %task.id, worker_id = %req.worker_id, "Task dispatched");
            state.events.publish(&task.id, TaskEventKind::Dispatched);
        }
        None => debug!(worker_id = %req.worker_id, "No pending task"),
    }

    Ok(Json(TaskPollResponse { task }))
}

pub async fn update_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskUpdateStartRequest>,
) -> Result<Json<Ack>, ApiError> {
    let task = state.tasks.mark_started(&req.task_id).await?;
    info!(task_id = %task.id, "Task started");
    state.events.publish(&task.id, TaskEventKind::Started);
    Ok(Json(Ack {}))
}

pub async fn update_finish(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskUpdateFinishRequest>,
) -> Result<Json<Ack>, ApiError> {
    let task = state.tasks.mark_finished(&req.task_id, req.exit_code).await?;
    info!(
        task_id = %task.id,
        exit_code = req.exit_code,
        state = task.state.as_str(),
        "Task finished"
    );
    state.events.publish(&task.id, TaskEventKind::Finished);
    Ok(Json(Ack {}))
}

/// Replace the output of one `(task, index)` record.
pub async fn update_shell(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TaskUpdateShellRequest>,
) -> Result<Json<Ack>, ApiError> {
    if state.tasks.get(&req.task_id).await?.is_none() {
        return Err(StoreError::TaskNotFound(req.task_id).into());
    }

    debug!(
        task_id = %req.task_id,
        worker_id = %req.worker_id,
        index = req.index,
        bytes = req.output.len(),
        "Shell output updated"
    );
    state
        .shells
        .upsert(TaskShellRecord::new(req.task_id.clone(), req.index, req.output))
        .await?;
    state.events.publish(&req.task_id, TaskEventKind::ShellUpdated);
    Ok(Json(Ack {}))
}

pub async fn keep_alive(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WorkerKeepAliveRequest>,
) -> Result<Json<Ack>, ApiError> {
    let record = state.workers.keep_alive(&req.worker_id).await?;
    debug!(worker_id = %record.id, "Worker keep-alive");
    Ok(Json(Ack {}))
}
