//! Worker list handler.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;

use vmci_core::protocol::WorkerResponse;

use crate::http::ApiError;
use crate::state::AppState;

/// List workers with their derived liveness.
pub async fn list_workers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WorkerResponse>>, ApiError> {
    let now = Utc::now();
    let timeout = state.config.worker_timeout();
    let workers = state.workers.list().await?;

    let response = workers
        .into_iter()
        .map(|w| WorkerResponse {
            alive: w.is_alive(now, timeout),
            last_keep_alive: w.last_keep_alive.to_rfc3339(),
            worker_id: w.id,
        })
        .collect();
    Ok(Json(response))
}
