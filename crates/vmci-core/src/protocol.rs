//! Request and response bodies shared by the dispatcher and its clients.

use serde::{Deserialize, Serialize};

use crate::{Task, TaskConfiguration, TaskId, WorkerId};

// ============================================================================
// Dispatcher RPC (worker -> dispatcher)
// ============================================================================

/// `POST /dispatcher/task/poll`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPollRequest {
    pub worker_id: WorkerId,
}

/// Response to a poll; `task` is `None` when nothing is pending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPollResponse {
    pub task: Option<Task>,
}

/// `POST /dispatcher/task/update/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdateStartRequest {
    pub task_id: TaskId,
}

/// `POST /dispatcher/task/update/finish`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdateFinishRequest {
    pub task_id: TaskId,
    pub exit_code: i32,
}

/// `POST /dispatcher/task/update/shell`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdateShellRequest {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub index: u32,
    pub output: String,
}

/// `POST /dispatcher/worker/keepalive`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerKeepAliveRequest {
    pub worker_id: WorkerId,
}

/// Empty acknowledgement for update calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {}

// ============================================================================
// Operator API
// ============================================================================

/// `POST /v1/tasks`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub configuration: TaskConfiguration,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
}

/// A worker in `GET /v1/workers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub worker_id: WorkerId,
    pub last_keep_alive: String,
    pub alive: bool,
}

/// Error body returned with any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
