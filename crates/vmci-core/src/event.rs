//! Task change notifications pushed to observers.

use crate::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Created,
    Dispatched,
    Started,
    ShellUpdated,
    Finished,
}

/// A change notification for a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, kind: TaskEventKind) -> Self {
        Self {
            task_id,
            kind,
            timestamp: Utc::now(),
        }
    }
}
