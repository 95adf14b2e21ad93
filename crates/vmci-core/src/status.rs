//! Task lifecycle state.

use serde::{Deserialize, Serialize};

/// State of a Task in the dispatcher.
///
/// The only legal transitions are `Pending -> Running` (a lease) and
/// `Running -> Succeeded | Failed` (a finish report).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Task created but not yet leased by a worker.
    #[default]
    Pending,
    /// Task leased by a worker.
    Running,
    /// Task finished with exit code 0.
    Succeeded,
    /// Task finished with a non-zero exit code.
    Failed,
}

impl TaskState {
    /// All states, in lifecycle order.
    pub const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Succeeded,
        TaskState::Failed,
    ];

    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// State a finished task ends up in for the given exit code.
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }

    /// Lowercase label used in metrics and listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}
