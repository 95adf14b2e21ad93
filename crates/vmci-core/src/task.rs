//! Task and shell record types.

use crate::{CoreError, TaskId, TaskState, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a task runs: the machine image and the scripts, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfiguration {
    /// Name of the machine image (e.g. `precise64`).
    pub machine: String,

    /// Credential injection script. Executed first, output is never recorded.
    #[serde(default)]
    pub secret_startup_script: Option<String>,

    /// Repository checkout script.
    #[serde(default)]
    pub checkout_script: Option<String>,

    /// Build/test script.
    #[serde(default)]
    pub test_script: Option<String>,
}

impl TaskConfiguration {
    /// Create a configuration for the given machine with no scripts.
    pub fn new(machine: impl Into<String>) -> Self {
        Self {
            machine: machine.into(),
            ..Default::default()
        }
    }

    /// Builder method to set the secret startup script.
    pub fn with_secret_startup_script(mut self, script: impl Into<String>) -> Self {
        self.secret_startup_script = Some(script.into());
        self
    }

    /// Builder method to set the checkout script.
    pub fn with_checkout_script(mut self, script: impl Into<String>) -> Self {
        self.checkout_script = Some(script.into());
        self
    }

    /// Builder method to set the test script.
    pub fn with_test_script(mut self, script: impl Into<String>) -> Self {
        self.test_script = Some(script.into());
        self
    }
}

/// A Task represents one unit of CI work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Current task state.
    pub state: TaskState,

    /// Worker that leased this task.
    pub worker_id: Option<WorkerId>,

    /// Machine and scripts.
    pub configuration: TaskConfiguration,

    /// Project label, carried through unchanged.
    #[serde(default)]
    pub project: Option<String>,

    /// Commit label, carried through unchanged.
    #[serde(default)]
    pub commit: Option<String>,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When a worker leased the task.
    pub dispatched_at: Option<DateTime<Utc>>,

    /// When the worker's VM came up and scripts began.
    pub started_at: Option<DateTime<Utc>>,

    /// When the worker reported the result.
    pub finished_at: Option<DateTime<Utc>>,

    /// Exit code reported by the worker.
    pub exit_code: Option<i32>,
}

impl Task {
    /// Create a new pending Task.
    pub fn new(configuration: TaskConfiguration) -> Self {
        Self {
            id: TaskId::generate(),
            state: TaskState::Pending,
            worker_id: None,
            configuration,
            project: None,
            commit: None,
            created_at: Utc::now(),
            dispatched_at: None,
            started_at: None,
            finished_at: None,
            exit_code: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Builder method to set the creation time (useful for testing).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Builder method to set project and commit labels.
    pub fn with_labels(mut self, project: Option<String>, commit: Option<String>) -> Self {
        self.project = project;
        self.commit = commit;
        self
    }

    /// Lease the task: `Pending -> Running`, binding the worker.
    pub fn claim(&mut self, worker_id: WorkerId) -> Result<(), CoreError> {
        self.expect_state(TaskState::Pending, TaskState::Running)?;
        self.state = TaskState::Running;
        self.worker_id = Some(worker_id);
        self.dispatched_at = Some(Utc::now());
        Ok(())
    }

    /// Record that the worker started executing scripts.
    pub fn start(&mut self) -> Result<(), CoreError> {
        self.expect_state(TaskState::Running, TaskState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the final exit code: `Running -> Succeeded | Failed`.
    pub fn finish(&mut self, exit_code: i32) -> Result<(), CoreError> {
        let next = TaskState::from_exit_code(exit_code);
        self.expect_state(TaskState::Running, next)?;
        self.state = next;
        self.exit_code = Some(exit_code);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn expect_state(&self, expected: TaskState, to: TaskState) -> Result<(), CoreError> {
        if self.state != expected {
            return Err(CoreError::InvalidStateTransition {
                from: format!("{:?}", self.state),
                to: format!("{:?}", to),
            });
        }
        Ok(())
    }
}

/// Captured output of one command (or status message) of a task.
///
/// Identified by `(task_id, index)`; every update replaces `output` entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskShellRecord {
    pub task_id: TaskId,
    pub index: u32,
    pub output: String,
}

impl TaskShellRecord {
    pub fn new(task_id: TaskId, index: u32, output: impl Into<String>) -> Self {
        Self {
            task_id,
            index,
            output: output.into(),
        }
    }
}
