//! Worker error types.

use thiserror::Error;

use vmci_client::ClientError;
use vmci_core::{ConfigError, LoopError};

use crate::remote_shell::ShellError;
use crate::vm::VmError;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// A script command exited with a non-zero code (or timed out, reported as 1).
    #[error("shell command failed with exit code {0}")]
    ShellCommandFailed(i32),

    #[error("no instance driver named '{0}'")]
    UnknownDriver(String),

    #[error("instance is not running")]
    InstanceNotRunning,

    #[error(transparent)]
    Vm(#[from] VmError),

    #[error(transparent)]
    Shell(#[from] ShellError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
