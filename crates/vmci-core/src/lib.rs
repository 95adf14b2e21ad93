//! vmci Core
//!
//! This crate contains the pieces shared by the dispatcher and the workers:
//! - Domain types (tasks, shell records, workers) and their wire DTOs
//! - Shell script splitting and shell output sinks
//! - The thread-based task loops that drive polling and worker pools
//! - Hierarchical YAML configuration
//!
//! Nothing here talks to the network or a database.

pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod loops;
pub mod protocol;
pub mod shell;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use config::{ConfigError, Configuration};
pub use error::CoreError;
pub use event::{TaskEvent, TaskEventKind};
pub use ids::{TaskId, WorkerId};
pub use loops::{BoxError, ConcurrentTaskLoop, LoopError, LoopHealth, TaskLoop};
pub use status::TaskState;
pub use task::{Task, TaskConfiguration, TaskShellRecord};
pub use worker::WorkerRecord;
