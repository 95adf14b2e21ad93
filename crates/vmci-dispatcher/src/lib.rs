//! vmci Dispatcher Library
//!
//! The dispatcher owns the task documents. Workers lease pending tasks
//! through it, report progress and shell output, and send heartbeats;
//! operators submit and inspect tasks over the same HTTP API.

pub mod config;
pub mod events;
pub mod http;
pub mod metrics;
pub mod state;
pub mod store;

pub use config::DispatcherConfig;
pub use events::EventHub;
pub use http::create_router;
pub use state::AppState;
pub use store::{MemoryStore, StoreError, TaskShellStore, TaskStore, WorkerStore};
