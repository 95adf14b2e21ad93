//! Shared application state.

use std::sync::Arc;

use crate::config::DispatcherConfig;
use crate::events::EventHub;
use crate::store::{MemoryStore, TaskShellStore, TaskStore, WorkerStore};

/// Shared application state.
pub struct AppState {
    /// Task documents and the lease operation.
    pub tasks: Arc<dyn TaskStore>,

    /// Shell output records.
    pub shells: Arc<dyn TaskShellStore>,

    /// Worker heartbeats.
    pub workers: Arc<dyn WorkerStore>,

    /// Live task events for `/v1/events`.
    pub events: EventHub,

    pub config: DispatcherConfig,
}

impl AppState {
    /// Create a new AppState backed by a fresh [`MemoryStore`].
    pub fn new(config: DispatcherConfig) -> Arc<Self> {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(config, store.clone(), store.clone(), store)
    }

    /// Create a new AppState over the given stores.
    pub fn with_stores(
        config: DispatcherConfig,
        tasks: Arc<dyn TaskStore>,
        shells: Arc<dyn TaskShellStore>,
        workers: Arc<dyn WorkerStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tasks,
            shells,
            workers,
            events: EventHub::default(),
            config,
        })
    }
}
