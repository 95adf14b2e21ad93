//! Worker instances: the environment a task's commands run in.
//!
//! Drivers are registered by name in an [`InstanceRegistry`] at startup and
//! looked up for every task.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use vmci_core::shell::ShellOutput;

use crate::error::WorkerError;

mod local;
mod vagrant;

pub use local::LocalInstance;
pub use vagrant::VagrantInstance;

/// One isolated environment for a single task.
#[async_trait]
pub trait WorkerInstance: Send {
    /// Bring the environment up. Must be called before `execute`.
    async fn up(&mut self) -> Result<(), WorkerError>;

    /// Run one command line, streaming its output into `output`.
    ///
    /// Returns the command's exit code; a non-zero code is not an error.
    async fn execute(
        &mut self,
        command_line: &str,
        output: &mut dyn ShellOutput,
    ) -> Result<i32, WorkerError>;

    /// Tear the environment down. A no-op when it is not up.
    async fn down(&mut self) -> Result<(), WorkerError>;
}

/// Builds an instance for the task's machine name.
pub type InstanceFactory =
    Arc<dyn Fn(&str) -> Result<Box<dyn WorkerInstance>, WorkerError> + Send + Sync>;

/// Named instance drivers.
#[derive(Default, Clone)]
pub struct InstanceRegistry {
    factories: BTreeMap<String, InstanceFactory>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the driver called `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn WorkerInstance>, WorkerError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Create a fresh instance of driver `name` for `machine`.
    pub fn create(&self, name: &str, machine: &str) -> Result<Box<dyn WorkerInstance>, WorkerError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| WorkerError::UnknownDriver(name.to_string()))?;
        factory(machine)
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("drivers", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
