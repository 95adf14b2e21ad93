//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vmci_core::{ConfigError, Configuration, WorkerId};

use crate::remote_shell::DEFAULT_COMMAND_TIMEOUT;

/// Settings of the Vagrant instance driver.
#[derive(Debug, Clone)]
pub struct VagrantConfig {
    /// Vagrant executable.
    pub executable: String,

    /// Directory holding one sub-directory per running machine.
    pub machines: PathBuf,

    /// Prefix of box URLs; `<box_urls><machine>.box` is booted.
    pub box_urls: Option<String>,

    pub cpus: u32,

    /// Memory per machine in megabytes.
    pub memory: u32,
}

impl Default for VagrantConfig {
    fn default() -> Self {
        Self {
            executable: "vagrant".to_string(),
            machines: std::env::temp_dir().join("vmci-machines"),
            box_urls: None,
            cpus: 2,
            memory: 1024,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker ID reported to the dispatcher.
    pub worker_id: WorkerId,

    /// Dispatcher base URL.
    pub server: String,

    /// Instance driver name (`vagrant` or `local`).
    pub driver: String,

    /// Tasks processed in parallel.
    pub concurrency: usize,

    /// Keep-alive interval in seconds.
    pub keepalive_interval_secs: u64,

    /// Per-command timeout in seconds.
    pub command_timeout_secs: u64,

    /// Minimum delay between polls while idle, in milliseconds.
    pub poll_interval_ms: u64,

    pub vagrant: VagrantConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::generate(),
            server: "http://localhost:8080".to_string(),
            driver: "vagrant".to_string(),
            concurrency: 4,
            keepalive_interval_secs: 60,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            poll_interval_ms: 1000,
            vagrant: VagrantConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Read the `worker.*` keys. `worker.id` is mandatory; everything else
    /// falls back to defaults.
    pub fn from_configuration(config: &Configuration) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let vagrant = VagrantConfig {
            executable: config.get_or("worker.vagrant.executable", defaults.vagrant.executable)?,
            machines: config.get_or("worker.vagrant.machines", defaults.vagrant.machines)?,
            box_urls: config.get_opt_str("worker.vagrant.box_urls"),
            cpus: config.get_or("worker.vagrant.cpus", defaults.vagrant.cpus)?,
            memory: config.get_or("worker.vagrant.memory", defaults.vagrant.memory)?,
        };

        Ok(Self {
            worker_id: WorkerId::new(config.get_str("worker.id")?),
            server: config.get_or("worker.server", defaults.server)?,
            driver: config.get_or("worker.driver", defaults.driver)?,
            concurrency: config.get_or("worker.concurrency", defaults.concurrency)?,
            keepalive_interval_secs: config
                .get_or("worker.keepalive_interval_secs", defaults.keepalive_interval_secs)?,
            command_timeout_secs: config
                .get_or("worker.command_timeout_secs", defaults.command_timeout_secs)?,
            poll_interval_ms: config.get_or("worker.poll_interval_ms", defaults.poll_interval_ms)?,
            vagrant,
        })
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
