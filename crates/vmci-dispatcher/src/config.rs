//! Dispatcher configuration.

use chrono::Duration;

use vmci_core::{ConfigError, Configuration};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// HTTP server bind address.
    pub bind: String,

    /// A worker without a keep-alive for this long is reported as not alive (seconds).
    pub worker_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            worker_timeout_secs: 180,
        }
    }
}

impl DispatcherConfig {
    /// Read the `dispatcher.*` keys, keeping defaults for absent ones.
    pub fn from_configuration(config: &Configuration) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            bind: config.get_or("dispatcher.bind", defaults.bind)?,
            worker_timeout_secs: config
                .get_or("dispatcher.worker_timeout_secs", defaults.worker_timeout_secs)?,
        })
    }

    /// Liveness window for worker keep-alives.
    pub fn worker_timeout(&self) -> Duration {
        Duration::seconds(self.worker_timeout_secs.min(u64::from(u32::MAX)) as i64)
    }
}
