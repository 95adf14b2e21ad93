//! vmci Worker
//!
//! Polls the dispatcher for tasks and runs each one in a fresh instance:
//! a Vagrant machine reached over SSH, or a scratch directory on the host
//! for development. Command output is streamed back to the dispatcher
//! record by record.

pub mod config;
pub mod error;
pub mod handler;
pub mod instance;
pub mod output;
pub mod process;
pub mod remote_shell;
pub mod vm;

use vmci_core::ConfigError;

pub use config::{VagrantConfig, WorkerConfig};
pub use error::WorkerError;
pub use handler::{TaskRunner, WorkerHandler, WorkerHealth};
pub use instance::{InstanceRegistry, LocalInstance, VagrantInstance, WorkerInstance};

/// Driver name of [`VagrantInstance`].
pub const VAGRANT_DRIVER: &str = "vagrant";

/// Driver name of [`LocalInstance`].
pub const LOCAL_DRIVER: &str = "local";

/// Register the drivers that `config` allows.
///
/// `local` is always available. `vagrant` is available when
/// `worker.vagrant.box_urls` is set; selecting it without box URLs is a
/// configuration error.
pub fn build_registry(config: &WorkerConfig) -> Result<InstanceRegistry, WorkerError> {
    let mut registry = InstanceRegistry::new();
    let timeout = config.command_timeout();

    registry.register(LOCAL_DRIVER, move |_machine: &str| {
        Ok(Box::new(LocalInstance::new(timeout)) as Box<dyn WorkerInstance>)
    });

    match &config.vagrant.box_urls {
        Some(box_urls) => {
            let driver = vm::VagrantDriver::new(
                config.vagrant.executable.clone(),
                config.vagrant.machines.clone(),
            )
            .with_resources(config.vagrant.cpus, config.vagrant.memory);
            let box_urls = box_urls.clone();

            registry.register(VAGRANT_DRIVER, move |machine: &str| {
                Ok(Box::new(VagrantInstance::new(&driver, &box_urls, machine, timeout))
                    as Box<dyn WorkerInstance>)
            });
        }
        None if config.driver == VAGRANT_DRIVER => {
            return Err(ConfigError::MissingKey("worker.vagrant.box_urls".to_string()).into());
        }
        None => {}
    }

    if !registry.contains(&config.driver) {
        return Err(WorkerError::UnknownDriver(config.driver.clone()));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmci_core::WorkerId;

    fn config(driver: &str, box_urls: Option<&str>) -> WorkerConfig {
        let mut config = WorkerConfig {
            worker_id: WorkerId::new("w1"),
            driver: driver.to_string(),
            ..WorkerConfig::default()
        };
        config.vagrant.box_urls = box_urls.map(str::to_string);
        config
    }

    #[test]
    fn test_local_driver_needs_no_vagrant_settings() {
        let registry = build_registry(&config("local", None)).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["local"]);
    }

    #[test]
    fn test_vagrant_driver_requires_box_urls() {
        let err = build_registry(&config("vagrant", None)).unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Config(ConfigError::MissingKey(ref key)) if key == "worker.vagrant.box_urls"
        ));

        let registry = build_registry(&config("vagrant", Some("https://boxes.example/"))).unwrap();
        assert!(registry.contains("vagrant"));
        assert!(registry.contains("local"));
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let err = build_registry(&config("docker", None)).unwrap_err();
        assert!(matches!(err, WorkerError::UnknownDriver(ref name) if name == "docker"));
    }
}
