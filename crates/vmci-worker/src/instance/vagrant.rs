//! Instances backed by a Vagrant machine reached over SSH.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use vmci_core::shell::ShellOutput;

use super::WorkerInstance;
use crate::error::WorkerError;
use crate::remote_shell::{RemoteShellExecutor, SshConnection};
use crate::vm::{MachineImage, VagrantDriver, VirtualMachine};

pub struct VagrantInstance {
    vm: VirtualMachine,
    executor: RemoteShellExecutor,
    connection: Option<SshConnection>,
    command_timeout: Duration,
}

impl VagrantInstance {
    /// A new (down) instance booting `<box_urls><machine>.box`.
    pub fn new(driver: &VagrantDriver, box_urls: &str, machine: &str, command_timeout: Duration) -> Self {
        Self {
            vm: driver.machine(MachineImage::from_box_urls(box_urls, machine)),
            executor: RemoteShellExecutor::default(),
            connection: None,
            command_timeout,
        }
    }

    pub fn with_executor(mut self, executor: RemoteShellExecutor) -> Self {
        self.executor = executor;
        self
    }
}

#[async_trait]
impl WorkerInstance for VagrantInstance {
    async fn up(&mut self) -> Result<(), WorkerError> {
        info!(vm_id = %self.vm.id(), machine = %self.vm.image().name, "Bringing VM up");
        self.vm.up().await?;
        self.connection = Some(self.vm.create_client()?);
        Ok(())
    }

    async fn execute(
        &mut self,
        command_line: &str,
        output: &mut dyn ShellOutput,
    ) -> Result<i32, WorkerError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or(WorkerError::InstanceNotRunning)?;
        let exit_code = self
            .executor
            .execute(connection, command_line, output, self.command_timeout)
            .await?;
        Ok(exit_code)
    }

    async fn down(&mut self) -> Result<(), WorkerError> {
        self.connection = None;
        if !self.vm.is_up() {
            return Ok(());
        }
        self.vm.down().await?;
        info!(vm_id = %self.vm.id(), machine = %self.vm.image().name, "Brought VM down");
        Ok(())
    }
}
