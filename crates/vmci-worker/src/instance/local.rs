//! Instances that run commands with `sh -c` on the worker host.
//!
//! No isolation at all; meant for development and end-to-end tests.

use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use vmci_core::shell::ShellOutput;

use super::WorkerInstance;
use crate::error::WorkerError;
use crate::remote_shell::stream_child;

pub struct LocalInstance {
    shell: String,
    command_timeout: Duration,
    /// Scratch directory, present while up.
    dir: Option<TempDir>,
}

impl LocalInstance {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            shell: "sh".to_string(),
            command_timeout,
            dir: None,
        }
    }
}

#[async_trait]
impl WorkerInstance for LocalInstance {
    async fn up(&mut self) -> Result<(), WorkerError> {
        let dir = tempfile::Builder::new().prefix("vmci-local-").tempdir()?;
        debug!(dir = %dir.path().display(), "Local instance up");
        self.dir = Some(dir);
        Ok(())
    }

    async fn execute(
        &mut self,
        command_line: &str,
        output: &mut dyn ShellOutput,
    ) -> Result<i32, WorkerError> {
        let dir = self.dir.as_ref().ok_or(WorkerError::InstanceNotRunning)?;

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command_line).current_dir(dir.path());
        Ok(stream_child(cmd, output, self.command_timeout).await?)
    }

    async fn down(&mut self) -> Result<(), WorkerError> {
        if let Some(dir) = self.dir.take() {
            debug!(dir = %dir.path().display(), "Local instance down");
            dir.close()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmci_core::shell::MemoryShellOutput;

    #[tokio::test]
    async fn test_commands_share_a_working_directory() {
        let mut instance = LocalInstance::new(Duration::from_secs(5));
        instance.up().await.unwrap();

        let mut output = MemoryShellOutput::new();
        assert_eq!(instance.execute("echo hello > greeting", &mut output).await.unwrap(), 0);
        assert_eq!(instance.execute("cat greeting", &mut output).await.unwrap(), 0);
        assert_eq!(instance.execute("exit 7", &mut output).await.unwrap(), 7);
        assert_eq!(output.standard_output(), "hello\n");

        instance.down().await.unwrap();
        assert!(matches!(
            instance.execute("true", &mut output).await,
            Err(WorkerError::InstanceNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_shell_error() {
        let mut instance = LocalInstance::new(Duration::from_millis(200));
        instance.up().await.unwrap();

        let mut output = MemoryShellOutput::new();
        let err = instance.execute("sleep 5", &mut output).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Shell(crate::remote_shell::ShellError::Timeout(_))
        ));
        instance.down().await.unwrap();
    }
}
