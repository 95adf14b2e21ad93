//! Command execution inside a machine over the OpenSSH client.
//!
//! Output of the remote command is forwarded to a [`ShellOutput`] as soon as
//! it arrives; the exit code is returned to the caller, which decides whether
//! a non-zero code is a failure.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use vmci_core::shell::ShellOutput;

/// User created inside every machine by the bootstrap script.
pub const VM_USER: &str = "vmci";

/// Per-command timeout unless configured otherwise.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error while streaming command output: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key file for public-key authentication.
    pub key_path: PathBuf,
}

impl SshConnection {
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>, key_path: PathBuf) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            key_path,
        }
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Runs single command lines on a remote machine.
#[derive(Debug, Clone)]
pub struct RemoteShellExecutor {
    ssh_executable: String,
}

impl Default for RemoteShellExecutor {
    fn default() -> Self {
        Self::new("ssh")
    }
}

impl RemoteShellExecutor {
    pub fn new(ssh_executable: impl Into<String>) -> Self {
        Self {
            ssh_executable: ssh_executable.into(),
        }
    }

    /// Build the `ssh` invocation for one command line.
    pub fn command(&self, connection: &SshConnection, command_line: &str) -> Command {
        let mut cmd = Command::new(&self.ssh_executable);
        cmd.arg("-i")
            .arg(&connection.key_path)
            .arg("-p")
            .arg(connection.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "LogLevel=ERROR"])
            .arg(connection.destination())
            .arg("--")
            .arg(command_line);
        cmd
    }

    /// Run `command_line` remotely, streaming its output into `sink`.
    ///
    /// Returns the remote exit code. Exceeding `timeout` kills the local
    /// client and yields [`ShellError::Timeout`]; the remote process may keep
    /// running until the machine is destroyed.
    pub async fn execute(
        &self,
        connection: &SshConnection,
        command_line: &str,
        sink: &mut dyn ShellOutput,
        timeout: Duration,
    ) -> Result<i32, ShellError> {
        debug!(
            host = %connection.host,
            port = connection.port,
            command = %command_line,
            "Executing remote command"
        );
        stream_child(self.command(connection, command_line), sink, timeout).await
    }
}

/// Spawn `cmd` and forward stdout/stderr chunks to `sink` until it exits.
///
/// Shared by every instance driver that runs commands as child processes.
pub async fn stream_child(
    mut cmd: Command,
    sink: &mut dyn ShellOutput,
    timeout: Duration,
) -> Result<i32, ShellError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(ShellError::Spawn)?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ShellError::Io(std::io::Error::other("stdout not captured")))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| ShellError::Io(std::io::Error::other("stderr not captured")))?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut out_buf = [0u8; 4096];
    let mut err_buf = [0u8; 4096];
    let mut out_text = Utf8Chunks::default();
    let mut err_text = Utf8Chunks::default();
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => {
                match read? {
                    0 => {
                        out_open = false;
                        write_out(sink, &out_text.finish()).await;
                    }
                    n => write_out(sink, &out_text.push(&out_buf[..n])).await,
                }
            }
            read = stderr.read(&mut err_buf), if err_open => {
                match read? {
                    0 => {
                        err_open = false;
                        write_err(sink, &err_text.finish()).await;
                    }
                    n => write_err(sink, &err_text.push(&err_buf[..n])).await,
                }
            }
            _ = &mut deadline => {
                warn!(timeout = ?timeout, "Command timed out, killing it");
                let _ = child.kill().await;
                return Err(ShellError::Timeout(timeout));
            }
        }
    }

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = &mut deadline => {
            warn!(timeout = ?timeout, "Command timed out, killing it");
            let _ = child.kill().await;
            return Err(ShellError::Timeout(timeout));
        }
    };

    Ok(status.code().unwrap_or(-1))
}

async fn write_out(sink: &mut dyn ShellOutput, text: &str) {
    if !text.is_empty() {
        sink.write_standard_output(text).await;
    }
}

async fn write_err(sink: &mut dyn ShellOutput, text: &str) {
    if !text.is_empty() {
        sink.write_standard_error(text).await;
    }
}

/// Decodes a byte stream as UTF-8 without splitting multi-byte characters
/// across chunk boundaries.
#[derive(Debug, Default)]
struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                text
            }
            // Incomplete sequence at the end: keep it for the next chunk.
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let text = String::from_utf8_lossy(&self.pending[..valid]).into_owned();
                self.pending.drain(..valid);
                text
            }
            Err(_) => self.finish(),
        }
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
