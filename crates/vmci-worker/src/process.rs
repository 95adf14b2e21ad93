//! Running local helper programs (vagrant, ssh-keygen) to completion.

use std::path::Path;
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code, or -1 when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output followed by standard error.
    pub fn output(&self) -> String {
        let mut output = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&self.stderr);
        }
        output
    }
}

/// Runs one program with varying arguments.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run to completion in `working_dir`, capturing both output streams.
    ///
    /// A non-zero exit code is not an error here; check [`ProcessResult::success`].
    pub async fn run(&self, args: &[&str], working_dir: &Path) -> Result<ProcessResult, ProcessError> {
        debug!(
            program = %self.program,
            args = ?args,
            working_dir = %working_dir.display(),
            "Running process"
        );

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let result = ProcessResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(program = %self.program, exit_code = result.exit_code, "Process finished");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let sh = ProcessRunner::new("sh");

        let result = sh
            .run(&["-c", "pwd; echo oops >&2; exit 3"], dir.path())
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
        let cwd = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(
            std::fs::canonicalize(result.stdout.trim()).unwrap(),
            cwd
        );
        assert_eq!(result.stderr, "oops\n");
        assert!(result.output().ends_with("oops\n"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new("vmci-definitely-not-installed");
        let err = runner.run(&[], dir.path()).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn test_output_joins_streams() {
        let result = ProcessResult {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(result.output(), "out\nerr\n");
    }
}
