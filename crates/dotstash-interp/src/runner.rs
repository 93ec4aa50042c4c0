// ABOUTME: Command execution seam for `$(ref)` substitution.
// ABOUTME: ShellRunner runs `sh -c` on a private current-thread runtime and kills the child on timeout.

use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Returns -1 if killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Errors that prevent a command from producing output.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to start: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Executes a shell command string, blocking until it exits or times out.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RunError>;
}

/// Production runner that spawns `sh -c <command>`.
///
/// Blocks the calling thread, so it must not be called from inside an async
/// runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RunError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async {
            let mut child = Command::new("sh");
            child
                .arg("-c")
                .arg(command)
                .stdin(Stdio::null())
                .kill_on_drop(true);

            let output = match tokio::time::timeout(timeout, child.output()).await {
                Ok(result) => result?,
                Err(_) => return Err(RunError::Timeout(timeout)),
            };

            Ok(CommandOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            })
        })
    }
}
