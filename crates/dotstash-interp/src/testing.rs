// ABOUTME: Test utilities for dotstash-interp, including a scripted command runner.
// ABOUTME: Used in tests to drive `$(ref)` substitution without spawning processes.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::runner::{CommandOutput, CommandRunner, RunError};

enum Script {
    Output(CommandOutput),
    Timeout,
}

/// A runner that returns canned results and records every command it is
/// asked to run.
///
/// Commands without a scripted result succeed and echo themselves followed
/// by a newline, like `echo <command>` would.
#[derive(Default)]
pub struct RecordingRunner {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed with `stdout` when `command` runs.
    pub fn with_output(mut self, command: &str, stdout: &str) -> Self {
        self.scripts
            .insert(command.to_owned(), Script::Output(CommandOutput::success(stdout)));
        self
    }

    /// Exit with `code` and `stderr` when `command` runs.
    pub fn with_failure(mut self, command: &str, code: i32, stderr: &str) -> Self {
        self.scripts.insert(
            command.to_owned(),
            Script::Output(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: stderr.to_owned(),
            }),
        );
        self
    }

    /// Report a timeout when `command` runs.
    pub fn with_timeout(mut self, command: &str) -> Self {
        self.scripts.insert(command.to_owned(), Script::Timeout);
        self
    }

    /// Commands executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, RunError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.to_owned());
        match self.scripts.get(command) {
            Some(Script::Output(output)) => Ok(output.clone()),
            Some(Script::Timeout) => Err(RunError::Timeout(timeout)),
            None => Ok(CommandOutput::success(format!("{command}\n"))),
        }
    }
}
