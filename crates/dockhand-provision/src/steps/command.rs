//! Generic command execution steps

use std::fmt;
use std::time::Duration;

use super::{Step, StepResult};
use crate::runner::CommandRunner;

/// Run a command with optional idempotency guard
#[derive(Debug, Clone)]
pub struct RunCommand {
    /// Human-readable description
    pub description: String,
    /// Command to execute
    pub command: String,
    /// If this command succeeds (exit 0), skip running `command`
    pub unless: Option<String>,
}

impl RunCommand {
    /// Create a new command step
    pub fn new(description: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
            unless: None,
        }
    }

    /// Add an idempotency guard
    pub fn unless(mut self, check: impl Into<String>) -> Self {
        self.unless = Some(check.into());
        self
    }

    /// Ask the daemon for its version; fails when the engine is not reachable
    pub fn verify_docker() -> Self {
        Self::new("Verify Docker engine", "docker version")
    }
}

impl Step for RunCommand {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        vec![self.command.clone()]
    }

    fn check_command(&self) -> Option<String> {
        self.unless.clone()
    }
}

type StepFn = dyn Fn(&dyn CommandRunner, Option<Duration>) -> Result<(), String> + Send + Sync;

/// A step backed by a closure
///
/// The closure gets the executor's runner and the step's time limit. It has
/// no shell form unless one is given with [`FnStep::with_script`].
pub struct FnStep {
    description: String,
    action: Box<StepFn>,
    script: Vec<String>,
}

impl FnStep {
    pub fn new<F>(description: impl Into<String>, action: F) -> Self
    where
        F: Fn(&dyn CommandRunner, Option<Duration>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            action: Box::new(action),
            script: vec![],
        }
    }

    /// Shell equivalent used when the manifest is rendered
    pub fn with_script(mut self, script: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.script = script.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep")
            .field("description", &self.description)
            .field("script", &self.script)
            .finish_non_exhaustive()
    }
}

impl Step for FnStep {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        self.script.clone()
    }

    fn check_command(&self) -> Option<String> {
        None
    }

    fn run(&self, runner: &dyn CommandRunner, timeout: Option<Duration>) -> StepResult {
        match (self.action)(runner, timeout) {
            Ok(()) => StepResult::Applied,
            Err(output) => StepResult::Failed(output),
        }
    }
}
