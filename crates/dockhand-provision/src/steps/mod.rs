//! Installation step definitions
//!
//! Each step implements the [`Step`] trait. It renders to idempotent shell
//! commands and cloud-init fragments, and can run itself on the local host
//! through a [`CommandRunner`].

mod command;
mod directory;
mod file;
mod package;
mod service;
mod user;

pub use command::{FnStep, RunCommand};
pub use directory::{EnsureDirectory, RemovePath};
pub use file::WriteFile;
pub use package::{AptRepository, InstallPackages, RemovePackages};
pub use service::{EnsureService, RestartService, StopService};
pub use user::AddUserToGroup;

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::runner::CommandRunner;

/// Result of running a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// Step executed successfully
    Applied,
    /// Step was already satisfied, skipped
    Skipped,
    /// Step failed
    Failed(String),
}

impl StepResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// A single installation step
///
/// All steps must be:
/// - **Idempotent**: Safe to run multiple times
/// - **Describable**: Have a human-readable description
/// - **Renderable**: Can output both cloud-init YAML and bash
pub trait Step: Send + Sync {
    /// Human-readable description of what this step does
    fn description(&self) -> &str;

    /// Render as cloud-init YAML fragment
    fn to_cloud_init(&self) -> CloudInitFragment {
        CloudInitFragment {
            runcmd: self.to_bash(),
            ..Default::default()
        }
    }

    /// Render as idempotent bash commands
    fn to_bash(&self) -> Vec<String>;

    /// Check command to determine if step is already satisfied.
    ///
    /// If `Some(cmd)` is returned and the command succeeds (exit 0),
    /// the step will be skipped. If `None`, the step always runs.
    fn check_command(&self) -> Option<String>;

    /// Run the step on this host.
    ///
    /// The check command runs first; if it passes nothing else is executed.
    /// Otherwise each command from [`Step::to_bash`] runs in order and the
    /// first non-zero exit fails the step. `timeout` bounds the whole step.
    fn run(&self, runner: &dyn CommandRunner, timeout: Option<Duration>) -> StepResult {
        let deadline = timeout.map(|t| Instant::now() + t);

        if let Some(check) = self.check_command() {
            match runner.shell(&check, remaining(deadline)) {
                Ok(out) if out.success() => return StepResult::Skipped,
                Ok(_) => {}
                Err(e) => tracing::debug!("check for '{}' did not complete: {e}", self.description()),
            }
        }

        for cmd in self.to_bash() {
            let Some(left) = remaining_or_expired(deadline) else {
                return StepResult::Failed("step time limit reached".into());
            };
            match runner.shell(&cmd, left) {
                Ok(out) if out.success() => {}
                Ok(out) => {
                    let status = out
                        .code
                        .map_or_else(|| "killed by signal".to_string(), |c| format!("exit status {c}"));
                    return StepResult::Failed(diagnostic(&status, &out.output));
                }
                Err(e) => {
                    let captured = match &e {
                        crate::error::CommandError::TimedOut { output, .. } => output.as_str(),
                        _ => "",
                    };
                    return StepResult::Failed(diagnostic(&e.to_string(), captured));
                }
            }
        }

        StepResult::Applied
    }
}

/// Time left until `deadline`, or `None` when there is no deadline
fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Like [`remaining`], but `None` when the deadline has already passed
#[allow(clippy::option_option)]
fn remaining_or_expired(deadline: Option<Instant>) -> Option<Option<Duration>> {
    match remaining(deadline) {
        Some(left) if left.is_zero() => None,
        left => Some(left),
    }
}

/// Status line followed by captured output, if any
fn diagnostic(status: &str, output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        status.to_string()
    } else {
        format!("{status}\n{output}")
    }
}

/// Fragment that can be merged into a cloud-init config
#[derive(Debug, Default, Clone, Serialize)]
pub struct CloudInitFragment {
    /// Files to write
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write_files: Vec<CloudInitFile>,

    /// Commands to run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runcmd: Vec<String>,
}

/// A file to write in cloud-init format
#[derive(Debug, Clone, Serialize)]
pub struct CloudInitFile {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use super::*;
    use crate::error::CommandError;
    use crate::runner::CommandOutput;

    /// Replays canned outputs and records every script it was asked to run
    #[derive(Default)]
    struct Scripted {
        outputs: RefCell<VecDeque<Result<CommandOutput, CommandError>>>,
        seen: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(outputs: impl IntoIterator<Item = Result<CommandOutput, CommandError>>) -> Self {
            Self {
                outputs: RefCell::new(outputs.into_iter().collect()),
                seen: RefCell::default(),
            }
        }
    }

    impl CommandRunner for Scripted {
        fn run(
            &self,
            _program: &str,
            args: &[&str],
            _timeout: Option<Duration>,
        ) -> Result<CommandOutput, CommandError> {
            self.seen.borrow_mut().push(args.last().copied().unwrap_or_default().to_string());
            self.outputs
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::ok("")))
        }
    }

    #[test]
    fn test_satisfied_check_skips_commands() {
        let step = RunCommand::new("Create directory", "mkdir /test").unless("[ -d /test ]");
        let runner = Scripted::new([Ok(CommandOutput::ok(""))]);

        assert_eq!(step.run(&runner, None), StepResult::Skipped);
        assert_eq!(runner.seen.borrow().as_slice(), ["[ -d /test ]"]);
    }

    #[test]
    fn test_unsatisfied_check_runs_commands() {
        let step = EnsureDirectory::new("/srv/docker").with_permissions("0710");
        let runner = Scripted::new([Ok(CommandOutput::failed(1, ""))]);

        assert_eq!(step.run(&runner, None), StepResult::Applied);
        let seen = runner.seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1], "mkdir -p /srv/docker");
        assert_eq!(seen[2], "chmod 0710 /srv/docker");
    }

    #[test]
    fn test_first_failing_command_stops_step() {
        let step = EnsureDirectory::new("/srv/docker")
            .with_permissions("0710")
            .with_owner("root:root");
        let runner = Scripted::new([
            Ok(CommandOutput::failed(1, "")),
            Ok(CommandOutput::failed(1, "mkdir: permission denied")),
        ]);

        let result = step.run(&runner, None);
        assert_eq!(
            result,
            StepResult::Failed("exit status 1\nmkdir: permission denied".into())
        );
        assert_eq!(runner.seen.borrow().len(), 2);
    }

    #[test]
    fn test_timeout_is_reported_with_output() {
        let step = RunCommand::new("Hang", "sleep 600");
        let runner = Scripted::new([Err(CommandError::TimedOut {
            program: "sh".into(),
            limit: Duration::from_secs(1),
            output: "partial".into(),
        })]);

        let StepResult::Failed(msg) = step.run(&runner, Some(Duration::from_secs(1))) else {
            panic!("expected failure");
        };
        assert!(msg.contains("timed out"));
        assert!(msg.contains("partial"));
    }

    #[test]
    fn test_expired_deadline_fails_without_running() {
        let step = RunCommand::new("Anything", "true");
        let runner = Scripted::default();

        let result = step.run(&runner, Some(Duration::ZERO));
        assert!(result.is_failure());
        assert!(runner.seen.borrow().is_empty());
    }
}
