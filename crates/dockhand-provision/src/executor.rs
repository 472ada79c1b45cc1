//! Sequential step executor
//!
//! Steps run strictly in manifest order. A failing required step ends the run
//! on the spot; a failing optional step is counted and the run continues.
//! Steps that already ran are never rolled back.

use crate::audit::{AuditLog, LogEntry};
use crate::error::ProvisionError;
use crate::manifest::{Manifest, Policy};
use crate::platform::{InstallationProfile, OsIdentity, resolve};
use crate::privilege::PrivilegeCheck;
use crate::runner::CommandRunner;
use crate::steps::StepResult;

/// Outcome of one executor run
#[derive(Debug)]
pub struct ExecutionResult {
    /// True iff no required step failed and no precondition was violated
    pub succeeded: bool,
    /// Number of failed optional steps
    pub error_count: usize,
    /// Entries recorded during this run, oldest first
    pub log: Vec<LogEntry>,
    /// Steps whose action was invoked
    pub attempted: usize,
    /// Steps found already satisfied
    pub skipped: usize,
    /// Why the run failed, when it did
    pub failure: Option<ProvisionError>,
    /// Failures of optional steps, in order
    pub warnings: Vec<ProvisionError>,
}

impl ExecutionResult {
    fn new() -> Self {
        Self {
            succeeded: true,
            error_count: 0,
            log: vec![],
            attempted: 0,
            skipped: 0,
            failure: None,
            warnings: vec![],
        }
    }

    fn fail(mut self, error: ProvisionError) -> Self {
        self.succeeded = false;
        self.failure = Some(error);
        self
    }
}

/// Runs manifests against a command runner, recording into an audit log
pub struct Executor<'a> {
    runner: &'a dyn CommandRunner,
    log: &'a mut AuditLog,
}

impl<'a> Executor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, log: &'a mut AuditLog) -> Self {
        Self { runner, log }
    }

    /// Full run: privilege guard, profile resolution, then the manifest
    ///
    /// `plan` builds the manifest for the resolved profile. Guard and
    /// resolution failures record one entry and run no steps.
    pub fn provision<F>(
        &mut self,
        guard: &dyn PrivilegeCheck,
        identity: &OsIdentity,
        plan: F,
    ) -> ExecutionResult
    where
        F: FnOnce(&InstallationProfile) -> Result<Manifest, ProvisionError>,
    {
        let start = self.log.len();

        let prepared = check_privilege(guard).and_then(|()| {
            let profile = resolve(identity)?;
            tracing::info!(distro = %profile.distro, codename = ?profile.codename, "resolved installation profile");
            plan(&profile)
        });

        match prepared {
            Ok(manifest) => self.execute(manifest),
            Err(e) => {
                tracing::error!("{e}");
                self.log.error(e.to_string());
                let mut result = ExecutionResult::new().fail(e);
                result.log = self.log.entries()[start..].to_vec();
                result
            }
        }
    }

    /// Run every step of `manifest` in order
    ///
    /// Does not check privilege; see [`Executor::provision`].
    pub fn execute(&mut self, manifest: Manifest) -> ExecutionResult {
        let start = self.log.len();
        let total = manifest.len();
        let mut result = ExecutionResult::new();

        tracing::info!(manifest = %manifest.name, steps = total, "starting run");

        for (index, planned) in manifest.steps.iter().enumerate() {
            let description = planned.description();
            let timeout = manifest.timeout_for(planned);

            self.log.step_started(index + 1, total, description);
            tracing::debug!(step = index + 1, total, description, ?timeout, "running step");

            result.attempted += 1;
            match planned.step.run(self.runner, timeout) {
                StepResult::Applied => self.log.ok(description),
                StepResult::Skipped => {
                    result.skipped += 1;
                    self.log.ok(format!("{description} (already satisfied)"));
                }
                StepResult::Failed(output) => {
                    self.log.error(format!("{description} failed: {output}"));
                    match planned.policy {
                        Policy::Required => {
                            tracing::error!(step = index + 1, description, "required step failed, halting");
                            result = result.fail(ProvisionError::RequiredStepFailed {
                                step: description.to_string(),
                                output,
                            });
                            break;
                        }
                        Policy::Optional => {
                            tracing::warn!(step = index + 1, description, "optional step failed, continuing");
                            result.error_count += 1;
                            result.warnings.push(ProvisionError::OptionalStepFailed {
                                step: description.to_string(),
                                output,
                            });
                        }
                    }
                }
            }
        }

        tracing::info!(
            succeeded = result.succeeded,
            errors = result.error_count,
            attempted = result.attempted,
            "run finished"
        );

        result.log = self.log.entries()[start..].to_vec();
        result
    }
}

fn check_privilege(guard: &dyn PrivilegeCheck) -> Result<(), ProvisionError> {
    if guard.is_privileged() {
        Ok(())
    } else {
        Err(ProvisionError::InsufficientPrivilege)
    }
}
