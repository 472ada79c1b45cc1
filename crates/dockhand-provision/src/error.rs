//! Error types for provisioning runs

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Everything that can stop or degrade a provisioning run
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Host identity matches no known installation profile
    #[error("unsupported platform '{id}': no installation profile for this distribution")]
    UnsupportedPlatform { id: String },

    /// Host identity matches a family that is deliberately not handled
    #[error("excluded platform '{id}': {family} distributions are not handled by this installer")]
    ExcludedPlatform { id: String, family: String },

    /// Process lacks administrative privilege
    #[error("insufficient privilege: this command must run as root (try sudo)")]
    InsufficientPrivilege,

    /// A required step failed and the sequence was halted
    #[error("required step '{step}' failed: {output}")]
    RequiredStepFailed { step: String, output: String },

    /// An optional step failed; the sequence continued
    #[error("optional step '{step}' failed: {output}")]
    OptionalStepFailed { step: String, output: String },

    /// The host identity file could not be read
    #[error("cannot read host identity from {}: {source}", path.display())]
    IdentityUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid provisioning configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Template rendering failed
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    /// IO errors from audit sinks and file handling
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// True for failures that end a run before or during execution
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::OptionalStepFailed { .. })
    }
}

/// Failure to run an external command at all (as opposed to a non-zero exit)
#[derive(Error, Debug)]
pub enum CommandError {
    /// The program could not be started
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exceeded its time limit and was terminated
    #[error("'{program}' timed out after {}s and was terminated", limit.as_secs())]
    TimedOut {
        program: String,
        limit: Duration,
        output: String,
    },

    /// Waiting on the child process failed
    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}
