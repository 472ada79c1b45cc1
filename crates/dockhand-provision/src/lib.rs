//! Dockhand Provision - Docker Engine installation library
//!
//! Installs Docker Engine on the local host as an ordered sequence of
//! idempotent steps, with an audit trail of everything that happened.
//!
//! # Architecture
//!
//! - [`platform`]: host identity (`os-release`) and its [`InstallationProfile`]
//! - [`Step`] trait: common interface for all installation steps
//! - [`steps`] module: concrete steps (packages, repositories, files, services, groups)
//! - [`Manifest`]: ordered steps, each required or optional
//! - [`Executor`]: runs a manifest, halting on the first required failure
//! - [`AuditLog`]: timestamped record of the run, mirrored to [`LogSink`]s
//! - [`render`] module: the same manifest as a bash script or cloud-init YAML
//!
//! # Example
//!
//! ```no_run
//! use dockhand_provision::{
//!     AuditLog, DockerConfig, EffectiveUser, Executor, FileSink, Manifest, OsIdentity,
//!     SystemRunner,
//! };
//!
//! let config = DockerConfig::builder().user("chi").build();
//! let identity = OsIdentity::load()?;
//! let mut log = AuditLog::new().with_sink(FileSink::open("/var/log/dockhand.log")?);
//! let runner = SystemRunner::new();
//!
//! let result = Executor::new(&runner, &mut log).provision(&EffectiveUser, &identity, |profile| {
//!     Manifest::docker_install(profile, &config)
//! });
//! assert!(result.succeeded);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod platform;
pub mod privilege;
pub mod render;
pub mod runner;
pub mod steps;

pub use audit::{AuditLog, FileSink, LogEntry, LogSink, Severity};
pub use config::{Channel, DockerConfig, validate_user_name};
pub use error::{CommandError, ProvisionError};
pub use executor::{ExecutionResult, Executor};
pub use manifest::{Manifest, Policy};
pub use platform::{Distro, InstallationProfile, OsIdentity, PackageFamily, resolve};
pub use privilege::{EffectiveUser, PrivilegeCheck};
pub use render::{BashRenderer, CloudInitRenderer, Renderer};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use steps::{Step, StepResult};
