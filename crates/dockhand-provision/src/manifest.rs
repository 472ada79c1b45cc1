//! Installation manifest - ordered step sequence with failure policies

use std::time::Duration;

use crate::config::DockerConfig;
use crate::error::ProvisionError;
use crate::platform::{InstallationProfile, PackageFamily, ServiceManager};
use crate::steps::{
    AddUserToGroup, AptRepository, EnsureDirectory, EnsureService, InstallPackages, RemovePackages,
    RemovePath, RestartService, RunCommand, Step, StopService, WriteFile,
};

/// Left behind when `daemon.json` was rewritten and the engine still has to
/// pick it up
pub const DAEMON_CONFIG_CHANGED: &str = "/run/dockhand-daemon-json.changed";

/// What a step failure does to the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Failure halts the sequence
    Required,
    /// Failure is counted and the sequence continues
    Optional,
}

/// A step together with its failure policy and time limit
pub struct PlannedStep {
    pub step: Box<dyn Step>,
    pub policy: Policy,
    /// Overrides the manifest's default time limit
    pub timeout: Option<Duration>,
}

impl PlannedStep {
    pub fn description(&self) -> &str {
        self.step.description()
    }

    pub fn is_required(&self) -> bool {
        self.policy == Policy::Required
    }
}

impl std::fmt::Debug for PlannedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedStep")
            .field("description", &self.description())
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Ordered list of steps for one provisioning run
#[derive(Debug)]
pub struct Manifest {
    /// Short name used in rendered output
    pub name: String,
    /// Default per-step time limit
    pub step_timeout: Option<Duration>,
    /// Ordered list of installation steps
    pub steps: Vec<PlannedStep>,
}

impl Manifest {
    /// Create a new empty manifest
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_timeout: None,
            steps: vec![],
        }
    }

    /// Set the default per-step time limit
    pub fn with_step_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Add a required step
    pub fn add_step<S: Step + 'static>(&mut self, step: S) {
        self.push(step, Policy::Required);
    }

    /// Add an optional step
    pub fn add_optional<S: Step + 'static>(&mut self, step: S) {
        self.push(step, Policy::Optional);
    }

    /// Add a step with an explicit policy
    pub fn push<S: Step + 'static>(&mut self, step: S, policy: Policy) {
        self.steps.push(PlannedStep {
            step: Box::new(step),
            policy,
            timeout: None,
        });
    }

    /// Add a required step fluently
    pub fn with_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.add_step(step);
        self
    }

    /// Add an optional step fluently
    pub fn with_optional<S: Step + 'static>(mut self, step: S) -> Self {
        self.add_optional(step);
        self
    }

    /// Set the time limit of the most recently added step
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.timeout = Some(timeout);
        }
        self
    }

    /// Time limit that applies to `step`
    pub fn timeout_for(&self, step: &PlannedStep) -> Option<Duration> {
        step.timeout.or(self.step_timeout)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Create the Docker Engine installation manifest
    ///
    /// Sequence:
    /// - Package index refresh and prerequisites (apt only)
    /// - Removal of conflicting distribution packages (apt only, optional)
    /// - Vendor signing key and source list (apt only)
    /// - Data directory and `daemon.json`, written before the engine first starts
    /// - Restart of an already running engine whose `daemon.json` changed
    /// - Docker packages
    /// - Service enable/start
    /// - Group membership for the chosen user (optional)
    /// - Engine check (optional)
    pub fn docker_install(
        profile: &InstallationProfile,
        config: &DockerConfig,
    ) -> Result<Self, ProvisionError> {
        config.validate()?;

        let family = profile.family();
        let mut manifest =
            Self::new(format!("docker-install-{}", profile.os_id())).with_step_timeout(config.step_timeout);

        // =========================================================
        // Phase 1: Package index and prerequisites
        // =========================================================
        manifest.add_step(RunCommand::new(
            "Refresh package index",
            family.refresh_command(),
        ));

        let prerequisites = profile.prerequisites();
        if !prerequisites.is_empty() {
            manifest.add_step(
                InstallPackages::new(family, prerequisites)
                    .with_description("Install prerequisites"),
            );
        }

        let conflicting = profile.conflicting_packages();
        if !conflicting.is_empty() {
            manifest.add_optional(
                RemovePackages::new(family, conflicting)
                    .with_description("Remove conflicting packages"),
            );
        }

        // =========================================================
        // Phase 2: Vendor repository
        // =========================================================
        if let Some(repo) = AptRepository::docker(profile, config.channel) {
            manifest.add_step(
                EnsureDirectory::new("/etc/apt/keyrings")
                    .with_permissions("0755")
                    .with_description("Create apt keyring directory"),
            );
            manifest.add_step(repo);
        }

        // =========================================================
        // Phase 3: Data directory and daemon configuration
        // =========================================================
        manifest.add_step(
            EnsureDirectory::new(&config.data_root)
                .with_permissions("0710")
                .with_owner("root:root")
                .with_description("Create Docker data directory"),
        );
        manifest.add_step(
            WriteFile::new("/etc/docker/daemon.json", config.daemon_json()?)
                .with_permissions("0644")
                .with_owner("root:root")
                .with_change_marker(DAEMON_CONFIG_CHANGED),
        );
        manifest.add_step(
            RestartService::new("docker", DAEMON_CONFIG_CHANGED).with_manager(profile.service_manager()),
        );

        // =========================================================
        // Phase 4: Packages
        // =========================================================
        let mut packages = profile.docker_packages();
        packages.extend(config.extra_packages.iter().cloned());
        manifest.add_step(
            InstallPackages::new(family, packages).with_description("Install Docker packages"),
        );

        // =========================================================
        // Phase 5: Service
        // =========================================================
        manifest.add_step(EnsureService::new("docker").with_manager(profile.service_manager()));

        // =========================================================
        // Phase 6: Access and verification
        // =========================================================
        if let Some(user) = &config.user {
            manifest.add_optional(AddUserToGroup::docker(user).for_family(family));
        }

        if config.verify {
            manifest.add_optional(RunCommand::verify_docker());
        }

        Ok(manifest)
    }

    /// Create the Docker Engine removal manifest
    ///
    /// Packages are purged; the data directory and `/etc/docker` are only
    /// deleted when `purge_data` is set.
    pub fn docker_uninstall(
        profile: &InstallationProfile,
        config: &DockerConfig,
    ) -> Result<Self, ProvisionError> {
        config.validate()?;

        let family = profile.family();
        let mut manifest = Self::new(format!("docker-uninstall-{}", profile.os_id()))
            .with_step_timeout(config.step_timeout);

        let services: &[&str] = match profile.service_manager() {
            ServiceManager::Systemd => &["docker.socket", "docker", "containerd"],
            ServiceManager::OpenRc => &["docker", "containerd"],
        };
        manifest.add_optional(StopService::new(profile.service_manager(), services.iter().copied()));

        let mut packages = profile.docker_packages();
        packages.extend(config.extra_packages.iter().cloned());
        manifest.add_step(
            RemovePackages::new(family, packages)
                .purge(true)
                .with_description("Remove Docker packages"),
        );

        if family == PackageFamily::Apt {
            manifest.add_optional(RemovePath::new("/etc/apt/sources.list.d/docker.list"));
            manifest.add_optional(RemovePath::new("/etc/apt/keyrings/docker.gpg"));
        }

        if config.purge_data {
            manifest.add_optional(RemovePath::new(config.data_root.trim_end_matches('/')));
            manifest.add_optional(RemovePath::new("/var/lib/containerd"));
            manifest.add_optional(RemovePath::new("/etc/docker"));
        }

        Ok(manifest)
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new("dockhand")
    }
}
