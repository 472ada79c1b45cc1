//! Service management steps (systemd and OpenRC)

use super::Step;
use crate::platform::ServiceManager;

/// Ensure a service is enabled and/or started
#[derive(Debug, Clone)]
pub struct EnsureService {
    /// Service name
    pub name: String,
    /// Init system
    pub manager: ServiceManager,
    /// Whether to enable the service
    pub enabled: bool,
    /// Whether to start the service
    pub started: bool,
    /// Description
    description: String,
}

impl EnsureService {
    /// Create a new systemd service step (enabled and started by default)
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let description = format!("Enable and start {name} service");
        Self {
            name,
            manager: ServiceManager::Systemd,
            enabled: true,
            started: true,
            description,
        }
    }

    /// Use a different init system
    pub fn with_manager(mut self, manager: ServiceManager) -> Self {
        self.manager = manager;
        self
    }

    /// Set whether the service should be enabled
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set whether the service should be started
    pub fn started(mut self, started: bool) -> Self {
        self.started = started;
        self
    }

    fn is_enabled(&self) -> String {
        match self.manager {
            ServiceManager::Systemd => format!("systemctl is-enabled {} >/dev/null 2>&1", self.name),
            ServiceManager::OpenRc => format!("rc-update show default | grep -qw {}", self.name),
        }
    }

    fn is_active(&self) -> String {
        match self.manager {
            ServiceManager::Systemd => format!("systemctl is-active {} >/dev/null 2>&1", self.name),
            ServiceManager::OpenRc => format!("rc-service {} status >/dev/null 2>&1", self.name),
        }
    }
}

impl Step for EnsureService {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        let mut cmds = vec![];

        if self.enabled {
            let enable = match self.manager {
                ServiceManager::Systemd => format!("systemctl enable {}", self.name),
                ServiceManager::OpenRc => format!("rc-update add {} default", self.name),
            };
            cmds.push(format!("{} || {enable}", self.is_enabled()));
        }

        if self.started {
            let start = match self.manager {
                ServiceManager::Systemd => format!("systemctl start {}", self.name),
                ServiceManager::OpenRc => format!("rc-service {} start", self.name),
            };
            cmds.push(format!("{} || {start}", self.is_active()));
        }

        cmds
    }

    fn check_command(&self) -> Option<String> {
        match (self.enabled, self.started) {
            (true, true) => Some(format!("{} && {}", self.is_enabled(), self.is_active())),
            (false, true) => Some(self.is_active()),
            (true, false) => Some(self.is_enabled()),
            (false, false) => None,
        }
    }
}

/// Restart a running service after its configuration changed
///
/// The change is signalled by a marker file another step touches. The step
/// is skipped while the marker is absent; a stopped service is left alone.
/// The marker is removed once the restart succeeded.
#[derive(Debug, Clone)]
pub struct RestartService {
    /// Service name
    pub name: String,
    /// Init system
    pub manager: ServiceManager,
    /// Marker file whose presence requests the restart
    pub marker: String,
    /// Description
    description: String,
}

impl RestartService {
    pub fn new(name: impl Into<String>, marker: impl Into<String>) -> Self {
        let name = name.into();
        let description = format!("Restart {name} service if its configuration changed");
        Self {
            name,
            manager: ServiceManager::Systemd,
            marker: marker.into(),
            description,
        }
    }

    /// Use a different init system
    pub fn with_manager(mut self, manager: ServiceManager) -> Self {
        self.manager = manager;
        self
    }
}

impl Step for RestartService {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        let (active, restart) = match self.manager {
            ServiceManager::Systemd => (
                format!("systemctl is-active {} >/dev/null 2>&1", self.name),
                format!("systemctl restart {}", self.name),
            ),
            ServiceManager::OpenRc => (
                format!("rc-service {} status >/dev/null 2>&1", self.name),
                format!("rc-service {} restart", self.name),
            ),
        };
        vec![
            format!("if [ -e '{}' ] && {active}; then {restart}; fi", self.marker),
            format!("rm -f '{}'", self.marker),
        ]
    }

    fn check_command(&self) -> Option<String> {
        Some(format!("[ ! -e '{}' ]", self.marker))
    }
}

/// Stop and disable a service
#[derive(Debug, Clone)]
pub struct StopService {
    /// Service names, stopped in order
    pub names: Vec<String>,
    /// Init system
    pub manager: ServiceManager,
    /// Description
    description: String,
}

impl StopService {
    pub fn new(manager: ServiceManager, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let description = format!("Stop and disable {}", names.join(", "));
        Self {
            names,
            manager,
            description,
        }
    }
}

impl Step for StopService {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        self.names
            .iter()
            .map(|name| match self.manager {
                ServiceManager::Systemd => format!(
                    "if systemctl cat {name} >/dev/null 2>&1; then \
                     systemctl disable --now {name}; fi"
                ),
                ServiceManager::OpenRc => format!(
                    "if [ -e /etc/init.d/{name} ]; then \
                     rc-service {name} stop; rc-update del {name} default; fi"
                ),
            })
            .collect()
    }

    fn check_command(&self) -> Option<String> {
        let checks: Vec<String> = self
            .names
            .iter()
            .map(|name| match self.manager {
                ServiceManager::Systemd => format!(
                    "! systemctl is-active {name} >/dev/null 2>&1 && \
                     ! systemctl is-enabled {name} >/dev/null 2>&1"
                ),
                ServiceManager::OpenRc => format!("[ ! -e /etc/init.d/{name} ]"),
            })
            .collect();
        (!checks.is_empty()).then(|| checks.join(" && "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_service_idempotent() {
        let step = EnsureService::new("docker");
        let bash = step.to_bash();

        assert_eq!(bash.len(), 2);
        assert!(bash[0].contains("systemctl is-enabled docker"));
        assert!(bash[0].ends_with("|| systemctl enable docker"));
        assert!(bash[1].ends_with("|| systemctl start docker"));
        assert!(step.check_command().unwrap().contains("systemctl is-active docker"));
    }

    #[test]
    fn test_openrc_service() {
        let step = EnsureService::new("docker").with_manager(ServiceManager::OpenRc);
        let bash = step.to_bash();

        assert!(bash[0].ends_with("rc-update add docker default"));
        assert!(bash[1].ends_with("rc-service docker start"));
    }

    #[test]
    fn test_disabled_and_stopped_has_no_check() {
        let step = EnsureService::new("docker").enabled(false).started(false);
        assert!(step.to_bash().is_empty());
        assert!(step.check_command().is_none());
    }

    #[test]
    fn test_restart_service_waits_for_marker() {
        let step = RestartService::new("docker", "/run/changed");
        let bash = step.to_bash();

        assert_eq!(step.check_command().as_deref(), Some("[ ! -e '/run/changed' ]"));
        assert_eq!(
            bash[0],
            "if [ -e '/run/changed' ] && systemctl is-active docker >/dev/null 2>&1; \
             then systemctl restart docker; fi"
        );
        assert_eq!(bash[1], "rm -f '/run/changed'");

        let openrc = RestartService::new("docker", "/run/changed").with_manager(ServiceManager::OpenRc);
        assert!(openrc.to_bash()[0].ends_with("then rc-service docker restart; fi"));
    }

    #[test]
    fn test_stop_service() {
        let step = StopService::new(ServiceManager::Systemd, ["docker", "containerd"]);
        assert_eq!(step.description(), "Stop and disable docker, containerd");
        assert_eq!(step.to_bash().len(), 2);
        assert!(step.to_bash()[0].contains("systemctl disable --now docker"));
        assert!(step.check_command().unwrap().contains("! systemctl is-active containerd"));
    }
}
