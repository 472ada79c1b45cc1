//! Configuration types for Docker provisioning

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ProvisionError;

const DAEMON_TEMPLATE: &str = include_str!("../templates/daemon.json.tera");

/// Default Docker data directory
pub const DEFAULT_DATA_ROOT: &str = "/var/lib/docker";

/// Names `useradd` accepts with its default `NAME_REGEX`
const USER_NAME_PATTERN: &str = r"^[a-z_][a-z0-9_.-]{0,31}$";
const PACKAGE_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._+-]*$";
/// json-file `max-size`: a number with an optional k, m or g unit
const LOG_SIZE_PATTERN: &str = r"^[0-9]+[kmg]?$";

fn matches(pattern: &str, value: &str) -> Result<bool, ProvisionError> {
    regex::Regex::new(pattern)
        .map(|re| re.is_match(value))
        .map_err(|e| ProvisionError::Config(e.to_string()))
}

/// Reject user names `useradd` would refuse, and anything unsafe in a shell
pub fn validate_user_name(name: &str) -> Result<(), ProvisionError> {
    if matches(USER_NAME_PATTERN, name)? {
        Ok(())
    } else {
        Err(ProvisionError::Config(format!(
            "'{name}' is not a valid user name (lowercase letters, digits, '_', '-', '.'; at most 32)"
        )))
    }
}

/// Docker release channel of the vendor apt repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Channel {
    #[default]
    Stable,
    Test,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Ok(Self::Stable),
            "test" => Ok(Self::Test),
            other => Err(ProvisionError::Config(format!(
                "unknown channel '{other}' (expected stable or test)"
            ))),
        }
    }
}

/// Configuration for a Docker installation
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// User to add to the `docker` group
    pub user: Option<String>,
    /// Docker data directory (`data-root` in daemon.json)
    pub data_root: String,
    /// Repository channel
    pub channel: Channel,
    /// json-file log rotation size (e.g. "10m")
    pub log_max_size: String,
    /// Number of rotated log files kept
    pub log_max_file: u32,
    /// Keep containers running while the daemon restarts
    pub live_restore: bool,
    /// Additional packages installed alongside Docker
    pub extra_packages: Vec<String>,
    /// Run `docker version` after installing
    pub verify: bool,
    /// On uninstall, also delete the data directory and /etc/docker
    pub purge_data: bool,
    /// Default per-step time limit
    pub step_timeout: Option<Duration>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            user: None,
            data_root: DEFAULT_DATA_ROOT.into(),
            channel: Channel::Stable,
            log_max_size: "10m".into(),
            log_max_file: 3,
            live_restore: false,
            extra_packages: vec![],
            verify: true,
            purge_data: false,
            step_timeout: None,
        }
    }
}

impl DockerConfig {
    /// Create a new config builder
    pub fn builder() -> DockerConfigBuilder {
        DockerConfigBuilder::default()
    }

    /// Reject values that would produce a dangerous or malformed manifest
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let root = self.data_root.trim_end_matches('/');
        if !self.data_root.starts_with('/') {
            return Err(ProvisionError::Config(format!(
                "data root '{}' must be an absolute path",
                self.data_root
            )));
        }
        if root.is_empty() {
            return Err(ProvisionError::Config("data root cannot be '/'".into()));
        }
        if self
            .data_root
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | '$' | '`'))
        {
            return Err(ProvisionError::Config(format!(
                "data root '{}' contains characters that are not allowed",
                self.data_root
            )));
        }
        if let Some(user) = &self.user {
            validate_user_name(user)?;
        }
        for package in &self.extra_packages {
            if !matches(PACKAGE_PATTERN, package)? {
                return Err(ProvisionError::Config(format!(
                    "'{package}' is not a valid package name"
                )));
            }
        }
        if !matches(LOG_SIZE_PATTERN, &self.log_max_size)? {
            return Err(ProvisionError::Config(format!(
                "log max size '{}' must be a number with an optional k, m or g suffix",
                self.log_max_size
            )));
        }
        if self.log_max_file == 0 {
            return Err(ProvisionError::Config("log_max_file must be at least 1".into()));
        }
        Ok(())
    }

    /// Render `/etc/docker/daemon.json`
    pub fn daemon_json(&self) -> Result<String, ProvisionError> {
        let mut context = tera::Context::new();
        context.insert("data_root", &self.data_root);
        context.insert("log_max_size", &self.log_max_size);
        context.insert("log_max_file", &self.log_max_file);
        context.insert("live_restore", &self.live_restore);

        Ok(tera::Tera::one_off(DAEMON_TEMPLATE, &context, false)?)
    }

    /// Create a test configuration for unit tests
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            user: Some("testuser".into()),
            data_root: "/srv/docker".into(),
            ..Default::default()
        }
    }
}

/// Builder for `DockerConfig`
#[derive(Debug, Clone, Default)]
pub struct DockerConfigBuilder {
    config: DockerConfig,
}

impl DockerConfigBuilder {
    /// Set the user added to the docker group
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = Some(user.into());
        self
    }

    /// Set the data directory
    pub fn data_root(mut self, path: impl Into<String>) -> Self {
        self.config.data_root = path.into();
        self
    }

    /// Set the repository channel
    pub fn channel(mut self, channel: Channel) -> Self {
        self.config.channel = channel;
        self
    }

    /// Set log rotation
    pub fn log_rotation(mut self, max_size: impl Into<String>, max_file: u32) -> Self {
        self.config.log_max_size = max_size.into();
        self.config.log_max_file = max_file;
        self
    }

    /// Enable live-restore
    pub fn live_restore(mut self, enabled: bool) -> Self {
        self.config.live_restore = enabled;
        self
    }

    /// Add extra packages
    pub fn extra_packages(mut self, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.extra_packages = packages.into_iter().map(Into::into).collect();
        self
    }

    /// Set whether to verify the engine after install
    pub fn verify(mut self, verify: bool) -> Self {
        self.config.verify = verify;
        self
    }

    /// Set whether uninstall deletes data
    pub fn purge_data(mut self, purge: bool) -> Self {
        self.config.purge_data = purge;
        self
    }

    /// Set the default per-step time limit
    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.config.step_timeout = Some(timeout);
        self
    }

    /// Build the configuration
    pub fn build(self) -> DockerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_json_contains_settings() {
        let config = DockerConfig::builder()
            .data_root("/srv/docker")
            .log_rotation("50m", 5)
            .build();

        let json = config.daemon_json().unwrap();
        assert!(json.contains(r#""data-root": "/srv/docker""#));
        assert!(json.contains(r#""max-size": "50m""#));
        assert!(json.contains(r#""max-file": "5""#));
        assert!(!json.contains("live-restore"));
    }

    #[test]
    fn test_daemon_json_live_restore() {
        let config = DockerConfig::builder().live_restore(true).build();
        let json = config.daemon_json().unwrap();
        assert!(json.contains(r#""live-restore": true"#));
    }

    #[test]
    fn test_validate_rejects_bad_data_roots() {
        for bad in ["relative/path", "/", "///", "/srv/do cker", "/srv/$(reboot)"] {
            let config = DockerConfig::builder().data_root(bad).build();
            assert!(config.validate().is_err(), "{bad} should be rejected");
        }
        assert!(DockerConfig::test_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_shell_in_user() {
        let too_long = "a".repeat(33);
        for bad in ["", "-rf", "bob;reboot", "a b", "Admin", "1abc", too_long.as_str()] {
            let config = DockerConfig::builder().user(bad).build();
            assert!(config.validate().is_err(), "{bad:?} should be rejected");
        }
        for good in ["first.last", "_svc", "deploy-bot"] {
            assert!(DockerConfig::builder().user(good).build().validate().is_ok(), "{good}");
        }
    }

    #[test]
    fn test_validate_rejects_bad_package_names() {
        for bad in ["", "-y", "curl;reboot", "pkg name", "$(id)"] {
            let config = DockerConfig::builder().extra_packages([bad]).build();
            assert!(config.validate().is_err(), "{bad:?} should be rejected");
        }
        let config = DockerConfig::builder()
            .extra_packages(["git", "libstdc++6", "python3.11", "docker-ce-rootless-extras"])
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_log_size() {
        for bad in ["", "10M", "10mb", "m", "1\"\n", "-5m"] {
            let config = DockerConfig::builder().log_rotation(bad, 3).build();
            assert!(config.validate().is_err(), "{bad:?} should be rejected");
        }
        for good in ["100", "512k", "10m", "1g"] {
            assert!(DockerConfig::builder().log_rotation(good, 3).build().validate().is_ok(), "{good}");
        }
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("Stable".parse::<Channel>().unwrap(), Channel::Stable);
        assert_eq!("test".parse::<Channel>().unwrap(), Channel::Test);
        assert!("nightly".parse::<Channel>().is_err());
    }
}
