//! Config file and layered settings resolution
//!
//! Priority: CLI args > env vars > config file > defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dockhand_provision::{Channel, DockerConfig};
use serde::{Deserialize, Serialize};

use crate::prompt::validate_username;

/// Audit log location when nothing else is configured
pub const DEFAULT_LOG_FILE: &str = "/var/log/dockhand.log";

/// Per-step limit when nothing else is configured
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 900;

/// Configuration file structure
/// Path: ~/.config/dockhand/config.toml (XDG-style)
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub docker: DockerSection,
    #[serde(default)]
    pub user: UserSection,
    #[serde(default)]
    pub install: InstallSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DockerSection {
    pub data_root: Option<String>,
    pub channel: Option<String>,
    pub log_max_size: Option<String>,
    pub log_max_file: Option<u32>,
    pub live_restore: Option<bool>,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserSection {
    pub name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InstallSection {
    pub step_timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub verify: Option<bool>,
}

/// Settings given on the command line
#[derive(Debug, Default)]
pub struct Overrides {
    pub user: Option<String>,
    pub no_user: bool,
    pub data_root: Option<String>,
    pub channel: Option<Channel>,
    pub timeout_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub purge: bool,
}

/// Always ~/.config/dockhand/config.toml unless `XDG_CONFIG_HOME` is set
pub fn config_path() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dockhand")
        .join("config.toml")
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    if path.exists() {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
    } else {
        tracing::debug!("no config file at {}, using defaults", path.display());
        Ok(Config::default())
    }
}

/// Merge CLI overrides, environment and config file into a [`DockerConfig`]
///
/// `env` looks up environment variables; `main` passes `std::env::var`.
pub fn resolve_docker_config(
    cli: &Overrides,
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> Result<DockerConfig> {
    let user = if cli.no_user {
        None
    } else {
        cli.user
            .clone()
            .or_else(|| env("DOCKHAND_USER"))
            .or_else(|| config.user.name.clone())
    };
    if let Some(name) = &user {
        validate_username(name)?;
    }

    let data_root = cli
        .data_root
        .clone()
        .or_else(|| env("DOCKHAND_DATA_ROOT"))
        .or_else(|| config.docker.data_root.clone());

    let channel = match (cli.channel, &config.docker.channel) {
        (Some(channel), _) => channel,
        (None, Some(name)) => name
            .parse()
            .with_context(|| format!("Invalid [docker] channel '{name}'"))?,
        (None, None) => Channel::Stable,
    };

    let timeout = cli
        .timeout_secs
        .or(config.install.step_timeout_secs)
        .unwrap_or(DEFAULT_STEP_TIMEOUT_SECS);

    let defaults = DockerConfig::default();
    let mut builder = DockerConfig::builder()
        .channel(channel)
        .log_rotation(
            config
                .docker
                .log_max_size
                .clone()
                .unwrap_or(defaults.log_max_size),
            config.docker.log_max_file.unwrap_or(defaults.log_max_file),
        )
        .live_restore(config.docker.live_restore.unwrap_or(defaults.live_restore))
        .extra_packages(config.docker.packages.iter().cloned())
        .verify(config.install.verify.unwrap_or(defaults.verify))
        .purge_data(cli.purge);

    if timeout > 0 {
        builder = builder.step_timeout(Duration::from_secs(timeout));
    }
    if let Some(user) = user {
        builder = builder.user(user);
    }
    if let Some(root) = data_root {
        builder = builder.data_root(root);
    }

    let docker = builder.build();
    docker.validate()?;
    Ok(docker)
}

/// Where the audit log goes
pub fn resolve_log_file(
    cli: &Overrides,
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    cli.log_file
        .clone()
        .or_else(|| env("DOCKHAND_LOG_FILE").map(PathBuf::from))
        .or_else(|| config.install.log_file.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn parse(toml: &str) -> Config {
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let docker = resolve_docker_config(&Overrides::default(), &Config::default(), no_env).unwrap();

        assert_eq!(docker.user, None);
        assert_eq!(docker.data_root, "/var/lib/docker");
        assert_eq!(docker.channel, Channel::Stable);
        assert_eq!(docker.step_timeout, Some(Duration::from_secs(900)));
        assert!(docker.verify);
    }

    #[test]
    fn test_cli_beats_env_beats_file() {
        let config = parse(
            r#"
            [user]
            name = "fromfile"

            [docker]
            data_root = "/file/docker"
            "#,
        );
        let env: HashMap<&str, &str> = [("DOCKHAND_USER", "fromenv"), ("DOCKHAND_DATA_ROOT", "/env/docker")].into();
        let lookup = |k: &str| env.get(k).map(|v| (*v).to_string());

        let docker = resolve_docker_config(&Overrides::default(), &config, lookup).unwrap();
        assert_eq!(docker.user.as_deref(), Some("fromenv"));
        assert_eq!(docker.data_root, "/env/docker");

        let cli = Overrides {
            user: Some("fromcli".into()),
            ..Default::default()
        };
        let docker = resolve_docker_config(&cli, &config, lookup).unwrap();
        assert_eq!(docker.user.as_deref(), Some("fromcli"));

        let docker = resolve_docker_config(&Overrides::default(), &config, no_env).unwrap();
        assert_eq!(docker.user.as_deref(), Some("fromfile"));
        assert_eq!(docker.data_root, "/file/docker");
    }

    #[test]
    fn test_no_user_wins() {
        let config = parse("[user]\nname = \"alice\"\n");
        let cli = Overrides {
            no_user: true,
            ..Default::default()
        };
        let docker = resolve_docker_config(&cli, &config, no_env).unwrap();
        assert_eq!(docker.user, None);
    }

    #[test]
    fn test_file_sections() {
        let config = parse(
            r#"
            [docker]
            channel = "test"
            log_max_size = "100m"
            log_max_file = 7
            live_restore = true
            packages = ["docker-buildx"]

            [install]
            step_timeout_secs = 0
            verify = false
            "#,
        );
        let docker = resolve_docker_config(&Overrides::default(), &config, no_env).unwrap();

        assert_eq!(docker.channel, Channel::Test);
        assert_eq!(docker.log_max_size, "100m");
        assert_eq!(docker.log_max_file, 7);
        assert!(docker.live_restore);
        assert_eq!(docker.extra_packages, ["docker-buildx"]);
        assert_eq!(docker.step_timeout, None);
        assert!(!docker.verify);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let config = parse("[docker]\nchannel = \"nightly\"\n");
        assert!(resolve_docker_config(&Overrides::default(), &config, no_env).is_err());

        let cli = Overrides {
            user: Some("Robert'); DROP".into()),
            ..Default::default()
        };
        assert!(resolve_docker_config(&cli, &Config::default(), no_env).is_err());

        let cli = Overrides {
            data_root: Some("docker".into()),
            ..Default::default()
        };
        assert!(resolve_docker_config(&cli, &Config::default(), no_env).is_err());
    }

    #[test]
    fn test_log_file_resolution() {
        assert_eq!(
            resolve_log_file(&Overrides::default(), &Config::default(), no_env),
            PathBuf::from(DEFAULT_LOG_FILE)
        );

        let config = parse("[install]\nlog_file = \"/tmp/file.log\"\n");
        assert_eq!(
            resolve_log_file(&Overrides::default(), &config, |_| Some("/tmp/env.log".into())),
            PathBuf::from("/tmp/env.log")
        );
    }

    #[test]
    fn test_load_missing_and_present_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(load_config(Some(&path)).unwrap().user.name.is_none());

        fs::write(&path, "[user]\nname = \"chi\"\n").unwrap();
        assert_eq!(load_config(Some(&path)).unwrap().user.name.as_deref(), Some("chi"));

        fs::write(&path, "[user\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
