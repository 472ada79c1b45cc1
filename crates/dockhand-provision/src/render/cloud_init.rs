//! Cloud-init YAML renderer

use serde::Serialize;

use super::Renderer;
use crate::Manifest;
use crate::steps::CloudInitFile;

/// Renders a manifest as a `#cloud-config` document
///
/// Files go to `write_files`; every other step becomes `runcmd` entries in
/// manifest order. cloud-init runs `write_files` before `runcmd`, which is
/// what the Docker manifests expect for `daemon.json`.
#[derive(Debug, Clone)]
pub struct CloudInitRenderer {
    final_message: String,
}

impl Default for CloudInitRenderer {
    fn default() -> Self {
        Self {
            final_message: "Docker Engine provisioned after $UPTIME seconds".into(),
        }
    }
}

#[derive(Serialize)]
struct CloudConfig {
    package_update: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    write_files: Vec<CloudInitFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    runcmd: Vec<String>,
    final_message: String,
}

impl CloudInitRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Message cloud-init logs when it is done
    pub fn final_message(mut self, message: impl Into<String>) -> Self {
        self.final_message = message.into();
        self
    }
}

impl Renderer for CloudInitRenderer {
    type Output = String;
    type Error = serde_yaml::Error;

    fn render(&self, manifest: &Manifest) -> Result<String, Self::Error> {
        let mut write_files = vec![];
        let mut runcmd = vec![];

        for planned in &manifest.steps {
            let fragment = planned.step.to_cloud_init();
            write_files.extend(fragment.write_files);
            runcmd.extend(fragment.runcmd);
        }

        let config = CloudConfig {
            package_update: true,
            write_files,
            runcmd,
            final_message: self.final_message.clone(),
        };

        let yaml = serde_yaml::to_string(&config)?;
        Ok(format!("#cloud-config\n{yaml}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DockerConfig;
    use crate::platform::{Distro, InstallationProfile};

    #[test]
    fn test_cloud_init_renderer() {
        let profile = InstallationProfile::new(Distro::Debian).with_codename("bookworm");
        let manifest = Manifest::docker_install(&profile, &DockerConfig::test_config()).unwrap();

        let yaml = CloudInitRenderer::new().render(&manifest).unwrap();

        assert!(yaml.starts_with("#cloud-config\n"));
        assert!(yaml.contains("package_update: true"));
        assert!(yaml.contains("path: /etc/docker/daemon.json"));
        assert!(yaml.contains("usermod -aG docker testuser"));
        assert!(yaml.contains("final_message:"));
        // The daemon config is a file entry, not a heredoc command
        assert!(!yaml.contains("DOCKHAND_EOF"));
    }

    #[test]
    fn test_runcmd_keeps_manifest_order() {
        let profile = InstallationProfile::new(Distro::Ubuntu).with_codename("noble");
        let manifest = Manifest::docker_install(&profile, &DockerConfig::test_config()).unwrap();

        let yaml = CloudInitRenderer::new().final_message("done").render(&manifest).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let runcmd: Vec<&str> = parsed["runcmd"]
            .as_sequence()
            .unwrap()
            .iter()
            .filter_map(serde_yaml::Value::as_str)
            .collect();

        let repo = runcmd.iter().position(|c| c.contains("docker.list")).unwrap();
        let install = runcmd.iter().position(|c| c.contains("docker-ce ")).unwrap();
        assert!(repo < install);
        assert_eq!(parsed["final_message"].as_str(), Some("done"));
    }
}
