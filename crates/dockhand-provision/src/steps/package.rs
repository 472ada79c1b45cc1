//! Package installation steps

use super::Step;
use crate::config::Channel;
use crate::platform::{InstallationProfile, PackageFamily};

/// Vendor apt repository: signing key plus source list
#[derive(Debug, Clone)]
pub struct AptRepository {
    /// URL to the GPG key
    pub key_url: String,
    /// APT repository line (e.g., "deb [arch=amd64] https://... noble stable")
    pub repo_line: String,
    /// Path to store the keyring (e.g., "/etc/apt/keyrings/docker.gpg")
    pub keyring_path: String,
    /// Source list file
    pub list_path: String,
    /// Description
    description: String,
}

impl AptRepository {
    /// Docker official repository for an apt-based profile
    pub fn docker(profile: &InstallationProfile, channel: Channel) -> Option<Self> {
        let base = profile.repository_url()?;
        let keyring_path = "/etc/apt/keyrings/docker.gpg".to_string();
        Some(Self {
            key_url: format!("{base}/gpg"),
            repo_line: format!(
                "deb [arch=$(dpkg --print-architecture) signed-by={keyring_path}] {base} {} {channel}",
                profile.codename_expr()
            ),
            keyring_path,
            list_path: "/etc/apt/sources.list.d/docker.list".into(),
            description: "Add Docker apt repository".into(),
        })
    }

    /// The repository URL as it appears in the source line
    fn url(&self) -> &str {
        self.key_url.strip_suffix("/gpg").unwrap_or(&self.key_url)
    }
}

impl Step for AptRepository {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        vec![
            format!(
                "curl -fsSL {} | gpg --batch --yes --dearmor -o {}",
                self.key_url, self.keyring_path
            ),
            format!("chmod a+r {}", self.keyring_path),
            // Double quotes so the architecture and codename expand on the host
            format!("echo \"{}\" > {}", self.repo_line, self.list_path),
            "apt-get update".into(),
        ]
    }

    fn check_command(&self) -> Option<String> {
        Some(format!(
            "[ -s {} ] && grep -qs '{}' {}",
            self.keyring_path,
            self.url(),
            self.list_path
        ))
    }
}

/// Install packages with the host's package manager
#[derive(Debug, Clone)]
pub struct InstallPackages {
    /// Package manager family
    pub family: PackageFamily,
    /// Package names
    pub packages: Vec<String>,
    /// Description
    description: String,
}

impl InstallPackages {
    /// Create a new package installation step
    pub fn new(family: PackageFamily, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let packages: Vec<String> = packages.into_iter().map(Into::into).collect();
        let description = format!("Install {}", packages.join(", "));
        Self {
            family,
            packages,
            description,
        }
    }

    /// Override the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Step for InstallPackages {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        vec![self.family.install_command(&self.packages)]
    }

    fn check_command(&self) -> Option<String> {
        if self.packages.is_empty() {
            return None;
        }
        Some(
            self.packages
                .iter()
                .map(|p| self.family.query_command(p))
                .collect::<Vec<_>>()
                .join(" && "),
        )
    }
}

/// Remove whichever of the given packages are installed
#[derive(Debug, Clone)]
pub struct RemovePackages {
    /// Package manager family
    pub family: PackageFamily,
    /// Package names
    pub packages: Vec<String>,
    /// Also delete package configuration
    pub purge: bool,
    /// Description
    description: String,
}

impl RemovePackages {
    pub fn new(family: PackageFamily, packages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let packages: Vec<String> = packages.into_iter().map(Into::into).collect();
        let description = format!("Remove {}", packages.join(", "));
        Self {
            family,
            packages,
            purge: false,
            description,
        }
    }

    /// Delete package configuration as well
    pub fn purge(mut self, purge: bool) -> Self {
        self.purge = purge;
        self
    }

    /// Override the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Step for RemovePackages {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        // Only hand installed packages to the package manager; most of them
        // refuse to remove something that is not there.
        let query = self.family.query_command("\"$p\"");
        let remove = self.family.remove_command(&["$installed".to_string()], self.purge);
        vec![format!(
            "installed=''; for p in {list}; do {query} && installed=\"$installed $p\"; done; \
             [ -z \"$installed\" ] || {remove}",
            list = self.packages.join(" "),
        )]
    }

    fn check_command(&self) -> Option<String> {
        if self.packages.is_empty() {
            return None;
        }
        Some(
            self.packages
                .iter()
                .map(|p| format!("! {}", self.family.query_command(p)))
                .collect::<Vec<_>>()
                .join(" && "),
        )
    }
}
