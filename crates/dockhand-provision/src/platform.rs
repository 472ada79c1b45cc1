//! Host identity and installation profile resolution
//!
//! [`resolve`] maps an [`OsIdentity`] (the `ID` / `ID_LIKE` pair from
//! os-release) to exactly one [`InstallationProfile`]. It never probes the
//! host and never falls back to a default profile.

use std::fmt;
use std::path::Path;

use crate::config::Channel;
use crate::error::ProvisionError;
use crate::steps::{AptRepository, Step};

/// Identity files, in lookup order
pub const OS_RELEASE_PATHS: [&str; 2] = ["/etc/os-release", "/usr/lib/os-release"];

/// Host identity as read from os-release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsIdentity {
    /// `ID`
    pub id: String,
    /// `ID_LIKE`, in listed order
    pub id_like: Vec<String>,
    /// `VERSION_CODENAME`
    pub version_codename: Option<String>,
    /// `UBUNTU_CODENAME`, set by Ubuntu derivatives
    pub ubuntu_codename: Option<String>,
    /// `PRETTY_NAME`
    pub pretty_name: Option<String>,
}

impl OsIdentity {
    /// Identity with only an `ID`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Set `ID_LIKE` entries
    pub fn with_like(mut self, like: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.id_like = like.into_iter().map(Into::into).collect();
        self
    }

    /// Set `VERSION_CODENAME`
    pub fn with_codename(mut self, codename: impl Into<String>) -> Self {
        self.version_codename = Some(codename.into());
        self
    }

    /// Parse os-release content
    ///
    /// Unknown keys, comments and malformed lines are ignored.
    pub fn parse(content: &str) -> Self {
        let mut identity = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = unquote(value.trim());

            match key.trim() {
                "ID" => identity.id = value,
                "ID_LIKE" => {
                    identity.id_like = value.split_whitespace().map(str::to_string).collect();
                }
                "VERSION_CODENAME" if !value.is_empty() => identity.version_codename = Some(value),
                "UBUNTU_CODENAME" if !value.is_empty() => identity.ubuntu_codename = Some(value),
                "PRETTY_NAME" => identity.pretty_name = Some(value),
                _ => {}
            }
        }

        identity
    }

    /// Read and parse an os-release file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProvisionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| {
            ProvisionError::IdentityUnreadable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::parse(&content))
    }

    /// Read the host's identity from the standard locations
    pub fn load() -> Result<Self, ProvisionError> {
        let mut last_err = None;
        for path in OS_RELEASE_PATHS {
            match Self::from_file(path) {
                Ok(identity) => return Ok(identity),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| ProvisionError::Config("no os-release path".into())))
    }

    /// Name for display: `PRETTY_NAME` or `ID`
    pub fn display_name(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(&self.id)
    }
}

/// Strip one layer of matching single or double quotes
fn unquote(value: &str) -> String {
    let stripped = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')));
    stripped.unwrap_or(value).to_string()
}

/// Package manager family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFamily {
    Apt,
    Apk,
    Pacman,
    Zypper,
}

impl PackageFamily {
    /// Refresh the package index
    pub fn refresh_command(self) -> &'static str {
        match self {
            Self::Apt => "apt-get update",
            Self::Apk => "apk update",
            Self::Pacman => "pacman -Sy --noconfirm",
            Self::Zypper => "zypper --non-interactive refresh",
        }
    }

    /// Install packages non-interactively
    pub fn install_command(self, packages: &[String]) -> String {
        let list = packages.join(" ");
        match self {
            Self::Apt => format!("DEBIAN_FRONTEND=noninteractive apt-get install -y {list}"),
            Self::Apk => format!("apk add --no-cache {list}"),
            Self::Pacman => format!("pacman -S --noconfirm --needed {list}"),
            Self::Zypper => format!("zypper --non-interactive install {list}"),
        }
    }

    /// Remove packages, deleting their configuration when `purge` is set
    pub fn remove_command(self, packages: &[String], purge: bool) -> String {
        let list = packages.join(" ");
        match (self, purge) {
            (Self::Apt, true) => {
                format!("DEBIAN_FRONTEND=noninteractive apt-get purge -y {list}")
            }
            (Self::Apt, false) => {
                format!("DEBIAN_FRONTEND=noninteractive apt-get remove -y {list}")
            }
            (Self::Apk, _) => format!("apk del {list}"),
            (Self::Pacman, true) => format!("pacman -Rns --noconfirm {list}"),
            (Self::Pacman, false) => format!("pacman -R --noconfirm {list}"),
            (Self::Zypper, _) => format!("zypper --non-interactive remove {list}"),
        }
    }

    /// Exit 0 iff `package` is installed
    pub fn query_command(self, package: &str) -> String {
        match self {
            // `dpkg -s` also succeeds for removed packages whose config files remain
            Self::Apt => format!(
                "dpkg-query -W -f='${{db:Status-Status}}' {package} 2>/dev/null | grep -qx installed"
            ),
            Self::Apk => format!("apk info -e {package} >/dev/null 2>&1"),
            Self::Pacman => format!("pacman -Q {package} >/dev/null 2>&1"),
            Self::Zypper => format!("rpm -q {package} >/dev/null 2>&1"),
        }
    }
}

/// Init system used to manage the docker service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceManager {
    Systemd,
    OpenRc,
}

/// Supported distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distro {
    Ubuntu,
    Debian,
    Raspbian,
    Alpine,
    Arch,
    OpenSuse,
}

impl Distro {
    /// Normalized identifier
    pub fn id(self) -> &'static str {
        match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::Raspbian => "raspbian",
            Self::Alpine => "alpine",
            Self::Arch => "arch",
            Self::OpenSuse => "opensuse",
        }
    }

    pub fn family(self) -> PackageFamily {
        match self {
            Self::Ubuntu | Self::Debian | Self::Raspbian => PackageFamily::Apt,
            Self::Alpine => PackageFamily::Apk,
            Self::Arch => PackageFamily::Pacman,
            Self::OpenSuse => PackageFamily::Zypper,
        }
    }
}

impl fmt::Display for Distro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Outcome of matching a single identifier
enum Match {
    Supported(Distro),
    Excluded(&'static str),
}

/// Static table of known identifiers
fn classify(id: &str) -> Option<Match> {
    let m = match id {
        "ubuntu" => Match::Supported(Distro::Ubuntu),
        "debian" => Match::Supported(Distro::Debian),
        "raspbian" => Match::Supported(Distro::Raspbian),
        "alpine" => Match::Supported(Distro::Alpine),
        "arch" | "archlinux" => Match::Supported(Distro::Arch),
        "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "suse" | "sles" => {
            Match::Supported(Distro::OpenSuse)
        }
        "fedora" | "rhel" | "centos" | "rocky" | "almalinux" | "ol" | "amzn" => {
            Match::Excluded("Red Hat")
        }
        _ => return None,
    };
    Some(m)
}

/// Everything needed to install Docker on one distribution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationProfile {
    pub distro: Distro,
    /// Release codename for apt sources (e.g. "noble", "bookworm")
    pub codename: Option<String>,
}

impl InstallationProfile {
    pub fn new(distro: Distro) -> Self {
        Self {
            distro,
            codename: None,
        }
    }

    /// Set the release codename
    pub fn with_codename(mut self, codename: impl Into<String>) -> Self {
        self.codename = Some(codename.into());
        self
    }

    /// Normalized OS identifier
    pub fn os_id(&self) -> &'static str {
        self.distro.id()
    }

    pub fn family(&self) -> PackageFamily {
        self.distro.family()
    }

    pub fn service_manager(&self) -> ServiceManager {
        match self.distro {
            Distro::Alpine => ServiceManager::OpenRc,
            _ => ServiceManager::Systemd,
        }
    }

    /// Packages needed before the vendor repository can be added
    pub fn prerequisites(&self) -> Vec<String> {
        match self.family() {
            PackageFamily::Apt => ["ca-certificates", "curl", "gnupg"]
                .into_iter()
                .map(String::from)
                .collect(),
            _ => vec![],
        }
    }

    /// Docker packages for this distribution
    pub fn docker_packages(&self) -> Vec<String> {
        let names: &[&str] = match self.family() {
            PackageFamily::Apt => &[
                "docker-ce",
                "docker-ce-cli",
                "containerd.io",
                "docker-buildx-plugin",
                "docker-compose-plugin",
            ],
            PackageFamily::Apk => &["docker", "docker-cli-compose"],
            PackageFamily::Pacman | PackageFamily::Zypper => &["docker", "docker-compose"],
        };
        names.iter().map(|n| (*n).to_string()).collect()
    }

    /// Distribution packages that clash with the vendor packages
    pub fn conflicting_packages(&self) -> Vec<String> {
        match self.family() {
            PackageFamily::Apt => [
                "docker.io",
                "docker-doc",
                "docker-compose",
                "podman-docker",
                "containerd",
                "runc",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            _ => vec![],
        }
    }

    /// Base URL of the vendor apt repository, if this distribution uses one
    pub fn repository_url(&self) -> Option<String> {
        match self.family() {
            PackageFamily::Apt => Some(format!("https://download.docker.com/linux/{}", self.os_id())),
            _ => None,
        }
    }

    /// Shell commands that install the Docker packages from scratch
    ///
    /// Index refresh, prerequisites, vendor repository and packages, in that
    /// order. Service setup and configuration are left to the manifest.
    pub fn install_commands(&self, channel: Channel) -> Vec<String> {
        let family = self.family();
        let mut commands = vec![family.refresh_command().to_string()];

        let prerequisites = self.prerequisites();
        if !prerequisites.is_empty() {
            commands.push(family.install_command(&prerequisites));
        }
        if let Some(repo) = AptRepository::docker(self, channel) {
            commands.push("install -m 0755 -d /etc/apt/keyrings".into());
            commands.extend(repo.to_bash());
        }
        commands.push(family.install_command(&self.docker_packages()));
        commands
    }

    /// Codename for apt sources, evaluated on the host when unknown
    pub fn codename_expr(&self) -> String {
        self.codename
            .clone()
            .unwrap_or_else(|| r#"$(. /etc/os-release && echo "$VERSION_CODENAME")"#.to_string())
    }
}

/// Select the installation profile for a host identity
///
/// Matching is case-insensitive. `ID` is tried first; `ID_LIKE` entries are
/// tried in order only when `ID` is unknown. An excluded family fails with
/// [`ProvisionError::ExcludedPlatform`], anything else unknown with
/// [`ProvisionError::UnsupportedPlatform`].
pub fn resolve(identity: &OsIdentity) -> Result<InstallationProfile, ProvisionError> {
    let id = identity.id.trim().to_ascii_lowercase();
    let candidates =
        std::iter::once(id.clone()).chain(identity.id_like.iter().map(|l| l.to_ascii_lowercase()));

    for candidate in candidates {
        match classify(&candidate) {
            Some(Match::Supported(distro)) => {
                let mut profile = InstallationProfile::new(distro);
                profile.codename = match distro {
                    Distro::Ubuntu => identity
                        .ubuntu_codename
                        .clone()
                        .or_else(|| identity.version_codename.clone()),
                    _ => identity.version_codename.clone(),
                };
                return Ok(profile);
            }
            Some(Match::Excluded(family)) => {
                return Err(ProvisionError::ExcludedPlatform {
                    id: id.clone(),
                    family: family.to_string(),
                });
            }
            None => {}
        }
    }

    Err(ProvisionError::UnsupportedPlatform { id })
}

#[cfg(test)]
mod tests {
    use super::*;

    const UBUNTU: &str = r#"PRETTY_NAME="Ubuntu 24.04.1 LTS"
NAME="Ubuntu"
VERSION_ID="24.04"
VERSION_CODENAME=noble
ID=ubuntu
ID_LIKE=debian
UBUNTU_CODENAME=noble
"#;

    const MINT: &str = r#"NAME="Linux Mint"
ID=linuxmint
ID_LIKE="ubuntu debian"
VERSION_CODENAME=wilma
UBUNTU_CODENAME=noble
"#;

    #[test]
    fn test_parse_os_release() {
        let identity = OsIdentity::parse(UBUNTU);
        assert_eq!(identity.id, "ubuntu");
        assert_eq!(identity.id_like, ["debian"]);
        assert_eq!(identity.version_codename.as_deref(), Some("noble"));
        assert_eq!(identity.display_name(), "Ubuntu 24.04.1 LTS");
    }

    #[test]
    fn test_parse_ignores_comments_and_junk() {
        let identity = OsIdentity::parse("# comment\n\nnot a pair\nID='alpine'\n");
        assert_eq!(identity.id, "alpine");
        assert!(identity.id_like.is_empty());
        assert_eq!(identity.display_name(), "alpine");
    }

    #[test]
    fn test_resolve_ubuntu() {
        let profile = resolve(&OsIdentity::parse(UBUNTU)).unwrap();
        assert_eq!(profile.distro, Distro::Ubuntu);
        assert_eq!(profile.family(), PackageFamily::Apt);
        assert_eq!(profile.codename.as_deref(), Some("noble"));
        assert_eq!(
            profile.repository_url().as_deref(),
            Some("https://download.docker.com/linux/ubuntu")
        );
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let profile = resolve(&OsIdentity::new("Debian")).unwrap();
        assert_eq!(profile.distro, Distro::Debian);
    }

    #[test]
    fn test_derivative_uses_like_and_upstream_codename() {
        let profile = resolve(&OsIdentity::parse(MINT)).unwrap();
        assert_eq!(profile.distro, Distro::Ubuntu);
        assert_eq!(profile.codename.as_deref(), Some("noble"));
    }

    #[test]
    fn test_exact_id_beats_like() {
        // raspbian lists debian as like, but has its own repository path
        let identity = OsIdentity::new("raspbian").with_like(["debian"]);
        assert_eq!(resolve(&identity).unwrap().distro, Distro::Raspbian);
    }

    #[test]
    fn test_like_entries_tried_in_order() {
        let identity = OsIdentity::new("pop").with_like(["ubuntu", "debian"]);
        assert_eq!(resolve(&identity).unwrap().distro, Distro::Ubuntu);
    }

    #[test]
    fn test_fedora_is_excluded() {
        let err = resolve(&OsIdentity::new("fedora")).unwrap_err();
        assert!(matches!(err, ProvisionError::ExcludedPlatform { ref id, .. } if id == "fedora"));
    }

    #[test]
    fn test_red_hat_derivative_is_excluded_via_like() {
        let identity = OsIdentity::new("nobara").with_like(["fedora"]);
        let err = resolve(&identity).unwrap_err();
        assert!(matches!(err, ProvisionError::ExcludedPlatform { .. }));
    }

    #[test]
    fn test_unknown_is_unsupported() {
        let err = resolve(&OsIdentity::new("gentoo")).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedPlatform { ref id } if id == "gentoo"));

        let err = resolve(&OsIdentity::default()).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedPlatform { .. }));
    }

    #[test]
    fn test_resolve_is_deterministic() {
        for identity in [
            OsIdentity::parse(UBUNTU),
            OsIdentity::parse(MINT),
            OsIdentity::new("fedora"),
            OsIdentity::new("gentoo"),
            OsIdentity::new("opensuse-tumbleweed").with_like(["opensuse", "suse"]),
        ] {
            let first = resolve(&identity).map_err(|e| e.to_string());
            let second = resolve(&identity).map_err(|e| e.to_string());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_non_apt_profiles() {
        let alpine = resolve(&OsIdentity::new("alpine")).unwrap();
        assert_eq!(alpine.service_manager(), ServiceManager::OpenRc);
        assert!(alpine.repository_url().is_none());
        assert!(alpine.prerequisites().is_empty());
        assert_eq!(alpine.docker_packages(), ["docker", "docker-cli-compose"]);

        let arch = resolve(&OsIdentity::new("manjaro").with_like(["arch"])).unwrap();
        assert_eq!(arch.family(), PackageFamily::Pacman);
        assert_eq!(arch.service_manager(), ServiceManager::Systemd);
    }

    #[test]
    fn test_codename_expr_falls_back_to_host() {
        let profile = InstallationProfile::new(Distro::Debian);
        assert!(profile.codename_expr().contains("VERSION_CODENAME"));
        assert_eq!(profile.with_codename("bookworm").codename_expr(), "bookworm");
    }

    #[test]
    fn test_family_commands() {
        let pkgs = vec!["docker-ce".to_string(), "docker-ce-cli".to_string()];
        assert_eq!(
            PackageFamily::Apt.install_command(&pkgs),
            "DEBIAN_FRONTEND=noninteractive apt-get install -y docker-ce docker-ce-cli"
        );
        assert_eq!(
            PackageFamily::Pacman.remove_command(&pkgs, true),
            "pacman -Rns --noconfirm docker-ce docker-ce-cli"
        );
        assert_eq!(PackageFamily::Apk.query_command("docker"), "apk info -e docker >/dev/null 2>&1");
    }

    #[test]
    fn test_apt_query_ignores_removed_packages() {
        // A plain `apt-get remove` leaves the package in the config-files state
        assert_eq!(
            PackageFamily::Apt.query_command("docker-ce"),
            "dpkg-query -W -f='${db:Status-Status}' docker-ce 2>/dev/null | grep -qx installed"
        );
    }

    #[test]
    fn test_install_commands_order() {
        let apt = InstallationProfile::new(Distro::Debian).with_codename("bookworm");
        let commands = apt.install_commands(Channel::Stable);

        assert_eq!(commands[0], "apt-get update");
        assert!(commands[1].ends_with("install -y ca-certificates curl gnupg"));
        let key = commands.iter().position(|c| c.contains("--dearmor")).unwrap();
        let install = commands.iter().position(|c| c.contains("docker-ce ")).unwrap();
        assert!(key < install);
        assert_eq!(install, commands.len() - 1);

        let alpine = InstallationProfile::new(Distro::Alpine).install_commands(Channel::Stable);
        assert_eq!(alpine, ["apk update", "apk add --no-cache docker docker-cli-compose"]);
    }
}
