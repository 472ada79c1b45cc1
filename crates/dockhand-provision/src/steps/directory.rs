//! Directory management steps

use super::Step;

/// Ensure a directory exists
#[derive(Debug, Clone)]
pub struct EnsureDirectory {
    /// Directory path
    pub path: String,
    /// Directory permissions (e.g., "0755")
    pub permissions: Option<String>,
    /// Directory owner (e.g., "root:root")
    pub owner: Option<String>,
    /// Description
    description: String,
}

impl EnsureDirectory {
    /// Create a new directory step
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Ensure directory {path}");
        Self {
            path,
            permissions: None,
            owner: None,
            description,
        }
    }

    /// Set directory permissions
    pub fn with_permissions(mut self, perms: impl Into<String>) -> Self {
        self.permissions = Some(perms.into());
        self
    }

    /// Set directory owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Override the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Step for EnsureDirectory {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        let mut cmds = vec![format!("mkdir -p {}", self.path)];

        if let Some(perms) = &self.permissions {
            cmds.push(format!("chmod {} {}", perms, self.path));
        }

        if let Some(owner) = &self.owner {
            cmds.push(format!("chown {} {}", owner, self.path));
        }

        cmds
    }

    fn check_command(&self) -> Option<String> {
        // Mode matters too: a pre-existing directory with the wrong mode is fixed up
        match &self.permissions {
            Some(perms) => Some(format!(
                "[ -d {path} ] && [ \"$(stat -c %a {path})\" = \"{mode}\" ]",
                path = self.path,
                mode = perms.trim_start_matches('0'),
            )),
            None => Some(format!("[ -d {} ]", self.path)),
        }
    }
}

/// Ensure a file or directory tree is gone
#[derive(Debug, Clone)]
pub struct RemovePath {
    /// Path to delete
    pub path: String,
    /// Description
    description: String,
}

impl RemovePath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Remove {path}");
        Self { path, description }
    }
}

impl Step for RemovePath {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        vec![format!("rm -rf -- '{}'", self.path)]
    }

    fn check_command(&self) -> Option<String> {
        Some(format!("[ ! -e '{}' ]", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_directory_idempotent() {
        let step = EnsureDirectory::new("/var/lib/docker").with_owner("root:root");

        let check = step.check_command();
        assert_eq!(check.as_deref(), Some("[ -d /var/lib/docker ]"));
        assert_eq!(step.to_bash(), ["mkdir -p /var/lib/docker", "chown root:root /var/lib/docker"]);
    }

    #[test]
    fn test_check_includes_mode() {
        let step = EnsureDirectory::new("/etc/apt/keyrings").with_permissions("0755");
        let check = step.check_command().unwrap();
        assert!(check.contains("[ -d /etc/apt/keyrings ]"));
        assert!(check.contains("= \"755\""));
    }

    #[test]
    fn test_remove_path() {
        let step = RemovePath::new("/etc/apt/sources.list.d/docker.list");
        assert_eq!(step.description(), "Remove /etc/apt/sources.list.d/docker.list");
        assert_eq!(step.to_bash(), ["rm -rf -- '/etc/apt/sources.list.d/docker.list'"]);
        assert_eq!(
            step.check_command().as_deref(),
            Some("[ ! -e '/etc/apt/sources.list.d/docker.list' ]")
        );
    }
}
