//! User and group membership steps

use super::Step;
use crate::platform::PackageFamily;

/// Ensure a group exists and an existing user belongs to it
#[derive(Debug, Clone)]
pub struct AddUserToGroup {
    /// Username
    pub user: String,
    /// Group name
    pub group: String,
    /// Decides between shadow-utils and busybox tooling
    pub family: PackageFamily,
    /// Description
    description: String,
}

impl AddUserToGroup {
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        let user = user.into();
        let group = group.into();
        let description = format!("Add {user} to the {group} group");
        Self {
            user,
            group,
            family: PackageFamily::Apt,
            description,
        }
    }

    /// Use the group tooling of the given package family
    pub fn for_family(mut self, family: PackageFamily) -> Self {
        self.family = family;
        self
    }

    /// Grant `user` access to the Docker socket without sudo
    pub fn docker(user: impl Into<String>) -> Self {
        Self::new(user, "docker")
    }
}

impl Step for AddUserToGroup {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_bash(&self) -> Vec<String> {
        let (create, add) = match self.family {
            PackageFamily::Apk => (
                format!("addgroup -S {}", self.group),
                format!("addgroup {} {}", self.user, self.group),
            ),
            _ => (
                format!("groupadd {}", self.group),
                format!("usermod -aG {} {}", self.group, self.user),
            ),
        };
        vec![
            format!("id {} >/dev/null 2>&1", self.user),
            format!("getent group {} >/dev/null || {create}", self.group),
            add,
        ]
    }

    fn check_command(&self) -> Option<String> {
        Some(format!("id -nG {} 2>/dev/null | grep -qw {}", self.user, self.group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_user_to_docker_group() {
        let step = AddUserToGroup::docker("testuser");
        let bash = step.to_bash();

        assert_eq!(step.description(), "Add testuser to the docker group");
        // A missing user fails the step before any group change
        assert_eq!(bash[0], "id testuser >/dev/null 2>&1");
        assert!(bash[1].contains("groupadd docker"));
        assert_eq!(bash[2], "usermod -aG docker testuser");
        assert_eq!(
            step.check_command().as_deref(),
            Some("id -nG testuser 2>/dev/null | grep -qw docker")
        );
    }

    #[test]
    fn test_alpine_uses_addgroup() {
        let step = AddUserToGroup::docker("testuser").for_family(PackageFamily::Apk);
        let bash = step.to_bash();

        assert!(bash[1].ends_with("|| addgroup -S docker"));
        assert_eq!(bash[2], "addgroup testuser docker");
    }
}
