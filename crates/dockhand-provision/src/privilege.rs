//! Administrative privilege check
//!
//! The executor consults a [`PrivilegeCheck`] before running anything. A
//! process without root fails hard; elevation is left to the caller.

/// Answers whether the current process may perform privileged actions
pub trait PrivilegeCheck {
    fn is_privileged(&self) -> bool;
}

/// Checks the effective user id of this process
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveUser;

impl PrivilegeCheck for EffectiveUser {
    fn is_privileged(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_user_matches_euid() {
        let expected = nix::unistd::geteuid().as_raw() == 0;
        assert_eq!(EffectiveUser.is_privileged(), expected);
    }
}
