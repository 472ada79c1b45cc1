//! File management steps

use super::{CloudInitFile, CloudInitFragment, Step};
use sha2::{Digest, Sha256};

/// Write a file with specified content
#[derive(Debug, Clone)]
pub struct WriteFile {
    /// File path
    pub path: String,
    /// File content, always stored with exactly one trailing newline
    pub content: String,
    /// File permissions (e.g., "0644")
    pub permissions: Option<String>,
    /// File owner (e.g., "root:root")
    pub owner: Option<String>,
    /// Touched whenever the file is (re)written
    pub change_marker: Option<String>,
    /// Description
    description: String,
}

impl WriteFile {
    /// Create a new file write step
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let description = format!("Write {path}");
        let mut content: String = content.into();
        content.truncate(content.trim_end_matches('\n').len());
        content.push('\n');
        Self {
            path,
            content,
            permissions: None,
            owner: None,
            change_marker: None,
            description,
        }
    }

    /// Set file permissions
    pub fn with_permissions(mut self, perms: impl Into<String>) -> Self {
        self.permissions = Some(perms.into());
        self
    }

    /// Set file owner
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Touch `marker` after writing, so a later step can react to the change
    pub fn with_change_marker(mut self, marker: impl Into<String>) -> Self {
        self.change_marker = Some(marker.into());
        self
    }

    /// Compute SHA256 hash of content (hex-encoded)
    fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a heredoc delimiter that does not appear in the content
    fn heredoc_delimiter(&self) -> String {
        let mut delimiter = String::from("DOCKHAND_EOF");
        while self.content.lines().any(|l| l == delimiter) {
            delimiter.push('_');
        }
        delimiter
    }
}

impl Step for WriteFile {
    fn description(&self) -> &str {
        &self.description
    }

    fn to_cloud_init(&self) -> CloudInitFragment {
        CloudInitFragment {
            write_files: vec![CloudInitFile {
                path: self.path.clone(),
                content: self.content.clone(),
                permissions: self.permissions.clone(),
                owner: self.owner.clone(),
            }],
            ..Default::default()
        }
    }

    fn to_bash(&self) -> Vec<String> {
        let mut cmds = vec![format!("mkdir -p \"$(dirname '{}')\"", self.path)];

        let delimiter = self.heredoc_delimiter();
        // The heredoc adds the final newline back
        let body = self.content.strip_suffix('\n').unwrap_or(&self.content);
        cmds.push(format!(
            "cat > '{path}' << '{delimiter}'\n{body}\n{delimiter}",
            path = self.path,
        ));

        if let Some(perms) = &self.permissions {
            cmds.push(format!("chmod {} '{}'", perms, self.path));
        }

        if let Some(owner) = &self.owner {
            cmds.push(format!("chown {} '{}'", owner, self.path));
        }

        if let Some(marker) = &self.change_marker {
            cmds.push(format!("touch '{marker}'"));
        }

        cmds
    }

    fn check_command(&self) -> Option<String> {
        // Check if file exists with expected content hash
        let expected_hash = self.content_hash();
        Some(format!(
            "[ -f '{}' ] && [ \"$(sha256sum '{}' | cut -d' ' -f1)\" = \"{}\" ]",
            self.path, self.path, expected_hash
        ))
    }
}
