//! Filename validation, storage-key derivation, and artifact metadata.
//!
//! Storage keys are built by direct string concatenation of branch and
//! filename, so [`validate_filename`] is the first guard against traversal
//! into the storage namespace. It runs on the upload and download paths
//! alike, always before key derivation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DropzoneError;

/// Accepts only ASCII letters, digits, `.`, `_`, and `-`. No path
/// separators, no leading `..`, no empty string.
pub fn validate_filename(filename: &str) -> Result<(), DropzoneError> {
    if filename.is_empty() {
        return Err(DropzoneError::InvalidFilename(
            "filename is empty".to_string(),
        ));
    }
    if filename.starts_with("..") {
        return Err(DropzoneError::InvalidFilename(format!(
            "filename '{}' starts with '..'",
            filename
        )));
    }
    if !filename
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(DropzoneError::InvalidFilename(format!(
            "filename '{}' contains characters outside [A-Za-z0-9._-]",
            filename
        )));
    }
    Ok(())
}

/// Strips a literal `refs/heads/` or `refs/tags/` prefix. Unusual ref
/// shapes pass through unchanged so non-standard CI triggers still produce
/// a deterministic key instead of an error.
pub fn branch_from_ref(git_ref: &str) -> &str {
    git_ref
        .strip_prefix("refs/heads/")
        .or_else(|| git_ref.strip_prefix("refs/tags/"))
        .unwrap_or(git_ref)
}

/// Storage key under the latest-wins retention scheme.
///
/// The key is stable for a fixed (branch, filename) pair, so a second
/// upload with the same pair lands on the same object and overwrites it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactKey(String);

impl ArtifactKey {
    /// `{branch}/latest/{filename}`. The filename must already have passed
    /// [`validate_filename`].
    pub fn derive(git_ref: &str, filename: &str) -> Self {
        let branch = branch_from_ref(git_ref);
        Self(format!("{}/latest/{}", branch, filename))
    }

    /// Prefix covering every artifact stored for a branch.
    pub fn branch_prefix(branch: &str) -> String {
        format!("{}/latest/", branch_from_ref(branch))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Audit metadata attached to a stored artifact. Read-only after creation,
/// overwritten wholesale on re-upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    pub repository: String,
    pub branch: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub actor: String,
    pub run_id: String,
    pub run_number: String,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename_accepts_safe_names() {
        assert!(validate_filename("build.zip").is_ok());
        assert!(validate_filename("my-app_1.2.3.tar.gz").is_ok());
        assert!(validate_filename("ARTIFACT").is_ok());
        assert!(validate_filename(".hidden").is_ok());
    }

    #[test]
    fn test_validate_filename_rejects_traversal() {
        assert!(validate_filename("../../../etc/passwd").is_err());
        assert!(validate_filename("..").is_err());
        assert!(validate_filename("..secret").is_err());
        assert!(validate_filename("dir/file.zip").is_err());
        assert!(validate_filename("dir\\file.zip").is_err());
    }

    #[test]
    fn test_validate_filename_rejects_unsafe_characters() {
        assert!(validate_filename("").is_err());
        assert!(validate_filename("file name.zip").is_err());
        assert!(validate_filename("file;rm.zip").is_err());
        assert!(validate_filename("f\u{00e9}.zip").is_err());
        assert!(validate_filename("file\0.zip").is_err());
    }

    #[test]
    fn test_branch_from_ref() {
        assert_eq!(branch_from_ref("refs/heads/main"), "main");
        assert_eq!(branch_from_ref("refs/heads/feature/x"), "feature/x");
        assert_eq!(branch_from_ref("refs/tags/v1"), "v1");
        // Non-standard shapes pass through unchanged.
        assert_eq!(branch_from_ref("main"), "main");
        assert_eq!(branch_from_ref("refs/pull/7/merge"), "refs/pull/7/merge");
    }

    #[test]
    fn test_derive_key_is_deterministic() {
        let first = ArtifactKey::derive("refs/heads/main", "x.zip");
        let second = ArtifactKey::derive("refs/heads/main", "x.zip");
        assert_eq!(first, second);
        assert_eq!(first.as_str(), "main/latest/x.zip");
    }

    #[test]
    fn test_derive_key_tag_ref() {
        let key = ArtifactKey::derive("refs/tags/v1", "release.tar.gz");
        assert_eq!(key.as_str(), "v1/latest/release.tar.gz");
    }

    #[test]
    fn test_branch_prefix() {
        assert_eq!(ArtifactKey::branch_prefix("main"), "main/latest/");
        assert_eq!(ArtifactKey::branch_prefix("refs/heads/dev"), "dev/latest/");
    }
}
