//! Repository allow-list enforcement.

use tracing::warn;

use crate::error::DropzoneError;
use crate::verifier::IdentityClaims;

/// The single repository permitted to upload, fixed at process start.
pub struct RepositoryPolicy {
    allowed: String,
}

impl RepositoryPolicy {
    pub fn new(allowed: impl Into<String>) -> Self {
        Self {
            allowed: allowed.into(),
        }
    }

    /// Exact string equality only. No wildcard or prefix matching: the
    /// allow-list is a single entry and the review surface stays small.
    pub fn authorize(&self, claims: &IdentityClaims) -> Result<(), DropzoneError> {
        if claims.repository == self.allowed {
            Ok(())
        } else {
            warn!(
                claimed = %claims.repository,
                allowed = %self.allowed,
                actor = %claims.actor,
                "Rejected upload from unlisted repository"
            );
            Err(DropzoneError::RepositoryNotAllowed(
                claims.repository.clone(),
            ))
        }
    }
}
