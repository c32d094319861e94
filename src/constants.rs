//! Fixed endpoints and defaults.

/// Issuer whose tokens are accepted for uploads. Exact match only.
pub const TRUSTED_ISSUER: &str = "https://token.actions.githubusercontent.com";

/// Well-known key-set location for [`TRUSTED_ISSUER`].
pub const JWKS_URL: &str = "https://token.actions.githubusercontent.com/.well-known/jwks";

/// Branch used by read paths when no `branch` query parameter is supplied.
pub const DEFAULT_BRANCH: &str = "main";
