//! OIDC token verification against the trusted issuer's key set.
//!
//! The key set is fetched from the issuer's well-known location and cached
//! process-wide; a token presenting an unknown key id triggers exactly one
//! refetch before the token is rejected. Repository authorization is
//! deliberately not done here: the trust boundary (signature and issuer)
//! stays independent of the business rule of which repository may publish.

use std::str::FromStr;
use std::sync::Arc;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::DropzoneError;

/// Verified payload of an upload token.
///
/// Only produced by [`TokenVerifier::verify`]; deserialization fails the
/// verification if any required claim is absent, so a value of this type is
/// never built from unverified input.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub iss: String,
    /// Source repository in `owner/name` form. Audit-worthy but not
    /// authorization-bearing until the policy has checked it.
    pub repository: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub actor: String,
    pub run_id: String,
    pub run_number: String,
}

/// Process-wide cache of the issuer's published key set.
///
/// Concurrent refreshes triggered by simultaneous key misses are fine: the
/// last writer wins, and every stored set came from the same trusted URL.
pub struct JwksCache {
    url: String,
    client: reqwest::Client,
    keys: RwLock<Option<JwkSet>>,
}

impl JwksCache {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
            keys: RwLock::new(None),
        }
    }

    /// Cache seeded with a known key set. Refreshes still go to `url`.
    pub fn preloaded(url: &str, keys: JwkSet) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
            keys: RwLock::new(Some(keys)),
        }
    }

    /// Fetches the key set and replaces the cached copy.
    pub async fn refresh(&self) -> Result<JwkSet, DropzoneError> {
        debug!(url = %self.url, "Fetching JWKS");
        let fetched: JwkSet = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        *self.keys.write().await = Some(fetched.clone());
        Ok(fetched)
    }

    /// Resolves a key id, refetching once on a miss against the cached set.
    pub async fn find_key(&self, kid: &str) -> Result<Jwk, DropzoneError> {
        let cached = self.keys.read().await.clone();
        if let Some(jwk) = cached.as_ref().and_then(|keys| keys.find(kid)) {
            return Ok(jwk.clone());
        }
        let keys = self.refresh().await?;
        keys.find(kid).cloned().ok_or_else(|| {
            warn!(kid = %kid, "No key in the issuer's key set matches the token");
            DropzoneError::TokenInvalid(format!("no key matches kid '{}'", kid))
        })
    }
}

/// Verifies opaque bearer tokens into [`IdentityClaims`].
pub struct TokenVerifier {
    issuer: String,
    jwks: Arc<JwksCache>,
}

impl TokenVerifier {
    pub fn new(issuer: &str, jwks: Arc<JwksCache>) -> Self {
        Self {
            issuer: issuer.to_string(),
            jwks,
        }
    }

    /// Verifies signature, issuer, and temporal claims. Every failure maps
    /// to [`DropzoneError::TokenInvalid`]; the repository claim is not
    /// checked here.
    pub async fn verify(&self, token: &str) -> Result<IdentityClaims, DropzoneError> {
        let header = decode_header(token)
            .map_err(|e| DropzoneError::TokenInvalid(format!("malformed token header: {}", e)))?;
        let kid = header.kid.ok_or_else(|| {
            DropzoneError::TokenInvalid("token header has no key id".to_string())
        })?;

        let jwk = self.jwks.find_key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| DropzoneError::TokenInvalid(format!("unusable verification key: {}", e)))?;
        let algorithm = jwk
            .common
            .key_algorithm
            .and_then(|alg| Algorithm::from_str(&alg.to_string()).ok())
            .unwrap_or(Algorithm::RS256);

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        // The audience claim varies per workflow configuration.
        validation.validate_aud = false;

        let token_data = decode::<IdentityClaims>(token, &key, &validation)
            .map_err(|e| DropzoneError::TokenInvalid(e.to_string()))?;

        debug!(
            repository = %token_data.claims.repository,
            git_ref = %token_data.claims.git_ref,
            actor = %token_data.claims.actor,
            "Token verified"
        );
        Ok(token_data.claims)
    }
}
