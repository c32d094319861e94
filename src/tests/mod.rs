
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::constants::TRUSTED_ISSUER;
use crate::filesystem::FilesystemService;
use crate::handlers::ArtifactHandler;
use crate::policy::RepositoryPolicy;
use crate::verifier::{JwksCache, TokenVerifier};

pub(crate) const TEST_KID: &str = "test-key";
pub(crate) const TEST_SECRET: &[u8] = b"dropzone-test-secret";
pub(crate) const TEST_REPO: &str = "octocat/widgets";

/// Symmetric key set so tests can mint verifiable tokens without a network.
pub(crate) fn test_jwks() -> JwkSet {
    serde_json::from_value(json!({
        "keys": [{
            "kty": "oct",
            "kid": TEST_KID,
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(TEST_SECRET),
        }]
    }))
    .expect("Failed to build test JWKS")
}

pub(crate) fn test_verifier() -> TokenVerifier {
    // Unroutable refresh URL: the preloaded set has to satisfy every lookup.
    let jwks = Arc::new(JwksCache::preloaded("http://127.0.0.1:1/jwks", test_jwks()));
    TokenVerifier::new(TRUSTED_ISSUER, jwks)
}

pub(crate) fn sign_token(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(TEST_KID.to_string());
    encode(&header, claims, &EncodingKey::from_secret(TEST_SECRET))
        .expect("Failed to sign test token")
}

/// Claims a real upload token would carry, minus anything under test.
pub(crate) fn upload_claims(repository: &str, git_ref: &str) -> Value {
    let now = chrono::Utc::now().timestamp();
    json!({
        "iss": TRUSTED_ISSUER,
        "repository": repository,
        "ref": git_ref,
        "actor": "octocat",
        "run_id": "42424242",
        "run_number": "7",
        "iat": now,
        "nbf": now - 10,
        "exp": now + 600,
    })
}

pub(crate) fn test_handler() -> (ArtifactHandler, TempDir) {
    crate::logging::setup_test_logging();
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let filesystem = Arc::new(
        FilesystemService::new(temp_dir.path().to_path_buf())
            .expect("Failed to create filesystem service"),
    );
    let handler = ArtifactHandler::new(filesystem, test_verifier(), RepositoryPolicy::new(TEST_REPO));
    (handler, temp_dir)
}
