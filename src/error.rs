//! Centralized error types for the dropzone artifact server.

use std::error::Error;

use http::StatusCode;

#[derive(Debug)]
pub enum DropzoneError {
    /// No Authorization header, or one that is not a bearer token.
    MissingAuth,
    /// Signature, issuer, temporal, or claim-shape validation failed.
    TokenInvalid(String),
    /// A verified token whose repository claim is not the configured
    /// repository. Carries the claimed repository for logging.
    RepositoryNotAllowed(String),
    InvalidFilename(String),
    MissingFilename,
    MissingBody,
    ArtifactNotFound(String),
    Configuration(String),
    Io(std::io::Error),
    Reqwest(String),
    HttpResponse(String),
    Other(String),
}

impl std::fmt::Display for DropzoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropzoneError::MissingAuth => {
                f.write_str("Missing or malformed Authorization header")
            }
            DropzoneError::TokenInvalid(msg) => write!(f, "Token verification failed: {}", msg),
            DropzoneError::RepositoryNotAllowed(repository) => {
                write!(f, "Repository '{}' is not allowed to publish", repository)
            }
            DropzoneError::InvalidFilename(msg) => write!(f, "Invalid filename: {}", msg),
            DropzoneError::MissingFilename => {
                f.write_str("Missing 'filename' query parameter")
            }
            DropzoneError::MissingBody => f.write_str("Request body is empty"),
            DropzoneError::ArtifactNotFound(key) => {
                write!(f, "Artifact not found: {}", key)
            }
            DropzoneError::Configuration(msg) => write!(f, "Configuration Error: {}", msg),
            DropzoneError::Io(e) => write!(f, "IO Error: {:?}", e),
            DropzoneError::Reqwest(msg) => write!(f, "Reqwest HTTP Error: {}", msg),
            DropzoneError::HttpResponse(msg) => write!(f, "HTTP Response Error: {}", msg),
            DropzoneError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl DropzoneError {
    /// Status the dispatcher maps this failure to at the HTTP boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DropzoneError::MissingAuth => StatusCode::UNAUTHORIZED,
            DropzoneError::TokenInvalid(_) | DropzoneError::RepositoryNotAllowed(_) => {
                StatusCode::FORBIDDEN
            }
            DropzoneError::InvalidFilename(_)
            | DropzoneError::MissingFilename
            | DropzoneError::MissingBody => StatusCode::BAD_REQUEST,
            DropzoneError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            // Unsafe storage keys surface as InvalidInput from the
            // filesystem layer; the caller supplied them, not the server.
            DropzoneError::Io(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for DropzoneError {
    fn from(err: std::io::Error) -> Self {
        DropzoneError::Io(err)
    }
}

impl From<reqwest::Error> for DropzoneError {
    fn from(err: reqwest::Error) -> Self {
        DropzoneError::Reqwest(err.to_string())
    }
}

impl From<http::Error> for DropzoneError {
    fn from(err: http::Error) -> Self {
        DropzoneError::HttpResponse(err.to_string())
    }
}

impl From<DropzoneError> for Box<dyn Error + Send + Sync> {
    fn from(val: DropzoneError) -> Self {
        Box::new(std::io::Error::other(val.to_string()))
    }
}
