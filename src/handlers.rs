//! Request dispatch for the artifact endpoint.
//!
//! Routing here is mechanical: every decision with security consequences
//! lives in the verifier, policy, validator, and key-derivation modules.
//! The upload path calls them in that order and short-circuits on the
//! first failure.

use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use http::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CONTENT_DISPOSITION, CONTENT_TYPE,
};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::artifacts::{branch_from_ref, validate_filename, ArtifactKey, ArtifactMetadata};
use crate::constants::DEFAULT_BRANCH;
use crate::error::DropzoneError;
use crate::filesystem::{FilesystemService, StoredMetadata};
use crate::policy::RepositoryPolicy;
use crate::verifier::TokenVerifier;

pub struct ArtifactHandler {
    filesystem: Arc<FilesystemService>,
    verifier: TokenVerifier,
    policy: RepositoryPolicy,
}

impl ArtifactHandler {
    pub fn new(
        filesystem: Arc<FilesystemService>,
        verifier: TokenVerifier,
        policy: RepositoryPolicy,
    ) -> Self {
        Self {
            filesystem,
            verifier,
            policy,
        }
    }

    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<Full<Bytes>>, Infallible>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();
        info!(method = %method, path = %path, query = %query, "Incoming request");

        let response = match (&method, path.as_str()) {
            (&Method::OPTIONS, _) => preflight_response(),
            (&Method::GET, "/health") => json_response(StatusCode::OK, &json!({"status": "ok"})),
            (&Method::PUT, "/upload") => self
                .handle_upload(req, &query)
                .await
                .unwrap_or_else(error_response),
            (&Method::GET, "/artifacts") => self
                .handle_list(&query)
                .await
                .unwrap_or_else(error_response),
            (&Method::GET, "/download") => self
                .handle_download(&query)
                .await
                .unwrap_or_else(error_response),
            _ => unknown_route_response(&method, &path),
        };

        Ok(with_cors(response))
    }

    /// Upload path. Check order matters: authentication short-circuits
    /// before the filename is even looked at.
    async fn handle_upload<B>(
        &self,
        req: Request<B>,
        query: &str,
    ) -> Result<Response<Full<Bytes>>, DropzoneError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let token = bearer_token(req.headers())?;
        let claims = self.verifier.verify(&token).await?;
        self.policy.authorize(&claims)?;

        let filename = query_param(query, "filename").ok_or(DropzoneError::MissingFilename)?;
        validate_filename(&filename)?;

        let body = req
            .into_body()
            .collect()
            .await
            .map_err(|e| DropzoneError::Other(format!("failed to read request body: {}", e)))?
            .to_bytes();
        if body.is_empty() {
            return Err(DropzoneError::MissingBody);
        }

        let key = ArtifactKey::derive(&claims.git_ref, &filename);
        let content_type = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .to_string();
        let metadata = StoredMetadata {
            content_type,
            artifact: ArtifactMetadata {
                repository: claims.repository.clone(),
                branch: branch_from_ref(&claims.git_ref).to_string(),
                git_ref: claims.git_ref.clone(),
                actor: claims.actor.clone(),
                run_id: claims.run_id.clone(),
                run_number: claims.run_number.clone(),
                uploaded_at: Utc::now(),
            },
        };

        self.filesystem.put(key.as_str(), &body, &metadata).await?;
        info!(
            key = %key,
            repository = %claims.repository,
            actor = %claims.actor,
            size = body.len(),
            "Artifact stored"
        );
        Ok(json_response(
            StatusCode::OK,
            &json!({"success": true, "key": key.as_str()}),
        ))
    }

    // Reads are public: branch comes from the query string, not from any
    // verified identity.
    async fn handle_list(&self, query: &str) -> Result<Response<Full<Bytes>>, DropzoneError> {
        let branch = branch_param(query);
        let prefix = ArtifactKey::branch_prefix(&branch);
        let entries = self.filesystem.list(&prefix)?;
        debug!(branch = %branch, count = entries.len(), "Listing artifacts");

        let artifacts: Vec<serde_json::Value> = entries
            .iter()
            .map(|entry| {
                json!({
                    "key": entry.key,
                    "size": entry.size,
                    "uploadedAt": entry.uploaded_at.to_rfc3339(),
                })
            })
            .collect();
        Ok(json_response(
            StatusCode::OK,
            &json!({"branch": branch_from_ref(&branch), "artifacts": artifacts}),
        ))
    }

    async fn handle_download(&self, query: &str) -> Result<Response<Full<Bytes>>, DropzoneError> {
        let filename = query_param(query, "filename").ok_or(DropzoneError::MissingFilename)?;
        validate_filename(&filename)?;
        let branch = branch_param(query);

        let key = ArtifactKey::derive(&branch, &filename);
        match self.filesystem.get(key.as_str()).await? {
            Some((bytes, metadata)) => {
                let content_type = metadata.map(|m| m.content_type).unwrap_or_else(|| {
                    mime_guess::from_path(&filename)
                        .first_or_octet_stream()
                        .to_string()
                });
                debug!(key = %key, size = bytes.len(), "Serving artifact");
                Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, content_type)
                    .header(
                        CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    )
                    .body(Full::new(Bytes::from(bytes)))
                    .map_err(DropzoneError::from)
            }
            None => Err(DropzoneError::ArtifactNotFound(key.to_string())),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<String, DropzoneError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(DropzoneError::MissingAuth)?
        .to_str()
        .map_err(|_| DropzoneError::MissingAuth)?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(DropzoneError::MissingAuth)
}

fn query_param(query: &str, name: &str) -> Option<String> {
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// An explicitly empty `branch=` means the same as no branch at all.
fn branch_param(query: &str) -> String {
    query_param(query, "branch")
        .filter(|branch| !branch.is_empty())
        .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Maps a core failure to a structured error body. Upload 403s carry the
/// error's message so a CI job has something actionable in its logs; read
/// paths only ever produce 400/404 from this.
fn error_response(err: DropzoneError) -> Response<Full<Bytes>> {
    let status = err.status_code();
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    } else {
        warn!(error = %err, status = %status, "Request rejected");
    }
    json_response(status, &json!({"error": err.to_string()}))
}

fn unknown_route_response(method: &Method, path: &str) -> Response<Full<Bytes>> {
    debug!(method = %method, path = %path, "No matching route");
    json_response(
        StatusCode::NOT_FOUND,
        &json!({
            "error": "not found",
            "endpoints": [
                "PUT /upload?filename=",
                "GET /artifacts?branch=",
                "GET /download?branch=&filename=",
                "GET /health",
            ],
        }),
    )
}

fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(ACCESS_CONTROL_ALLOW_METHODS, "GET, PUT, OPTIONS")
        .header(ACCESS_CONTROL_ALLOW_HEADERS, "Authorization, Content-Type")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

fn with_cors(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}
