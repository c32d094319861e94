//! HTTP server setup and lifecycle management.
//!
//! Binds a listener and serves each connection on its own task. Handlers
//! are stateless across requests; the only shared mutable resource is the
//! verification key cache inside the token verifier.

use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::constants::{JWKS_URL, TRUSTED_ISSUER};
use crate::error::DropzoneError;
use crate::filesystem::FilesystemService;
use crate::handlers::ArtifactHandler;
use crate::policy::RepositoryPolicy;
use crate::verifier::{JwksCache, TokenVerifier};

pub struct Server {
    bind_address: String,
    port: NonZeroU16,
    root_dir: PathBuf,
    allowed_repository: String,
}

impl Server {
    pub fn new(cli: Cli) -> Self {
        Self {
            bind_address: cli.host,
            port: cli.port,
            root_dir: cli.root_dir,
            allowed_repository: cli.allowed_repo,
        }
    }

    /// Create a server instance for testing that binds to a random
    /// available port.
    pub async fn test_mode(
        root_dir: PathBuf,
        allowed_repository: String,
    ) -> Result<(Self, u16), DropzoneError> {
        let host = "127.0.0.1".to_string();
        let addr = format!("{host}:0");
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let server = Server {
            bind_address: host,
            port: NonZeroU16::try_from(port).map_err(|_| {
                DropzoneError::Other(format!("Failed to convert port '{port}' to NonZeroU16"))
            })?,
            root_dir,
            allowed_repository,
        };
        Ok((server, port))
    }

    pub async fn run(self) -> Result<(), DropzoneError> {
        let addr = format!("{}:{}", self.bind_address, self.port);
        let addr: SocketAddr = addr.parse().map_err(|err| {
            DropzoneError::Configuration(format!("Failed to parse address '{addr}': {err}"))
        })?;

        let filesystem = Arc::new(FilesystemService::new(self.root_dir.clone())?);
        let jwks = Arc::new(JwksCache::new(JWKS_URL));
        let verifier = TokenVerifier::new(TRUSTED_ISSUER, jwks);
        let policy = RepositoryPolicy::new(self.allowed_repository.clone());
        let handler = Arc::new(ArtifactHandler::new(filesystem, verifier, policy));

        info!(
            root_dir = ?self.root_dir,
            allowed_repository = %self.allowed_repository,
            issuer = %TRUSTED_ISSUER,
            address = %addr,
            "Starting dropzone..."
        );

        let listener = TcpListener::bind(addr).await?;
        loop {
            let (stream, remote_addr) = listener.accept().await?;
            debug!(remote_addr = %remote_addr, "Accepted new connection");

            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .serve_connection(
                        io,
                        service_fn(move |req| {
                            let handler = Arc::clone(&handler);
                            async move { handler.handle_request(req).await }
                        }),
                    )
                    .await
                {
                    debug!(error = %err, remote_addr = %remote_addr, "Error serving connection");
                }
            });
        }
    }
}
