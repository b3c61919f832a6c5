//! Gateway API server.

use crate::api::create_router;
use crate::error::{DockerError, Result};
use crate::trace::request_span;
use axum::Router;
use axum::body::Body;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tower::Service;
use tower_http::trace::TraceLayer;
use warden_core::{Endpoint, Policy};

/// Serves the restricted engine API on one endpoint.
pub struct DockerApiServer {
    endpoint: Endpoint,
    app: Router,
}

impl DockerApiServer {
    /// Creates a server for `endpoint` fronting `policy`.
    #[must_use]
    pub fn new(endpoint: Endpoint, policy: Policy, api_version: &str) -> Self {
        let app = create_router(policy, api_version)
            .layer(TraceLayer::new_for_http().make_span_with(request_span::<Body>));
        Self { endpoint, app }
    }

    /// Returns the listening endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Binds the endpoint and serves until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or accepting fails.
    pub async fn run(&self) -> Result<()> {
        match &self.endpoint {
            Endpoint::Unix(path) => {
                // Stale socket from a previous run.
                let _ = std::fs::remove_file(path);
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let listener = UnixListener::bind(path)
                    .map_err(|e| DockerError::Server(format!("failed to bind {}: {e}", self.endpoint)))?;
                tracing::info!("API server listening on {}", self.endpoint);
                loop {
                    let (stream, _) = listener
                        .accept()
                        .await
                        .map_err(|e| DockerError::Server(e.to_string()))?;
                    self.serve_connection(stream);
                }
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| DockerError::Server(format!("failed to bind {}: {e}", self.endpoint)))?;
                tracing::info!("API server listening on {}", self.endpoint);
                loop {
                    let (stream, peer) = listener
                        .accept()
                        .await
                        .map_err(|e| DockerError::Server(e.to_string()))?;
                    tracing::debug!(%peer, "accepted connection");
                    self.serve_connection(stream);
                }
            }
        }
    }

    fn serve_connection<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let tower_service = self.app.clone();
        tokio::spawn(async move {
            let hyper_service = hyper::service::service_fn(move |request: hyper::Request<Incoming>| {
                tower_service.clone().call(request)
            });

            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), hyper_service)
                .with_upgrades()
                .await
            {
                let err_str = err.to_string().to_lowercase();
                if !err_str.contains("shutting down")
                    && !err_str.contains("connection reset")
                    && !err_str.contains("broken pipe")
                {
                    tracing::error!("Error serving connection: {}", err);
                }
            }
        });
    }
}
