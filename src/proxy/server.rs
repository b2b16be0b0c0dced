//! HTTP server setup and configuration.

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::Request,
    routing::get,
    Router,
};
use reqwest::{Certificate, Client};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::handlers;
use crate::config::{Config, ConfigError, TlsVerification};
use crate::error::Error;

/// Largest accepted inbound request body.
pub const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub http_client: Client,
    pub config: Arc<Config>,
}

impl AppState {
    /// Build the state, including the backend HTTP client.
    pub fn new(config: Config) -> crate::Result<Self> {
        let http_client = build_http_client(&config)?;
        Ok(Self {
            http_client,
            config: Arc::new(config),
        })
    }
}

/// Build the HTTP client used for every backend call.
///
/// TLS settings only matter for `https` targets; plain `http` targets keep
/// the client defaults. `request_timeout` bounds connection setup here; the
/// other phases are bounded per call in `forward`.
pub fn build_http_client(config: &Config) -> crate::Result<Client> {
    let mut builder = Client::builder();

    if let Some(timeout) = config.request_timeout() {
        builder = builder.connect_timeout(timeout);
    }

    if config.is_https() {
        match &config.verify_ssl {
            TlsVerification::Enabled => {}
            TlsVerification::Disabled => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            TlsVerification::CaBundle(path) => {
                let pem = std::fs::read(path).map_err(|e| ConfigError::Io {
                    path: path.display().to_string(),
                    source: e,
                })?;
                let certs = Certificate::from_pem_bundle(&pem).map_err(|e| {
                    ConfigError::Validation(format!(
                        "Invalid CA bundle '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                builder = builder.tls_built_in_root_certs(false);
                for cert in certs {
                    builder = builder.add_root_certificate(cert);
                }
            }
        }
    }

    builder
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            handlers::MODELS_PATH,
            get(handlers::list_models).post(handlers::chat_completions),
        )
        // Any other POST is a chat completion; any other GET is a 404
        .fallback(handlers::fallback)
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    request_id = %Uuid::new_v4(),
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
}

/// Run the HTTP server until Ctrl-C.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.proxy_port));

    tracing::info!(target_url = %config.target_url, "Targeting backend");
    if config.is_https() {
        tracing::info!(verify_ssl = %config.verify_ssl, "TLS verification for backend");
    }

    let state = AppState::new(config)?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting llama-stream proxy server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Server shutting down...");
}
