//! Error types for llama-stream.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for llama-stream operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for llama-stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("{kind}: {message}")]
    Upstream {
        kind: UpstreamFailure,
        message: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Category of a failed backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    /// TLS handshake or certificate verification failed
    Tls,
    /// Connection refused or host unreachable
    Connect,
    /// The configured deadline elapsed
    Timeout,
    /// Any other transport fault
    Other,
}

impl UpstreamFailure {
    /// Classify a transport error from the HTTP client.
    ///
    /// TLS problems surface from reqwest as connect errors, so they are
    /// recognized first by inspecting the source chain. A connect timeout is
    /// a connect failure, not a gateway timeout.
    pub fn classify(err: &reqwest::Error) -> Self {
        if is_tls_error(err) {
            UpstreamFailure::Tls
        } else if err.is_connect() {
            UpstreamFailure::Connect
        } else if err.is_timeout() {
            UpstreamFailure::Timeout
        } else {
            UpstreamFailure::Other
        }
    }

    /// Status code reported to the client for this failure.
    pub fn status_code(self) -> StatusCode {
        match self {
            UpstreamFailure::Tls => StatusCode::BAD_GATEWAY,
            UpstreamFailure::Connect => StatusCode::SERVICE_UNAVAILABLE,
            UpstreamFailure::Timeout => StatusCode::GATEWAY_TIMEOUT,
            UpstreamFailure::Other => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamFailure::Tls => write!(f, "TLS error"),
            UpstreamFailure::Connect => write!(f, "Service unavailable"),
            UpstreamFailure::Timeout => write!(f, "Gateway timeout"),
            UpstreamFailure::Other => write!(f, "Upstream request failed"),
        }
    }
}

const TLS_MARKERS: [&str; 4] = ["certificate", "ssl", "tls", "handshake"];

fn is_tls_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(cause) = source {
        let text = cause.to_string().to_lowercase();
        if TLS_MARKERS.iter().any(|marker| text.contains(marker)) {
            return true;
        }
        source = cause.source();
    }
    false
}

impl Error {
    /// Build an upstream error from a reqwest transport failure.
    pub fn upstream(err: &reqwest::Error) -> Self {
        Error::Upstream {
            kind: UpstreamFailure::classify(err),
            message: err.to_string(),
        }
    }

    /// The backend stayed silent for longer than the configured timeout.
    pub fn timed_out(waited: std::time::Duration) -> Self {
        Error::Upstream {
            kind: UpstreamFailure::Timeout,
            message: format!("no data from backend within {:?}", waited),
        }
    }

    /// Status code reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::Upstream { kind, .. } => kind.status_code(),
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Return OpenAI-compatible error format
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": "proxy_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
