//! Configuration parsing and validation for llama-stream.

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure.
///
/// Built once at startup and shared read-only for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the chat-completion backend (e.g., "http://localhost:8000")
    #[serde(default = "default_target_url")]
    pub target_url: String,
    /// TLS verification policy for `https` targets
    #[serde(default)]
    pub verify_ssl: TlsVerification,
    /// Outbound request timeout in seconds; transport default when absent
    #[serde(default)]
    pub request_timeout: Option<f64>,
    /// Number of characters per simulated streaming chunk
    #[serde(default = "default_chunk_size")]
    pub streaming_chunk_size: usize,
    /// Port the proxy listens on
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_target_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_chunk_size() -> usize {
    50
}

fn default_proxy_port() -> u16 {
    8066
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            verify_ssl: TlsVerification::default(),
            request_timeout: None,
            streaming_chunk_size: default_chunk_size(),
            proxy_port: default_proxy_port(),
            log_level: default_log_level(),
        }
    }
}

/// How the backend's TLS certificate is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Verify against the built-in trust roots
    #[default]
    Enabled,
    /// Accept any certificate
    Disabled,
    /// Verify against the PEM bundle at this path only
    CaBundle(PathBuf),
}

impl std::fmt::Display for TlsVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsVerification::Enabled => write!(f, "enabled"),
            TlsVerification::Disabled => write!(f, "disabled"),
            TlsVerification::CaBundle(path) => write!(f, "ca-bundle ({})", path.display()),
        }
    }
}

impl From<bool> for TlsVerification {
    fn from(verify: bool) -> Self {
        if verify {
            TlsVerification::Enabled
        } else {
            TlsVerification::Disabled
        }
    }
}

impl From<&str> for TlsVerification {
    /// "true"/"false" in any case are booleans; anything else is a bundle path.
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("true") {
            TlsVerification::Enabled
        } else if value.eq_ignore_ascii_case("false") {
            TlsVerification::Disabled
        } else {
            TlsVerification::CaBundle(PathBuf::from(value))
        }
    }
}

impl<'de> Deserialize<'de> for TlsVerification {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Flag(flag) => TlsVerification::from(flag),
            Raw::Text(text) => TlsVerification::from(text.as_str()),
        })
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_url.starts_with("http://") || self.target_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "target_url must start with http:// or https://, got '{}'",
                self.target_url
            )));
        }

        if self.streaming_chunk_size == 0 {
            return Err(ConfigError::Validation(
                "streaming_chunk_size must be greater than zero".to_string(),
            ));
        }

        if let Some(secs) = self.request_timeout {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(ConfigError::Validation(format!(
                    "request_timeout must be a positive number of seconds, got {}",
                    secs
                )));
            }
        }

        if self.is_https() && self.verify_ssl == TlsVerification::Disabled {
            tracing::warn!("TLS verification is disabled for the backend");
        }

        Ok(())
    }

    /// Whether the backend is reached over TLS.
    pub fn is_https(&self) -> bool {
        self.target_url.starts_with("https://")
    }

    /// Outbound request timeout, if configured and representable.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// The configured log level as a tracing directive, or `None` if unrecognized.
    ///
    /// Case-insensitive; also accepts `warning` and `critical`.
    pub fn normalized_log_level(&self) -> Option<&'static str> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" => Some("trace"),
            "debug" => Some("debug"),
            "info" => Some("info"),
            "warn" | "warning" => Some("warn"),
            "error" | "critical" => Some("error"),
            "off" => Some("off"),
            _ => None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
