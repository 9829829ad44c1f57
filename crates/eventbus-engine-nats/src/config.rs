//! Typed NATS adapter configuration.

use serde::{Deserialize, Serialize};

/// Configuration for connecting to a NATS server or cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatsEngineConfig {
    /// Comma-separated list of NATS server URLs, e.g. `nats://localhost:4222`.
    pub server_urls: String,
    /// Connection timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

/// Errors raised while building a [`NatsEngineConfig`] from the process
/// environment.
#[derive(Debug, thiserror::Error)]
pub enum NatsConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),
    /// `NATS_TIMEOUT_MS` was set but not a valid integer.
    #[error("NATS_TIMEOUT_MS must be a valid number")]
    InvalidTimeout,
}

impl NatsEngineConfig {
    /// Build configuration from `NATS_SERVER_URLS` (required) and optional
    /// `NATS_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, NatsConfigError> {
        let server_urls =
            std::env::var("NATS_SERVER_URLS").map_err(|_| NatsConfigError::MissingEnv("NATS_SERVER_URLS"))?;
        let timeout_ms = match std::env::var("NATS_TIMEOUT_MS") {
            Ok(raw) => raw.parse().map_err(|_| NatsConfigError::InvalidTimeout)?,
            Err(_) => default_timeout_ms(),
        };
        Ok(Self { server_urls, timeout_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let cfg: NatsEngineConfig = serde_json::from_str(r#"{"serverUrls": "nats://localhost:4222"}"#).unwrap();
        assert_eq!(cfg.timeout_ms, default_timeout_ms());
    }
}
