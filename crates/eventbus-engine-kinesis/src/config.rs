//! Typed Kinesis adapter configuration.

use serde::{Deserialize, Serialize};

/// Configuration for connecting to an Amazon Kinesis account/region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisEngineConfig {
    /// AWS region, e.g. `us-east-1`.
    pub region: String,
    /// Optional custom endpoint, used for LocalStack/test doubles.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Operation timeout in milliseconds for `PutRecord`/`GetRecords` calls.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay between `GetRecords` polls on a shard, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

/// Errors raised while building a [`KinesisEngineConfig`] from the process
/// environment.
#[derive(Debug, thiserror::Error)]
pub enum KinesisConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),
    /// A numeric environment variable was set but not a valid integer.
    #[error("{0} must be a valid number")]
    InvalidNumber(&'static str),
}

impl KinesisEngineConfig {
    /// Build configuration from `KINESIS_REGION` (required) and optional
    /// `KINESIS_ENDPOINT_URL` / `KINESIS_TIMEOUT_MS` / `KINESIS_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, KinesisConfigError> {
        let region =
            std::env::var("KINESIS_REGION").map_err(|_| KinesisConfigError::MissingEnv("KINESIS_REGION"))?;
        let endpoint_url = std::env::var("KINESIS_ENDPOINT_URL").ok();
        let timeout_ms = match std::env::var("KINESIS_TIMEOUT_MS") {
            Ok(raw) => raw.parse().map_err(|_| KinesisConfigError::InvalidNumber("KINESIS_TIMEOUT_MS"))?,
            Err(_) => default_timeout_ms(),
        };
        let poll_interval_ms = match std::env::var("KINESIS_POLL_INTERVAL_MS") {
            Ok(raw) => raw.parse().map_err(|_| KinesisConfigError::InvalidNumber("KINESIS_POLL_INTERVAL_MS"))?,
            Err(_) => default_poll_interval_ms(),
        };

        Ok(Self { region, endpoint_url, timeout_ms, poll_interval_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let cfg: KinesisEngineConfig = serde_json::from_str(r#"{"region": "us-east-1"}"#).unwrap();
        assert_eq!(cfg.timeout_ms, default_timeout_ms());
        assert_eq!(cfg.poll_interval_ms, default_poll_interval_ms());
        assert!(cfg.endpoint_url.is_none());
    }
}
