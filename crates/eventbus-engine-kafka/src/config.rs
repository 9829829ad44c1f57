//! Typed Kafka adapter configuration.

use serde::{Deserialize, Serialize};

/// Configuration for connecting to a Kafka cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaEngineConfig {
    /// Comma-separated list of broker addresses.
    pub bootstrap_servers: String,
    /// Consumer group id shared by every topic this engine consumes.
    pub consumer_group_id: String,
    /// Operation timeout in milliseconds for produce calls.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// `security.protocol` passed to `rdkafka`, e.g. `PLAINTEXT`, `SASL_SSL`.
    #[serde(default = "default_security_protocol")]
    pub security_protocol: String,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_security_protocol() -> String {
    "PLAINTEXT".to_string()
}

/// Errors raised while building a [`KafkaEngineConfig`] from the process
/// environment.
#[derive(Debug, thiserror::Error)]
pub enum KafkaConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),
    /// `KAFKA_TIMEOUT_MS` was set but not a valid integer.
    #[error("KAFKA_TIMEOUT_MS must be a valid number")]
    InvalidTimeout,
}

impl KafkaEngineConfig {
    /// Build configuration from `KAFKA_BOOTSTRAP_SERVERS`,
    /// `KAFKA_CONSUMER_GROUP_ID` (required), and optional
    /// `KAFKA_TIMEOUT_MS` / `KAFKA_SECURITY_PROTOCOL`.
    pub fn from_env() -> Result<Self, KafkaConfigError> {
        let bootstrap_servers = std::env::var("KAFKA_BOOTSTRAP_SERVERS")
            .map_err(|_| KafkaConfigError::MissingEnv("KAFKA_BOOTSTRAP_SERVERS"))?;
        let consumer_group_id = std::env::var("KAFKA_CONSUMER_GROUP_ID")
            .map_err(|_| KafkaConfigError::MissingEnv("KAFKA_CONSUMER_GROUP_ID"))?;
        let timeout_ms = match std::env::var("KAFKA_TIMEOUT_MS") {
            Ok(raw) => raw.parse().map_err(|_| KafkaConfigError::InvalidTimeout)?,
            Err(_) => default_timeout_ms(),
        };
        let security_protocol =
            std::env::var("KAFKA_SECURITY_PROTOCOL").unwrap_or_else(|_| default_security_protocol());

        Ok(Self { bootstrap_servers, consumer_group_id, timeout_ms, security_protocol })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let cfg: KafkaEngineConfig = serde_json::from_str(
            r#"{"bootstrapServers": "localhost:9092", "consumerGroupId": "g1"}"#,
        )
        .unwrap();
        assert_eq!(cfg.timeout_ms, default_timeout_ms());
        assert_eq!(cfg.security_protocol, "PLAINTEXT");
    }
}
