#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus-engine-kafka** – Kafka broker adapter built on `rdkafka`.

/// Typed Kafka configuration and environment loading.
pub mod config;
/// The [`Engine`](eventbus_core::engine::Engine) implementation itself.
pub mod engine;

pub use config::{KafkaConfigError, KafkaEngineConfig};
pub use engine::KafkaEngine;
