#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus-engine-kinesis** – Amazon Kinesis broker adapter.

/// Typed Kinesis configuration and environment loading.
pub mod config;
/// The [`Engine`](eventbus_core::engine::Engine) implementation itself.
pub mod engine;

pub use config::{KinesisConfigError, KinesisEngineConfig};
pub use engine::KinesisEngine;
