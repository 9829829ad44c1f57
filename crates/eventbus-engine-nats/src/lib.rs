#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus-engine-nats** – NATS broker adapter built on `async-nats`.

/// Typed NATS configuration and environment loading.
pub mod config;
/// The [`Engine`](eventbus_core::engine::Engine) implementation itself.
pub mod engine;

pub use config::{NatsConfigError, NatsEngineConfig};
pub use engine::NatsEngine;
