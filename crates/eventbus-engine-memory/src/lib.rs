#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus-engine-memory** – In-process engines: worker-pool drop/block
//! dispatch and per-subscriber durable dispatch.

/// Shared configuration for both memory engines.
pub mod config;
/// Worker-pool drop-mode engine.
pub mod drop_engine;
/// Per-subscriber durable-mode engine.
pub mod durable_engine;

pub use config::MemoryEngineConfig;
pub use drop_engine::{DropEngine, DropEngineStats};
pub use durable_engine::DurableEngine;
