#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus-core** – Engine trait, process-wide registry, topic matcher,
//! durable queue, router, and observability contracts shared by every
//! engine implementation and the facade.

/// Bus-level configuration surface.
pub mod config;
/// Caller-supplied cancellation/deadline context.
pub mod context;
/// The [`Engine`] trait and its handler/error types.
pub mod engine;
/// Topic wildcard matching.
pub mod matcher;
/// CloudEvents-shaped internal lifecycle events.
pub mod observability;
/// Process-wide engine type registry.
pub mod registry;
/// Topic router.
pub mod router;
/// Bounded durable queue.
pub mod queue;

pub use config::{BusConfig, ConfigError};
pub use context::{Context, ContextError};
pub use engine::{Engine, EngineError, Handler};
pub use observability::{event_type, Observer, ObserverRegistry};
pub use queue::{DurableQueue, QueueError};
pub use registry::{EngineFactory, RegistryError};
pub use router::Router;
