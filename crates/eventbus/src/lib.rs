#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus** – Facade crate: the single entry point a host application
//! depends on to publish and subscribe across a pluggable set of delivery
//! engines (in-memory drop/durable, Kafka, Kinesis, NATS) behind one topic
//! router, with CloudEvents enrichment, optional field-level encryption,
//! and tenant isolation layered on top.

mod builtin;
/// Field-level payload encryption for `publish_encrypted`.
pub mod encryption;
/// Public error type aggregating every internal crate's errors.
pub mod error;
/// The [`EventBus`] facade itself.
pub mod bus;
/// Tenant-scoped publish/subscribe helpers.
pub mod tenant;

pub use bus::EventBus;
pub use encryption::{EncryptionError, FieldEncryptor};
pub use error::BusError;

pub use eventbus_core::engine::Handler;
pub use eventbus_core::{BusConfig, Context, Observer};
pub use eventbus_types::{
    CoreError, EncryptedField, EncryptionResult, EngineConfig, Event, PartitionKey, RoutingRule, SubscriptionHandle,
    SubscriptionKind, TenantId,
};
