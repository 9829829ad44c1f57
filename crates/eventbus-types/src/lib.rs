#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **eventbus-types** – Shared primitive data structures for the Toka event bus.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph so
//! that every engine, codec, and facade crate can depend on it without
//! causing cycles. It makes no assumptions about delivery mechanics, wire
//! formats, or concurrency strategy — those live in `eventbus-core` and the
//! engine crates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//─────────────────────────────
//  Core identifiers
//─────────────────────────────

/// Unique identifier for a subscription (UUID v4).
pub type SubscriptionId = Uuid;

/// Unique identifier for an event (UUID v4).
pub type EventId = Uuid;

//─────────────────────────────
//  Event
//─────────────────────────────

/// Canonical event record carried through the bus.
///
/// `payload` is stored as a [`serde_json::Value`] so the same representation
/// survives both native publishes and CloudEvents decode/encode without a
/// second conversion step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Stable event identity, assigned at construction.
    pub id: EventId,
    /// Topic this event was published on. Non-empty once published.
    pub topic: String,
    /// Arbitrary JSON payload. `Value::Null` represents "no payload".
    pub payload: serde_json::Value,
    /// String-keyed metadata, including `ce_*` CloudEvents attributes and
    /// encryption extension attributes.
    pub metadata: HashMap<String, String>,
    /// Wall-clock creation time. Set by the first engine that handles the
    /// event if the publisher left it unset.
    pub created_at: DateTime<Utc>,
    /// Set when a dispatcher begins invoking handlers for this event.
    pub processing_started: Option<DateTime<Utc>>,
    /// Set when the last handler invocation for this event completes.
    pub processing_completed: Option<DateTime<Utc>>,
}

impl Event {
    /// Construct a new event for `topic` carrying `payload`.
    ///
    /// `id` and `created_at` are assigned here; callers that decode an event
    /// from an external representation should use [`Event::from_parts`]
    /// instead so an explicit id/timestamp can be preserved.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            metadata: HashMap::new(),
            created_at: Utc::now(),
            processing_started: None,
            processing_completed: None,
        }
    }

    /// Construct an event from fully specified parts, as produced by the
    /// codec when decoding an external record.
    pub fn from_parts(
        id: EventId,
        topic: impl Into<String>,
        payload: serde_json::Value,
        metadata: HashMap<String, String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            payload,
            metadata,
            created_at,
            processing_started: None,
            processing_completed: None,
        }
    }

    /// Insert or replace a metadata entry, returning `self` for chaining.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

//─────────────────────────────
//  Subscription identity
//─────────────────────────────

/// Immutable identity of a subscription, as seen from outside the engine
/// that owns it. The live handler, cancellation, and dispatch state stay
/// inside the engine — this is the handle a caller retains to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    /// Subscription identity.
    pub id: SubscriptionId,
    /// Name of the engine that owns this subscription.
    pub engine: String,
}

/// Whether a subscription was created via `Subscribe` (serial, synchronous
/// w.r.t. one subscription) or `SubscribeAsync` (fan-out permitted by the
/// drop engine's worker pool). Stored on the durable engine purely for API
/// symmetry — it has no shared worker pool to fan out onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionKind {
    /// Synchronous subscription.
    Sync,
    /// Asynchronous subscription.
    Async,
}

//─────────────────────────────
//  Engine configuration
//─────────────────────────────

/// Declarative configuration for one named engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Unique name for this engine instance within a bus.
    pub name: String,
    /// Registered engine type, resolved via the engine registry.
    #[serde(rename = "type")]
    pub engine_type: String,
    /// Engine-specific configuration, deserialized by the engine's factory.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// One routing rule: a topic pattern list mapped to a target engine name.
/// Rules are evaluated in declared order; the first matching pattern wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    /// Topic patterns (§ topic matcher semantics) this rule matches.
    pub topics: Vec<String>,
    /// Name of the engine this rule routes to.
    pub engine: String,
}

/// Backpressure behavior for the in-memory drop engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Drop the event for a subscriber whose task queue is full.
    Drop,
    /// Block the publisher (bounded by its context) until space frees up.
    Block,
}

impl Default for DeliveryMode {
    fn default() -> Self {
        DeliveryMode::Drop
    }
}

//─────────────────────────────
//  Partition key / tenant context
//─────────────────────────────

/// Per-publish partition-key hint carried through the call context.
///
/// `None` means "no partition key was set"; `Some(String::new())` means
/// "explicitly set to the empty string" — the two are distinguished because
/// Kafka honors an empty key while Kinesis must fall back to the topic.
pub type PartitionKey = Option<String>;

/// Tenant identifier carried through the call context for tenant-isolated
/// publish/subscribe.
pub type TenantId = String;

//─────────────────────────────
//  Envelope encryption
//─────────────────────────────

/// Result of encrypting a set of payload fields, as returned by a
/// `FieldEncryptor`. Consumed once by the encrypted-publish path and
/// discarded after extension attributes are populated on the outgoing event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionResult {
    /// The payload mapping with `encryptedFields` replaced by ciphertext
    /// objects.
    pub data: serde_json::Value,
    /// Algorithm identifier, e.g. `aes-256-gcm`.
    pub algorithm: String,
    /// Identifier of the key used to wrap the data-encryption key.
    pub key_id: String,
    /// Base64-encoded wrapped data-encryption key.
    pub wrapped_dek: String,
    /// Names of the fields that were actually encrypted.
    pub encrypted_fields: Vec<String>,
    /// Additional encryption context key-values, always set (possibly
    /// empty) on the outgoing event's `encryptioncontext` extension.
    pub context: HashMap<String, String>,
}

/// A single encrypted-field replacement value: `{iv, ciphertext, auth_tag}`,
/// all base64-encoded strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedField {
    /// Base64-encoded initialization vector.
    pub iv: String,
    /// Base64-encoded ciphertext.
    pub ciphertext: String,
    /// Base64-encoded authentication tag.
    pub auth_tag: String,
}

//─────────────────────────────
//  Cross-cutting error taxonomy
//─────────────────────────────

/// Errors shared across the bus core, memory engines, and facade: the
/// validation/lifecycle/queue families from the error taxonomy. Codec and
/// per-broker errors live in their own crates and are folded into
/// `eventbus::BusError` at the facade boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// `Subscribe`/`SubscribeAsync` was called with no handler.
    #[error("handler must not be nil")]
    HandlerNil,
    /// `Unsubscribe` was called with a subscription from a different bus.
    #[error("subscription does not belong to this bus")]
    InvalidSubscriptionType,
    /// `Publish` was called with an empty topic.
    #[error("topic must not be empty")]
    TopicEmpty,
    /// An operation requiring a started bus/engine was called before Start.
    #[error("bus or engine has not been started")]
    NotStarted,
    /// `Start` was called on an already-started bus/engine.
    #[error("bus or engine has already been started")]
    AlreadyStarted,
    /// `Stop` did not complete before its shutdown context expired.
    #[error("shutdown timed out waiting for in-flight work to drain")]
    ShutdownTimeout,
    /// A `DurableQueue` was closed while a publisher was waiting to push.
    #[error("queue was closed")]
    QueueClosed,
    /// A blocking wait was cancelled via its context/cancellation token.
    #[error("operation was cancelled: {0}")]
    Cancelled(String),
    /// Bus configuration failed validation.
    #[error("invalid bus configuration: {0}")]
    Configuration(String),
    /// A routing rule or legacy `engine` key referenced an unregistered
    /// engine type or name.
    #[error("unknown engine: {0}")]
    UnknownEngine(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_new_assigns_identity_and_timestamp() {
        let ev = Event::new("orders.created", serde_json::json!({"k": "v"}));
        assert_eq!(ev.topic, "orders.created");
        assert!(ev.metadata.is_empty());
        assert!(ev.processing_started.is_none());
    }

    #[test]
    fn with_metadata_chains() {
        let ev = Event::new("t", serde_json::Value::Null)
            .with_metadata("ce_source", "svc")
            .with_metadata("ce_id", "1");
        assert_eq!(ev.metadata.get("ce_source"), Some(&"svc".to_string()));
        assert_eq!(ev.metadata.get("ce_id"), Some(&"1".to_string()));
    }

    #[test]
    fn engine_config_roundtrips_through_json() {
        let cfg = EngineConfig {
            name: "primary".into(),
            engine_type: "memory".into(),
            config: serde_json::json!({"workerCount": 4}),
        };
        let raw = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.name, "primary");
        assert_eq!(back.engine_type, "memory");
    }

    #[test]
    fn delivery_mode_defaults_to_drop() {
        assert_eq!(DeliveryMode::default(), DeliveryMode::Drop);
    }

    #[test]
    fn partition_key_distinguishes_unset_from_empty() {
        let unset: PartitionKey = None;
        let empty: PartitionKey = Some(String::new());
        assert_ne!(unset, empty);
    }
}
