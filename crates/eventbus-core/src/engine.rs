//! Engine trait and handler type shared by every in-memory and external
//! broker adapter.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eventbus_types::{Event, PartitionKey, SubscriptionHandle, SubscriptionKind};
use futures::future::BoxFuture;

use crate::context::{Context, ContextError};

/// Subscriber callback: `(ctx, event) -> error | void`. The context passed
/// at invocation carries whatever cancellation scope the delivering engine
/// runs its dispatch under, so a handler can observe engine shutdown or a
/// caller-supplied deadline without the engine needing a second signaling
/// path.
pub type Handler = Arc<dyn Fn(Context, Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Errors raised by an [`Engine`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine's configuration failed validation.
    #[error("invalid engine configuration: {0}")]
    Configuration(String),
    /// Connecting to (or validating connectivity with) the backing broker
    /// failed.
    #[error("engine connection error: {0}")]
    Connection(#[source] anyhow::Error),
    /// An operation requiring a started engine was called before `start`.
    #[error("engine has not been started")]
    NotStarted,
    /// `start` was called on an already-started engine.
    #[error("engine has already been started")]
    AlreadyStarted,
    /// `stop` did not complete before its shutdown deadline.
    #[error("shutdown timed out waiting for in-flight work to drain")]
    ShutdownTimeout,
    /// A handler or subscription was addressed using an identity this
    /// engine does not own.
    #[error("subscription does not belong to this engine")]
    InvalidSubscription,
    /// The caller's context was cancelled, or its deadline elapsed, before
    /// the operation completed.
    #[error(transparent)]
    Cancelled(#[from] ContextError),
    /// Any other engine-specific failure, propagated with context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Behavior common to every engine backing the bus: in-memory drop/durable
/// dispatch as well as the external broker adapters.
///
/// Implementations must be safe to share across tasks (`Arc<dyn Engine>`)
/// and must tolerate concurrent `publish`/`subscribe`/`unsubscribe` calls
/// once started. Every method takes a [`Context`] as its first argument;
/// cancelling it (or letting its deadline elapse) aborts the wait and
/// returns [`EngineError::Cancelled`].
#[async_trait]
pub trait Engine: Send + Sync + fmt::Debug {
    /// Stable name this engine instance was registered under.
    fn name(&self) -> &str;

    /// Start background workers / validate connectivity / create backing
    /// resources. Idempotent: calling `start` twice returns
    /// [`EngineError::AlreadyStarted`].
    async fn start(&self, ctx: Context) -> Result<(), EngineError>;

    /// Stop background workers and release resources, awaiting in-flight
    /// work. Idempotent.
    async fn stop(&self, ctx: Context) -> Result<(), EngineError>;

    /// Deliver `event` to every subscription matching its topic.
    /// `partition_key` is forwarded to adapters that use it (Kafka,
    /// Kinesis); in-memory and NATS engines ignore it.
    async fn publish(&self, ctx: Context, event: Event, partition_key: PartitionKey) -> Result<(), EngineError>;

    /// Register `handler` against `topic`, matched per the topic wildcard
    /// rules.
    async fn subscribe(
        &self,
        ctx: Context,
        topic: &str,
        kind: SubscriptionKind,
        handler: Handler,
    ) -> Result<SubscriptionHandle, EngineError>;

    /// Remove a subscription. Idempotent; no further invocations occur
    /// after this returns.
    async fn unsubscribe(&self, ctx: Context, handle: SubscriptionHandle) -> Result<(), EngineError>;

    /// Snapshot of topics with at least one live subscriber.
    fn topics(&self) -> Vec<String>;

    /// Number of live subscribers for `topic`.
    fn subscriber_count(&self, topic: &str) -> usize;
}
