//! CloudEvents-shaped internal lifecycle events (§ Observability).
//!
//! The bus notifies host-supplied [`Observer`]s of its own lifecycle —
//! config loaded, engines starting/stopping, messages flowing,
//! subscriptions coming and going — using the same [`Event`] shape that
//! carries application traffic, so a host can route internal events through
//! the same sinks it already uses.

use std::sync::Arc;

use async_trait::async_trait;
use eventbus_types::{Event, SubscriptionId};
use tokio::sync::RwLock;

/// Lifecycle event type names, used as `Event.topic` for internal
/// notifications.
pub mod event_type {
    /// Emitted once bus configuration has been parsed and validated.
    pub const CONFIG_LOADED: &str = "config.loaded";
    /// Emitted after every configured engine has started.
    pub const BUS_STARTED: &str = "bus.started";
    /// Emitted after every engine has stopped.
    pub const BUS_STOPPED: &str = "bus.stopped";
    /// Emitted for every successful publish.
    pub const MESSAGE_PUBLISHED: &str = "message.published";
    /// Emitted for every handler invocation.
    pub const MESSAGE_RECEIVED: &str = "message.received";
    /// Emitted when a handler invocation returns an error.
    pub const MESSAGE_FAILED: &str = "message.failed";
    /// Emitted when a subscription is created.
    pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
    /// Emitted when a subscription is removed.
    pub const SUBSCRIPTION_REMOVED: &str = "subscription.removed";
    /// Emitted the first time a topic gains a subscriber.
    pub const TOPIC_CREATED: &str = "topic.created";
    /// Emitted when a topic loses its last subscriber.
    pub const TOPIC_DELETED: &str = "topic.deleted";
}

/// Receives internal bus lifecycle notifications.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Called once per lifecycle event. Implementations must not block —
    /// offload slow work to a background task.
    async fn on_event(&self, event: &Event);
}

/// Holds the set of registered observers and fans lifecycle events out to
/// all of them.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { observers: RwLock::new(Vec::new()) }
    }

    /// Register `observer` to receive future lifecycle events.
    pub async fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.write().await.push(observer);
    }

    /// Notify every registered observer of `event`, sequentially. A failing
    /// observer does not prevent the others from being notified.
    pub async fn notify_observers(&self, event: &Event) {
        let observers = self.observers.read().await;
        for observer in observers.iter() {
            observer.on_event(event).await;
        }
    }
}

/// Build a lifecycle [`Event`] of `event_type` carrying `engine`, `topic`,
/// and `subscription_id` as metadata when present.
pub fn lifecycle_event(
    event_type: &str,
    engine: Option<&str>,
    topic: Option<&str>,
    subscription_id: Option<SubscriptionId>,
) -> Event {
    let mut event = Event::new(event_type, serde_json::Value::Null);
    if let Some(engine) = engine {
        event = event.with_metadata("engine", engine);
    }
    if let Some(topic) = topic {
        event = event.with_metadata("topic", topic);
    }
    if let Some(id) = subscription_id {
        event = event.with_metadata("subscription_id", id.to_string());
    }
    event
}
