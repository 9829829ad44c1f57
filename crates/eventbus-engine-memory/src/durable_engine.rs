//! Per-subscriber durable in-memory engine (§ Memory Engine — Durable Mode).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use eventbus_core::context::Context;
use eventbus_core::engine::{Engine, EngineError, Handler};
use eventbus_core::matcher;
use eventbus_core::observability::{event_type, lifecycle_event, ObserverRegistry};
use eventbus_core::queue::{DurableQueue, QueueError};
use eventbus_types::{Event, PartitionKey, SubscriptionHandle, SubscriptionId, SubscriptionKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MemoryEngineConfig;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
const UNSUBSCRIBE_DRAIN_WAIT: Duration = Duration::from_millis(100);

struct DurableSubscription {
    id: SubscriptionId,
    #[allow(dead_code)]
    kind: SubscriptionKind,
    queue: Arc<DurableQueue<Event>>,
    cancel: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
}

type TopicMap = HashMap<String, HashMap<Uuid, DurableSubscription>>;

/// Durable in-memory engine: each subscription owns a dedicated
/// [`DurableQueue`] and dispatch task, giving zero-loss, strict per-subscription
/// FIFO delivery at the cost of backpressuring the publisher.
pub struct DurableEngine {
    name: String,
    config: MemoryEngineConfig,
    subscriptions: RwLock<TopicMap>,
    engine_cancel: CancellationToken,
    started: AtomicBool,
    observers: Arc<ObserverRegistry>,
}

impl std::fmt::Debug for DurableEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableEngine").field("name", &self.name).finish()
    }
}

impl DurableEngine {
    /// Construct a durable-mode engine named `name` with `config`, reporting
    /// lifecycle events through `observers`.
    pub fn new(name: impl Into<String>, config: MemoryEngineConfig, observers: Arc<ObserverRegistry>) -> Self {
        Self {
            name: name.into(),
            config,
            subscriptions: RwLock::new(HashMap::new()),
            engine_cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            observers,
        }
    }

    fn queue_depth(&self) -> usize {
        self.config.max_durable_queue_depth.max(self.config.max_event_queue_size)
    }
}

#[async_trait]
impl Engine for DurableEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn start(&self, _ctx: Context) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }
        tracing::info!(engine = %self.name, "durable engine started");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn stop(&self, ctx: Context) -> Result<(), EngineError> {
        self.engine_cancel.cancel();
        let dispatchers: Vec<JoinHandle<()>> = {
            let mut subscriptions = self.subscriptions.write().expect("subscriptions lock poisoned");
            subscriptions
                .values_mut()
                .flat_map(|subs| subs.values_mut())
                .filter_map(|sub| {
                    sub.cancel.cancel();
                    sub.queue.close();
                    sub.dispatcher.take()
                })
                .collect()
        };
        match ctx.or_deadline(SHUTDOWN_DEADLINE).run(futures::future::join_all(dispatchers)).await {
            Ok(_) => {
                tracing::info!(engine = %self.name, "durable engine stopped");
                Ok(())
            }
            Err(_) => Err(EngineError::ShutdownTimeout),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, event), fields(engine = %self.name, topic = %event.topic))]
    async fn publish(&self, ctx: Context, event: Event, _partition_key: PartitionKey) -> Result<(), EngineError> {
        let matching: Vec<Arc<DurableQueue<Event>>> = {
            let subscriptions = self.subscriptions.read().expect("subscriptions lock poisoned");
            subscriptions
                .iter()
                .filter(|(pattern, _)| matcher::matches(&event.topic, pattern))
                .flat_map(|(_, subs)| subs.values().map(|sub| sub.queue.clone()))
                .collect()
        };

        for queue in matching {
            match queue.push(event.clone(), ctx.cancel_token()).await {
                Ok(()) => {}
                Err(QueueError::Cancelled) | Err(QueueError::Closed) => {
                    // Caller cancelled, or the subscription was removed
                    // mid-publish: a silent no-op, not an error, per the
                    // durable-mode delivery contract.
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, handler), fields(engine = %self.name, topic = %topic))]
    async fn subscribe(
        &self,
        _ctx: Context,
        topic: &str,
        kind: SubscriptionKind,
        handler: Handler,
    ) -> Result<SubscriptionHandle, EngineError> {
        let id = Uuid::new_v4();
        let queue = Arc::new(DurableQueue::new(self.queue_depth()));
        let cancel = self.engine_cancel.child_token();

        let dispatch_queue = queue.clone();
        let dispatch_cancel = cancel.clone();
        let engine_name = self.name.clone();
        let observers = self.observers.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(event) = dispatch_queue.pop(&dispatch_cancel).await {
                let received = lifecycle_event(
                    event_type::MESSAGE_RECEIVED,
                    Some(&engine_name),
                    Some(&event.topic),
                    None,
                );
                observers.notify_observers(&received).await;

                let handler_ctx = Context::from_token(dispatch_cancel.clone());
                if let Err(err) = handler(handler_ctx, event.clone()).await {
                    tracing::error!(engine = %engine_name, error = %err, "handler invocation failed");
                    let failed = lifecycle_event(
                        event_type::MESSAGE_FAILED,
                        Some(&engine_name),
                        Some(&event.topic),
                        None,
                    );
                    observers.notify_observers(&failed).await;
                }
            }
        });

        let is_new_topic = {
            let mut subscriptions = self.subscriptions.write().expect("subscriptions lock poisoned");
            let is_new_topic = !subscriptions.contains_key(topic);
            subscriptions.entry(topic.to_string()).or_default().insert(
                id,
                DurableSubscription { id, kind, queue, cancel, dispatcher: Some(dispatcher) },
            );
            is_new_topic
        };

        let created = lifecycle_event(event_type::SUBSCRIPTION_CREATED, Some(&self.name), Some(topic), Some(id));
        self.observers.notify_observers(&created).await;
        if is_new_topic {
            let topic_created = lifecycle_event(event_type::TOPIC_CREATED, Some(&self.name), Some(topic), None);
            self.observers.notify_observers(&topic_created).await;
        }

        Ok(SubscriptionHandle { id, engine: self.name.clone() })
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn unsubscribe(&self, ctx: Context, handle: SubscriptionHandle) -> Result<(), EngineError> {
        if handle.engine != self.name {
            return Err(EngineError::InvalidSubscription);
        }
        let (removed, removed_topics) = {
            let mut subscriptions = self.subscriptions.write().expect("subscriptions lock poisoned");
            let mut found = None;
            let mut empty_topics = Vec::new();
            for (topic, subs) in subscriptions.iter_mut() {
                if let Some(mut sub) = subs.remove(&handle.id) {
                    sub.cancel.cancel();
                    sub.queue.close();
                    found = sub.dispatcher.take();
                }
                if subs.is_empty() {
                    empty_topics.push(topic.clone());
                }
            }
            for topic in &empty_topics {
                subscriptions.remove(topic);
            }
            (found, empty_topics)
        };
        if let Some(dispatcher) = removed {
            let _ = ctx.or_deadline(UNSUBSCRIBE_DRAIN_WAIT).run(dispatcher).await;
        }

        let removed_event = lifecycle_event(event_type::SUBSCRIPTION_REMOVED, Some(&self.name), None, Some(handle.id));
        self.observers.notify_observers(&removed_event).await;
        for topic in removed_topics {
            let deleted = lifecycle_event(event_type::TOPIC_DELETED, Some(&self.name), Some(&topic), None);
            self.observers.notify_observers(&deleted).await;
        }
        Ok(())
    }

    fn topics(&self) -> Vec<String> {
        self.subscriptions.read().expect("subscriptions lock poisoned").keys().cloned().collect()
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions.read().expect("subscriptions lock poisoned").get(topic).map(HashMap::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_ctx, _event| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    fn test_engine(config: MemoryEngineConfig) -> DurableEngine {
        DurableEngine::new("durable", config, Arc::new(ObserverRegistry::new()))
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscribers_in_order() {
        let engine = test_engine(MemoryEngineConfig::default());
        engine.start(Context::none()).await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        engine.subscribe(Context::none(), "orders.*", SubscriptionKind::Sync, counting_handler(counter.clone())).await.unwrap();

        for _ in 0..10 {
            engine.publish(Context::none(), Event::new("orders.created", serde_json::Value::Null), None).await.unwrap();
        }
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        engine.stop(Context::none()).await.unwrap();
    }

    #[tokio::test]
    async fn publish_blocks_until_full_queue_drains() {
        let mut cfg = MemoryEngineConfig::default();
        cfg.max_durable_queue_depth = 1;
        cfg.max_event_queue_size = 1;
        let engine = Arc::new(DurableEngine::new("durable", cfg, Arc::new(ObserverRegistry::new())));
        engine.start(Context::none()).await.unwrap();

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let handler: Handler = Arc::new(move |_ctx, _event| {
            let release_rx = release_rx.clone();
            Box::pin(async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(())
            })
        });
        engine.subscribe(Context::none(), "t", SubscriptionKind::Sync, handler).await.unwrap();

        engine.publish(Context::none(), Event::new("t", serde_json::Value::Null), None).await.unwrap();

        let engine2 = engine.clone();
        let second_publish = tokio::spawn(async move {
            engine2.publish(Context::none(), Event::new("t", serde_json::Value::Null), None).await
        });

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(!second_publish.is_finished());

        release_tx.send(()).unwrap();
        second_publish.await.unwrap().unwrap();
        engine.stop(Context::none()).await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_deliveries() {
        let engine = test_engine(MemoryEngineConfig::default());
        engine.start(Context::none()).await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = engine.subscribe(Context::none(), "t", SubscriptionKind::Sync, counting_handler(counter.clone())).await.unwrap();

        engine.unsubscribe(Context::none(), handle).await.unwrap();
        engine.publish(Context::none(), Event::new("t", serde_json::Value::Null), None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        engine.stop(Context::none()).await.unwrap();
    }
}
