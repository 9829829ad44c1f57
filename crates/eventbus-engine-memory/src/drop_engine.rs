//! Worker-pool, drop-or-block in-memory engine (§ Memory Engine — Drop Mode).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use eventbus_core::context::Context;
use eventbus_core::engine::{Engine, EngineError, Handler};
use eventbus_core::matcher;
use eventbus_core::observability::{event_type, lifecycle_event, ObserverRegistry};
use eventbus_types::{DeliveryMode, Event, PartitionKey, SubscriptionHandle, SubscriptionId, SubscriptionKind};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::MemoryEngineConfig;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

struct SubscriptionEntry {
    id: SubscriptionId,
    #[allow(dead_code)]
    kind: SubscriptionKind,
    handler: Handler,
}

type TopicMap = HashMap<String, HashMap<Uuid, SubscriptionEntry>>;

/// Monotonic delivery counters exposed for observability.
#[derive(Debug, Default)]
pub struct DropEngineStats {
    /// Total tasks successfully enqueued for a worker to run.
    pub delivered: AtomicU64,
    /// Total tasks dropped because the shared task channel was full.
    pub dropped: AtomicU64,
}

/// Drop-mode (or block-mode) in-memory engine: a fixed worker pool drains a
/// single bounded task channel; publish fans out one task per matching
/// subscriber.
pub struct DropEngine {
    name: String,
    config: MemoryEngineConfig,
    subscriptions: RwLock<TopicMap>,
    history: RwLock<HashMap<String, VecDeque<Event>>>,
    task_tx: mpsc::Sender<(Handler, Event)>,
    task_rx: Arc<Mutex<mpsc::Receiver<(Handler, Event)>>>,
    stats: Arc<DropEngineStats>,
    cancel: CancellationToken,
    started: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
    observers: Arc<ObserverRegistry>,
}

impl std::fmt::Debug for DropEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropEngine").field("name", &self.name).finish()
    }
}

impl DropEngine {
    /// Construct a drop-mode engine named `name` with `config`, reporting
    /// lifecycle events through `observers`. Does not spawn workers until
    /// [`Engine::start`] is called.
    pub fn new(name: impl Into<String>, config: MemoryEngineConfig, observers: Arc<ObserverRegistry>) -> Self {
        let capacity = config.max_event_queue_size.max(1);
        let (task_tx, task_rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            config,
            subscriptions: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            task_tx,
            task_rx: Arc::new(Mutex::new(task_rx)),
            stats: Arc::new(DropEngineStats::default()),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            observers,
        }
    }

    /// Snapshot of delivered/dropped counters.
    pub fn stats(&self) -> Arc<DropEngineStats> {
        self.stats.clone()
    }

    fn record_history(&self, event: &Event) {
        let mut history = self.history.write().expect("history lock poisoned");
        let ring = history.entry(event.topic.clone()).or_default();
        ring.push_back(event.clone());
        while ring.len() > self.config.max_event_queue_size.max(1) {
            ring.pop_front();
        }
    }
}

#[async_trait]
impl Engine for DropEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn start(&self, _ctx: Context) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }
        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.config.worker_count.max(1) {
            let rx = self.task_rx.clone();
            let cancel = self.cancel.clone();
            let engine_name = self.name.clone();
            let observers = self.observers.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let next = {
                        let mut guard = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            item = guard.recv() => item,
                        }
                    };
                    match next {
                        Some((handler, event)) => {
                            let received = lifecycle_event(
                                event_type::MESSAGE_RECEIVED,
                                Some(&engine_name),
                                Some(&event.topic),
                                None,
                            );
                            observers.notify_observers(&received).await;

                            let handler_ctx = Context::from_token(cancel.clone());
                            if let Err(err) = handler(handler_ctx, event.clone()).await {
                                tracing::error!(engine = %engine_name, worker_id, error = %err, "handler invocation failed");
                                let failed = lifecycle_event(
                                    event_type::MESSAGE_FAILED,
                                    Some(&engine_name),
                                    Some(&event.topic),
                                    None,
                                );
                                observers.notify_observers(&failed).await;
                            }
                        }
                        None => break,
                    }
                }
            }));
        }
        tracing::info!(engine = %self.name, workers = self.config.worker_count, "drop engine started");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn stop(&self, ctx: Context) -> Result<(), EngineError> {
        self.cancel.cancel();
        let mut workers = self.workers.lock().await;
        let handles = std::mem::take(&mut *workers);
        let join_all = futures::future::join_all(handles);
        match ctx.or_deadline(SHUTDOWN_DEADLINE).run(join_all).await {
            Ok(_) => {
                tracing::info!(engine = %self.name, "drop engine stopped");
                Ok(())
            }
            Err(_) => Err(EngineError::ShutdownTimeout),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, event), fields(engine = %self.name, topic = %event.topic))]
    async fn publish(&self, ctx: Context, event: Event, _partition_key: PartitionKey) -> Result<(), EngineError> {
        self.record_history(&event);

        let matching_handlers: Vec<Handler> = {
            let subscriptions = self.subscriptions.read().expect("subscriptions lock poisoned");
            subscriptions
                .iter()
                .filter(|(pattern, _)| matcher::matches(&event.topic, pattern))
                .flat_map(|(_, subs)| subs.values().map(|entry| entry.handler.clone()))
                .collect()
        };

        for handler in matching_handlers {
            let task = (handler, event.clone());
            match self.config.delivery_mode {
                DeliveryMode::Drop => match self.task_tx.try_send(task) {
                    Ok(()) => {
                        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(_) => {
                        self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(engine = %self.name, topic = %event.topic, "task channel full, dropping delivery");
                    }
                },
                DeliveryMode::Block => {
                    let send = self.task_tx.send(task);
                    match ctx.run(send).await {
                        Ok(Ok(())) => {
                            self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(_)) => {
                            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(cancel_err) => return Err(EngineError::Cancelled(cancel_err)),
                    }
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
        let is_new_topic = {
            let mut subscriptions = self.subscriptions.write().expect("subscriptions lock poisoned");
            let is_new_topic = !subscriptions.contains_key(topic);
            subscriptions.entry(topic.to_string()).or_default().insert(id, SubscriptionEntry { id, kind, handler });
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
    async fn unsubscribe(&self, _ctx: Context, handle: SubscriptionHandle) -> Result<(), EngineError> {
        if handle.engine != self.name {
            return Err(EngineError::InvalidSubscription);
        }
        let removed_topics = {
            let mut subscriptions = self.subscriptions.write().expect("subscriptions lock poisoned");
            let mut empty_topics = Vec::new();
            for (topic, subs) in subscriptions.iter_mut() {
                subs.remove(&handle.id);
                if subs.is_empty() {
                    empty_topics.push(topic.clone());
                }
            }
            for topic in &empty_topics {
                subscriptions.remove(topic);
            }
            empty_topics
        };

        let removed = lifecycle_event(event_type::SUBSCRIPTION_REMOVED, Some(&self.name), None, Some(handle.id));
        self.observers.notify_observers(&removed).await;
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

    fn test_engine(config: MemoryEngineConfig) -> DropEngine {
        DropEngine::new("mem", config, Arc::new(ObserverRegistry::new()))
    }

    #[tokio::test]
    async fn publish_delivers_to_matching_subscribers() {
        let engine = test_engine(MemoryEngineConfig::default());
        engine.start(Context::none()).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        engine.subscribe(Context::none(), "orders.*", SubscriptionKind::Sync, counting_handler(counter.clone())).await.unwrap();

        engine.publish(Context::none(), Event::new("orders.created", serde_json::Value::Null), None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        engine.stop(Context::none()).await.unwrap();
    }

    #[tokio::test]
    async fn publish_ignores_non_matching_topics() {
        let engine = test_engine(MemoryEngineConfig::default());
        engine.start(Context::none()).await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        engine.subscribe(Context::none(), "billing.*", SubscriptionKind::Sync, counting_handler(counter.clone())).await.unwrap();

        engine.publish(Context::none(), Event::new("orders.created", serde_json::Value::Null), None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        engine.stop(Context::none()).await.unwrap();
    }

    #[tokio::test]
    async fn drop_mode_increments_dropped_counter_when_channel_full() {
        let mut cfg = MemoryEngineConfig::default();
        cfg.worker_count = 0; // no workers draining: first publish fills the channel
        cfg.max_event_queue_size = 1;
        let engine = test_engine(cfg);
        engine.start(Context::none()).await.unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        engine.subscribe(Context::none(), "*", SubscriptionKind::Async, counting_handler(counter)).await.unwrap();

        engine.publish(Context::none(), Event::new("t", serde_json::Value::Null), None).await.unwrap();
        engine.publish(Context::none(), Event::new("t", serde_json::Value::Null), None).await.unwrap();

        let stats = engine.stats();
        assert!(stats.dropped.load(Ordering::SeqCst) >= 1);
        engine.stop(Context::none()).await.unwrap();
    }

    #[tokio::test]
    async fn history_ring_is_capped_at_max_event_queue_size() {
        let mut cfg = MemoryEngineConfig::default();
        cfg.max_event_queue_size = 2;
        let engine = test_engine(cfg);
        engine.start(Context::none()).await.unwrap();

        for _ in 0..5 {
            engine.publish(Context::none(), Event::new("t", serde_json::Value::Null), None).await.unwrap();
        }
        let history = engine.history.read().unwrap();
        assert_eq!(history.get("t").unwrap().len(), 2);
        drop(history);
        engine.stop(Context::none()).await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_erases_empty_topic_bucket() {
        let engine = test_engine(MemoryEngineConfig::default());
        engine.start(Context::none()).await.unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = engine.subscribe(Context::none(), "t", SubscriptionKind::Sync, counting_handler(counter)).await.unwrap();

        assert_eq!(engine.subscriber_count("t"), 1);
        engine.unsubscribe(Context::none(), handle).await.unwrap();
        assert_eq!(engine.subscriber_count("t"), 0);
        assert!(!engine.topics().contains(&"t".to_string()));
        engine.stop(Context::none()).await.unwrap();
    }
}
