//! Kafka-backed [`Engine`] implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use eventbus_core::context::Context;
use eventbus_core::engine::{Engine, EngineError, Handler};
use eventbus_core::observability::{event_type, lifecycle_event, ObserverRegistry};
use eventbus_types::{Event, PartitionKey, SubscriptionHandle, SubscriptionId, SubscriptionKind};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::KafkaEngineConfig;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

struct TopicConsumer {
    handlers: Arc<RwLock<HashMap<SubscriptionId, (SubscriptionKind, Handler)>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Engine backed by a Kafka cluster via `rdkafka`. One `StreamConsumer` task
/// is spawned per distinct topic name the first time it's subscribed to;
/// further subscriptions to the same topic share that task.
pub struct KafkaEngine {
    name: String,
    config: KafkaEngineConfig,
    producer: AsyncMutex<Option<FutureProducer>>,
    consumers: RwLock<HashMap<String, TopicConsumer>>,
    started: AtomicBool,
    observers: Arc<ObserverRegistry>,
}

impl std::fmt::Debug for KafkaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEngine").field("name", &self.name).finish()
    }
}

impl KafkaEngine {
    /// Construct a Kafka engine named `name`, reporting lifecycle events
    /// through `observers`. Does not connect until [`Engine::start`].
    pub fn new(name: impl Into<String>, config: KafkaEngineConfig, observers: Arc<ObserverRegistry>) -> Self {
        Self {
            name: name.into(),
            config,
            producer: AsyncMutex::new(None),
            consumers: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            observers,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("security.protocol", &self.config.security_protocol);
        cfg
    }

    async fn ensure_topic(&self, topic: &str) {
        let admin: Result<AdminClient<DefaultClientContext>, _> = self.client_config().create();
        let admin = match admin {
            Ok(admin) => admin,
            Err(err) => {
                tracing::warn!(engine = %self.name, topic, error = %err, "could not create admin client to ensure topic");
                return;
            }
        };
        let new_topic = NewTopic::new(topic, 1, TopicReplication::Fixed(1));
        let options = AdminOptions::new().request_timeout(Some(Duration::from_millis(self.config.timeout_ms)));
        if let Err(err) = admin.create_topics(&[new_topic], &options).await {
            tracing::debug!(engine = %self.name, topic, error = %err, "create_topics call did not succeed (topic may already exist)");
        }
    }
}

#[async_trait]
impl Engine for KafkaEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn start(&self, _ctx: Context) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }
        let producer: FutureProducer = self
            .client_config()
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("retries", "10")
            .create()
            .map_err(|err| EngineError::Connection(anyhow::anyhow!(err)))?;
        *self.producer.lock().await = Some(producer);
        tracing::info!(engine = %self.name, brokers = %self.config.bootstrap_servers, "kafka engine started");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn stop(&self, ctx: Context) -> Result<(), EngineError> {
        let tasks: Vec<JoinHandle<()>> = {
            let mut consumers = self.consumers.write().expect("consumers lock poisoned");
            consumers
                .values_mut()
                .filter_map(|tc| {
                    tc.cancel.cancel();
                    tc.task.take()
                })
                .collect()
        };
        match ctx.or_deadline(SHUTDOWN_DEADLINE).run(futures::future::join_all(tasks)).await {
            Ok(_) => {
                *self.producer.lock().await = None;
                tracing::info!(engine = %self.name, "kafka engine stopped");
                Ok(())
            }
            Err(_) => Err(EngineError::ShutdownTimeout),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, event), fields(engine = %self.name, topic = %event.topic))]
    async fn publish(&self, ctx: Context, event: Event, partition_key: PartitionKey) -> Result<(), EngineError> {
        let guard = self.producer.lock().await;
        let producer = guard.as_ref().ok_or(EngineError::NotStarted)?;

        let bytes = eventbus_codec::encode_event(&event).map_err(|err| EngineError::Other(anyhow::anyhow!(err)))?;
        let topic = event.topic.clone();
        let mut record = FutureRecord::to(&topic).payload(&bytes);
        if let Some(ref key) = partition_key {
            record = record.key(key);
        }

        let send = producer.send(record, Timeout::After(Duration::from_millis(self.config.timeout_ms)));
        match ctx.run(send).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((err, _))) => Err(EngineError::Connection(anyhow::anyhow!(err))),
            Err(cancel_err) => Err(EngineError::Cancelled(cancel_err)),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, handler), fields(engine = %self.name, topic = %topic))]
    async fn subscribe(
        &self,
        _ctx: Context,
        topic: &str,
        kind: SubscriptionKind,
        handler: Handler,
    ) -> Result<SubscriptionHandle, EngineError> {
        self.ensure_topic(topic).await;
        let id = Uuid::new_v4();

        let needs_new_consumer = {
            let mut consumers = self.consumers.write().expect("consumers lock poisoned");
            if let Some(existing) = consumers.get(topic) {
                existing.handlers.write().expect("handlers lock poisoned").insert(id, (kind, handler.clone()));
                false
            } else {
                let handlers = Arc::new(RwLock::new(HashMap::new()));
                handlers.write().expect("handlers lock poisoned").insert(id, (kind, handler.clone()));
                consumers.insert(
                    topic.to_string(),
                    TopicConsumer { handlers, cancel: CancellationToken::new(), task: None },
                );
                true
            }
        };

        if needs_new_consumer {
            let consumer: StreamConsumer = self
                .client_config()
                .set("group.id", &self.config.consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", "earliest")
                .create()
                .map_err(|err| EngineError::Connection(anyhow::anyhow!(err)))?;
            consumer
                .subscribe(&[topic])
                .map_err(|err| EngineError::Connection(anyhow::anyhow!(err)))?;

            let (handlers, cancel) = {
                let consumers = self.consumers.read().expect("consumers lock poisoned");
                let tc = consumers.get(topic).expect("just inserted");
                (tc.handlers.clone(), tc.cancel.clone())
            };
            let engine_name = self.name.clone();
            let observers = self.observers.clone();
            let task = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = consumer.recv() => match msg {
                            Ok(borrowed) => {
                                let Some(payload) = borrowed.payload() else { continue };
                                match eventbus_codec::decode_bytes(payload) {
                                    Ok(event) => {
                                        let received = lifecycle_event(
                                            event_type::MESSAGE_RECEIVED,
                                            Some(&engine_name),
                                            Some(&event.topic),
                                            None,
                                        );
                                        observers.notify_observers(&received).await;

                                        let snapshot: Vec<Handler> = handlers
                                            .read()
                                            .expect("handlers lock poisoned")
                                            .values()
                                            .map(|(_, h)| h.clone())
                                            .collect();
                                        for h in snapshot {
                                            let handler_ctx = Context::from_token(cancel.clone());
                                            if let Err(err) = h(handler_ctx, event.clone()).await {
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
                                    }
                                    Err(err) => {
                                        tracing::warn!(engine = %engine_name, error = %err, "failed to decode Kafka record");
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::warn!(engine = %engine_name, error = %err, "Kafka consumer recv error");
                            }
                        },
                    }
                }
            });

            let mut consumers = self.consumers.write().expect("consumers lock poisoned");
            if let Some(tc) = consumers.get_mut(topic) {
                tc.task = Some(task);
            }
        }

        let created = lifecycle_event(event_type::SUBSCRIPTION_CREATED, Some(&self.name), Some(topic), Some(id));
        self.observers.notify_observers(&created).await;
        if needs_new_consumer {
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
        let mut emptied_topics = Vec::new();
        {
            let consumers = self.consumers.read().expect("consumers lock poisoned");
            for (topic, tc) in consumers.iter() {
                let mut handlers = tc.handlers.write().expect("handlers lock poisoned");
                if handlers.remove(&handle.id).is_some() && handlers.is_empty() {
                    emptied_topics.push(topic.clone());
                }
            }
        }

        let removed = lifecycle_event(event_type::SUBSCRIPTION_REMOVED, Some(&self.name), None, Some(handle.id));
        self.observers.notify_observers(&removed).await;
        for topic in emptied_topics {
            let deleted = lifecycle_event(event_type::TOPIC_DELETED, Some(&self.name), Some(&topic), None);
            self.observers.notify_observers(&deleted).await;
        }
        Ok(())
    }

    fn topics(&self) -> Vec<String> {
        self.consumers
            .read()
            .expect("consumers lock poisoned")
            .iter()
            .filter(|(_, tc)| !tc.handlers.read().expect("handlers lock poisoned").is_empty())
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.consumers
            .read()
            .expect("consumers lock poisoned")
            .get(topic)
            .map(|tc| tc.handlers.read().expect("handlers lock poisoned").len())
            .unwrap_or(0)
    }
}
