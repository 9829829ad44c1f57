//! NATS-backed [`Engine`] implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use eventbus_core::context::Context;
use eventbus_core::engine::{Engine, EngineError, Handler};
use eventbus_core::observability::{event_type, lifecycle_event, ObserverRegistry};
use eventbus_types::{Event, PartitionKey, SubscriptionHandle, SubscriptionId, SubscriptionKind};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::NatsEngineConfig;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

struct SubjectConsumer {
    handlers: Arc<RwLock<HashMap<SubscriptionId, (SubscriptionKind, Handler)>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Engine backed by a NATS server or cluster via `async-nats`. Subjects map
/// 1:1 with topic names; partition keys are meaningless for NATS core
/// pub/sub and are ignored.
pub struct NatsEngine {
    name: String,
    config: NatsEngineConfig,
    client: RwLock<Option<async_nats::Client>>,
    consumers: RwLock<HashMap<String, SubjectConsumer>>,
    started: AtomicBool,
    observers: Arc<ObserverRegistry>,
}

impl std::fmt::Debug for NatsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsEngine").field("name", &self.name).finish()
    }
}

impl NatsEngine {
    /// Construct a NATS engine named `name`, reporting lifecycle events
    /// through `observers`. Does not connect until [`Engine::start`].
    pub fn new(name: impl Into<String>, config: NatsEngineConfig, observers: Arc<ObserverRegistry>) -> Self {
        Self {
            name: name.into(),
            config,
            client: RwLock::new(None),
            consumers: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            observers,
        }
    }

    fn client(&self) -> Result<async_nats::Client, EngineError> {
        self.client.read().expect("client lock poisoned").clone().ok_or(EngineError::NotStarted)
    }
}

#[async_trait]
impl Engine for NatsEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn start(&self, _ctx: Context) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }
        let options = async_nats::ConnectOptions::new()
            .connection_timeout(Duration::from_millis(self.config.timeout_ms));
        let client = options
            .connect(&self.config.server_urls)
            .await
            .map_err(|err| EngineError::Connection(anyhow::anyhow!(err)))?;
        *self.client.write().expect("client lock poisoned") = Some(client);
        tracing::info!(engine = %self.name, servers = %self.config.server_urls, "nats engine started");
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn stop(&self, ctx: Context) -> Result<(), EngineError> {
        let tasks: Vec<JoinHandle<()>> = {
            let mut consumers = self.consumers.write().expect("consumers lock poisoned");
            consumers
                .values_mut()
                .filter_map(|sc| {
                    sc.cancel.cancel();
                    sc.task.take()
                })
                .collect()
        };
        match ctx.or_deadline(SHUTDOWN_DEADLINE).run(futures::future::join_all(tasks)).await {
            Ok(_) => {
                *self.client.write().expect("client lock poisoned") = None;
                tracing::info!(engine = %self.name, "nats engine stopped");
                Ok(())
            }
            Err(_) => Err(EngineError::ShutdownTimeout),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, event, _partition_key), fields(engine = %self.name, topic = %event.topic))]
    async fn publish(&self, ctx: Context, event: Event, _partition_key: PartitionKey) -> Result<(), EngineError> {
        let client = self.client()?;
        let bytes = eventbus_codec::encode_event(&event).map_err(|err| EngineError::Other(anyhow::anyhow!(err)))?;
        let publish = client.publish(event.topic.clone(), bytes.into());
        match ctx.run(publish).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(EngineError::Connection(anyhow::anyhow!(err))),
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
        let client = self.client()?;
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
                    SubjectConsumer { handlers, cancel: CancellationToken::new(), task: None },
                );
                true
            }
        };

        if needs_new_consumer {
            let mut subscriber = client
                .subscribe(topic.to_string())
                .await
                .map_err(|err| EngineError::Connection(anyhow::anyhow!(err)))?;

            let (handlers, cancel) = {
                let consumers = self.consumers.read().expect("consumers lock poisoned");
                let sc = consumers.get(topic).expect("just inserted");
                (sc.handlers.clone(), sc.cancel.clone())
            };
            let engine_name = self.name.clone();
            let observers = self.observers.clone();
            let task = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        msg = subscriber.next() => match msg {
                            Some(message) => {
                                match eventbus_codec::decode_bytes(&message.payload) {
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
                                        tracing::warn!(engine = %engine_name, error = %err, "failed to decode NATS message");
                                    }
                                }
                            }
                            None => break,
                        },
                    }
                }
            });

            let mut consumers = self.consumers.write().expect("consumers lock poisoned");
            if let Some(sc) = consumers.get_mut(topic) {
                sc.task = Some(task);
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
            for (topic, sc) in consumers.iter() {
                let mut handlers = sc.handlers.write().expect("handlers lock poisoned");
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
            .filter(|(_, sc)| !sc.handlers.read().expect("handlers lock poisoned").is_empty())
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.consumers
            .read()
            .expect("consumers lock poisoned")
            .get(topic)
            .map(|sc| sc.handlers.read().expect("handlers lock poisoned").len())
            .unwrap_or(0)
    }
}
