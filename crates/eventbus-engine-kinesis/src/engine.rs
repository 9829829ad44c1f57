//! Kinesis-backed [`Engine`] implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::ShardIteratorType;
use aws_sdk_kinesis::Client;
use eventbus_core::context::Context;
use eventbus_core::engine::{Engine, EngineError, Handler};
use eventbus_core::observability::{event_type, lifecycle_event, ObserverRegistry};
use eventbus_types::{Event, PartitionKey, SubscriptionHandle, SubscriptionId, SubscriptionKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::KinesisEngineConfig;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
const EXPIRED_ITERATOR_BACKOFF: Duration = Duration::from_secs(5);

struct StreamConsumer {
    handlers: Arc<RwLock<HashMap<SubscriptionId, (SubscriptionKind, Handler)>>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Engine backed by an Amazon Kinesis data stream per topic. One polling
/// task is spawned per distinct topic (stream) the first time it's
/// subscribed to.
pub struct KinesisEngine {
    name: String,
    config: KinesisEngineConfig,
    client: RwLock<Option<Client>>,
    consumers: RwLock<HashMap<String, StreamConsumer>>,
    started: AtomicBool,
    observers: Arc<ObserverRegistry>,
}

impl std::fmt::Debug for KinesisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KinesisEngine").field("name", &self.name).finish()
    }
}

impl KinesisEngine {
    /// Construct a Kinesis engine named `name`, reporting lifecycle events
    /// through `observers`. Does not connect until [`Engine::start`].
    pub fn new(name: impl Into<String>, config: KinesisEngineConfig, observers: Arc<ObserverRegistry>) -> Self {
        Self {
            name: name.into(),
            config,
            client: RwLock::new(None),
            consumers: RwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
            observers,
        }
    }

    fn client(&self) -> Result<Client, EngineError> {
        self.client.read().expect("client lock poisoned").clone().ok_or(EngineError::NotStarted)
    }

    async fn ensure_stream(&self, client: &Client, stream: &str) {
        match client.create_stream().stream_name(stream).shard_count(1).send().await {
            Ok(_) => tracing::debug!(stream, "created Kinesis stream"),
            Err(err) => {
                tracing::debug!(stream, error = %err, "create_stream did not succeed (stream may already exist)")
            }
        }
    }

    /// Effective partition key: the given key if set and non-empty, else the
    /// topic name. Kinesis rejects an empty partition key outright.
    fn effective_partition_key(topic: &str, partition_key: &PartitionKey) -> String {
        match partition_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => topic.to_string(),
        }
    }
}

#[async_trait]
impl Engine for KinesisEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(level = "debug", skip(self, ctx), fields(engine = %self.name))]
    async fn start(&self, _ctx: Context) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(EngineError::AlreadyStarted);
        }
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest()).region(
            aws_config::Region::new(self.config.region.clone()),
        );
        if let Some(ref endpoint) = self.config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let aws_cfg = loader.load().await;
        let client = Client::new(&aws_cfg);
        *self.client.write().expect("client lock poisoned") = Some(client);
        tracing::info!(engine = %self.name, region = %self.config.region, "kinesis engine started");
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
                tracing::info!(engine = %self.name, "kinesis engine stopped");
                Ok(())
            }
            Err(_) => Err(EngineError::ShutdownTimeout),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, ctx, event), fields(engine = %self.name, topic = %event.topic))]
    async fn publish(&self, ctx: Context, event: Event, partition_key: PartitionKey) -> Result<(), EngineError> {
        let client = self.client()?;
        let bytes = eventbus_codec::encode_event(&event).map_err(|err| EngineError::Other(anyhow::anyhow!(err)))?;
        let key = Self::effective_partition_key(&event.topic, &partition_key);

        let send = client.put_record().stream_name(&event.topic).data(Blob::new(bytes)).partition_key(key).send();
        match ctx.run(send).await {
            Ok(Ok(_)) => Ok(()),
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
        self.ensure_stream(&client, topic).await;
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
                    StreamConsumer { handlers, cancel: CancellationToken::new(), task: None },
                );
                true
            }
        };

        if needs_new_consumer {
            let (handlers, cancel) = {
                let consumers = self.consumers.read().expect("consumers lock poisoned");
                let sc = consumers.get(topic).expect("just inserted");
                (sc.handlers.clone(), sc.cancel.clone())
            };
            let engine_name = self.name.clone();
            let stream = topic.to_string();
            let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
            let client = client.clone();
            let observers = self.observers.clone();

            let task = tokio::spawn(async move {
                let shards = match client.list_shards().stream_name(&stream).send().await {
                    Ok(out) => out.shards.unwrap_or_default(),
                    Err(err) => {
                        tracing::warn!(engine = %engine_name, stream, error = %err, "failed to list shards");
                        return;
                    }
                };

                let shard_tasks: Vec<_> = shards
                    .into_iter()
                    .map(|shard| {
                        let client = client.clone();
                        let stream = stream.clone();
                        let cancel = cancel.clone();
                        let handlers = handlers.clone();
                        let engine_name = engine_name.clone();
                        let observers = observers.clone();
                        tokio::spawn(async move {
                            poll_shard(client, stream, shard.shard_id, cancel, handlers, engine_name, observers, poll_interval)
                                .await;
                        })
                    })
                    .collect();

                futures::future::join_all(shard_tasks).await;
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

#[allow(clippy::too_many_arguments)]
async fn poll_shard(
    client: Client,
    stream: String,
    shard_id: String,
    cancel: CancellationToken,
    handlers: Arc<RwLock<HashMap<SubscriptionId, (SubscriptionKind, Handler)>>>,
    engine_name: String,
    observers: Arc<ObserverRegistry>,
    poll_interval: Duration,
) {
    let mut last_sequence_number: Option<String> = None;
    let mut shard_iterator = match fetch_iterator(&client, &stream, &shard_id, &last_sequence_number).await {
        Ok(it) => it,
        Err(err) => {
            tracing::warn!(engine = %engine_name, stream, shard_id, error = %err, "failed to get initial shard iterator");
            return;
        }
    };

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let Some(iterator) = shard_iterator.clone() else { return };

        tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.get_records().shard_iterator(iterator).send() => {
                match result {
                    Ok(output) => {
                        for record in output.records {
                            last_sequence_number = Some(record.sequence_number.clone());
                            match eventbus_codec::decode_bytes(record.data.as_ref()) {
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
                                    tracing::warn!(engine = %engine_name, error = %err, "failed to decode Kinesis record");
                                }
                            }
                        }
                        shard_iterator = output.next_shard_iterator;
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                    Err(err) => {
                        let expired = err
                            .as_service_error()
                            .map(|service_err| service_err.is_expired_iterator_exception())
                            .unwrap_or(false);
                        if expired {
                            tracing::debug!(engine = %engine_name, stream, shard_id, "shard iterator expired, refreshing");
                            match fetch_iterator(&client, &stream, &shard_id, &last_sequence_number).await {
                                Ok(it) => shard_iterator = it,
                                Err(refresh_err) => {
                                    tracing::warn!(engine = %engine_name, stream, shard_id, error = %refresh_err, "iterator refresh failed, backing off");
                                    tokio::select! {
                                        _ = cancel.cancelled() => return,
                                        _ = tokio::time::sleep(EXPIRED_ITERATOR_BACKOFF) => {}
                                    }
                                }
                            }
                        } else {
                            tracing::warn!(engine = %engine_name, stream, shard_id, error = %err, "get_records failed");
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep(poll_interval) => {}
                            }
                        }
                    }
                }
            }
        }
    }
}

async fn fetch_iterator(
    client: &Client,
    stream: &str,
    shard_id: &str,
    last_sequence_number: &Option<String>,
) -> anyhow::Result<Option<String>> {
    let mut request = client.get_shard_iterator().stream_name(stream).shard_id(shard_id);
    request = match last_sequence_number {
        Some(seq) => request
            .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
            .starting_sequence_number(seq.clone()),
        None => request.shard_iterator_type(ShardIteratorType::Latest),
    };
    let output = request.send().await?;
    Ok(output.shard_iterator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_topic_when_key_unset() {
        assert_eq!(KinesisEngine::effective_partition_key("orders.created", &None), "orders.created");
    }

    #[test]
    fn falls_back_to_topic_when_key_is_explicit_empty_string() {
        assert_eq!(
            KinesisEngine::effective_partition_key("orders.created", &Some(String::new())),
            "orders.created"
        );
    }

    #[test]
    fn uses_key_when_set_and_non_empty() {
        assert_eq!(
            KinesisEngine::effective_partition_key("orders.created", &Some("user-42".to_string())),
            "user-42"
        );
    }
}
