//! The [`EventBus`] facade (§ EventBus Facade, C9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eventbus_core::context::Context;
use eventbus_core::engine::{Engine, Handler};
use eventbus_core::observability::{event_type, lifecycle_event, Observer, ObserverRegistry};
use eventbus_core::{registry, BusConfig, Router};
use eventbus_types::{CoreError, Event, PartitionKey, SubscriptionHandle, SubscriptionKind, TenantId};
use tokio::sync::RwLock as AsyncRwLock;

use crate::builtin::register_builtin_engines;
use crate::encryption::{EncryptionError, FieldEncryptor};
use crate::error::BusError;
use crate::tenant::{scope_to_tenant, tag_tenant};

/// Single entry point a host application depends on. Aggregates one or more
/// named [`Engine`]s behind a [`Router`], and layers CloudEvents metadata
/// enrichment, field-level encryption, and tenant isolation on top.
pub struct EventBus {
    engines: HashMap<String, Arc<dyn Engine>>,
    router: Router,
    observers: Arc<ObserverRegistry>,
    tenant_overrides: AsyncRwLock<HashMap<TenantId, String>>,
    started: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("engines", &self.router.engine_names())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl EventBus {
    /// Build a bus from `config`, constructing every declared engine via the
    /// process-wide registry. Does not start any engine — call
    /// [`EventBus::start`] for that.
    pub async fn new(config: BusConfig) -> Result<Self, BusError> {
        config.validate()?;
        register_builtin_engines().await;

        let (engine_configs, routing, engine_order) = match &config {
            BusConfig::Legacy { engine } => {
                let cfg = eventbus_types::EngineConfig {
                    name: engine.clone(),
                    engine_type: engine.clone(),
                    config: serde_json::Value::Null,
                };
                let order = vec![engine.clone()];
                (vec![cfg], Vec::new(), order)
            }
            BusConfig::Full { engines, routing } => {
                let order = engines.iter().map(|e| e.name.clone()).collect();
                (engines.clone(), routing.clone(), order)
            }
        };

        let observers = Arc::new(ObserverRegistry::new());

        let mut engines = HashMap::new();
        for cfg in &engine_configs {
            let engine = registry::create(cfg, observers.clone()).await?;
            engines.insert(cfg.name.clone(), engine);
        }

        let router = Router::new(routing, engine_order);
        let bus = Self {
            engines,
            router,
            observers,
            tenant_overrides: AsyncRwLock::new(HashMap::new()),
            started: AtomicBool::new(false),
        };
        bus.observers.notify_observers(&lifecycle_event(event_type::CONFIG_LOADED, None, None, None)).await;
        Ok(bus)
    }

    /// Register `observer` to receive internal lifecycle events (§4.12).
    pub async fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.register_observer(observer).await;
    }

    /// Redirect all tenant-scoped traffic for `tenant` to the named engine,
    /// overriding normal topic routing for that tenant only.
    pub async fn set_tenant_engine_override(&self, tenant: impl Into<String>, engine_name: impl Into<String>) -> Result<(), BusError> {
        let engine_name = engine_name.into();
        if !self.engines.contains_key(&engine_name) {
            return Err(CoreError::UnknownEngine(engine_name).into());
        }
        self.tenant_overrides.write().await.insert(tenant.into(), engine_name);
        Ok(())
    }

    /// Start every configured engine in declared order. Idempotent: calling
    /// `start` on an already-started bus is a no-op. If one engine fails to
    /// start, every engine started so far in this call is stopped again and
    /// the error is returned. `ctx` bounds the whole operation, including the
    /// rollback stop calls on failure.
    #[tracing::instrument(level = "info", skip(self, ctx))]
    pub async fn start(&self, ctx: Context) -> Result<(), BusError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut started_names = Vec::new();
        for name in self.router.engine_names() {
            let engine = self.engines.get(name).expect("router only names configured engines");
            match engine.start(ctx.child()).await {
                Ok(()) => started_names.push(name.as_str()),
                Err(err) => {
                    for started in started_names {
                        let _ = self.engines[started].stop(ctx.child()).await;
                    }
                    self.started.store(false, Ordering::Release);
                    return Err(BusError::from(err));
                }
            }
        }
        self.observers.notify_observers(&lifecycle_event(event_type::BUS_STARTED, None, None, None)).await;
        tracing::info!(engines = ?self.router.engine_names(), "event bus started");
        Ok(())
    }

    /// Stop every configured engine, awaiting in-flight work. Idempotent.
    /// Errors from individual engines are logged; the first one is
    /// returned, after every engine has had a chance to stop.
    #[tracing::instrument(level = "info", skip(self, ctx))]
    pub async fn stop(&self, ctx: Context) -> Result<(), BusError> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_err = None;
        for name in self.router.engine_names() {
            if let Some(engine) = self.engines.get(name) {
                if let Err(err) = engine.stop(ctx.child()).await {
                    tracing::error!(engine = %name, error = %err, "engine failed to stop cleanly");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }
        self.observers.notify_observers(&lifecycle_event(event_type::BUS_STOPPED, None, None, None)).await;
        tracing::info!("event bus stopped");
        match first_err {
            Some(err) => Err(BusError::from(err)),
            None => Ok(()),
        }
    }

    fn route(&self, topic: &str) -> Result<&str, BusError> {
        self.router.route_for(topic).ok_or_else(|| CoreError::UnknownEngine(topic.to_string()).into())
    }

    async fn tenant_route(&self, tenant: &str, topic: &str) -> Result<String, BusError> {
        if let Some(name) = self.tenant_overrides.read().await.get(tenant) {
            return Ok(name.clone());
        }
        self.route(topic).map(str::to_string)
    }

    async fn dispatch(&self, ctx: Context, event: Event, partition_key: PartitionKey, engine_name: &str) -> Result<(), BusError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CoreError::NotStarted.into());
        }
        let engine = self.engines.get(engine_name).ok_or_else(|| CoreError::UnknownEngine(engine_name.to_string()))?;
        let topic = event.topic.clone();
        engine.publish(ctx, event, partition_key).await?;
        self.observers
            .notify_observers(&lifecycle_event(event_type::MESSAGE_PUBLISHED, Some(engine_name), Some(&topic), None))
            .await;
        Ok(())
    }

    /// Publish `payload` to `topic`. The outgoing event always carries the
    /// `encryptedfields` extension set to `"[]"` (§4.10), even though no
    /// encryption took place, so consumers can branch on it unconditionally.
    pub async fn publish(&self, ctx: Context, topic: &str, payload: serde_json::Value) -> Result<(), BusError> {
        self.publish_with_key(ctx, topic, payload, None).await
    }

    /// Publish `payload` to `topic` carrying an explicit `partition_key`
    /// hint for adapters that use it (Kafka, Kinesis).
    #[tracing::instrument(level = "debug", skip(self, ctx, payload), fields(topic = %topic))]
    pub async fn publish_with_key(&self, ctx: Context, topic: &str, payload: serde_json::Value, partition_key: PartitionKey) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(CoreError::TopicEmpty.into());
        }
        let engine_name = self.route(topic)?.to_string();
        let event = Event::new(topic, payload).with_metadata("encryptedfields", "[]");
        self.dispatch(ctx, event, partition_key, &engine_name).await
    }

    /// Publish `payload` to `topic` scoped to `tenant`. Only subscriptions
    /// created via [`EventBus::subscribe_for_tenant`] with the same tenant
    /// receive it.
    #[tracing::instrument(level = "debug", skip(self, ctx, payload), fields(topic = %topic, tenant = %tenant))]
    pub async fn publish_for_tenant(&self, ctx: Context, tenant: &str, topic: &str, payload: serde_json::Value) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(CoreError::TopicEmpty.into());
        }
        let engine_name = self.tenant_route(tenant, topic).await?;
        let event = tag_tenant(Event::new(topic, payload).with_metadata("encryptedfields", "[]"), tenant);
        self.dispatch(ctx, event, None, &engine_name).await
    }

    /// Publish `payload` to `topic` with `fields` encrypted via `encryptor`
    /// (§4.10). Sets `encryption`, `keyid`, `encryptedfields`,
    /// `encrypteddek`, and `encryptioncontext` extension attributes on the
    /// outgoing event.
    #[tracing::instrument(level = "debug", skip(self, ctx, payload, encryptor), fields(topic = %topic))]
    pub async fn publish_encrypted(
        &self,
        ctx: Context,
        topic: &str,
        payload: serde_json::Value,
        encryptor: &dyn FieldEncryptor,
        fields: &[String],
    ) -> Result<(), BusError> {
        if topic.is_empty() {
            return Err(CoreError::TopicEmpty.into());
        }
        let object = payload.as_object().cloned().ok_or(EncryptionError::PayloadNotAnObject)?;
        let result = encryptor.encrypt(&object, fields)?;

        let encrypted_fields_json = serde_json::to_string(&result.encrypted_fields).map_err(BusError::Marshal)?;
        let context_json = serde_json::to_string(&result.context).map_err(BusError::Marshal)?;
        let event = Event::new(topic, result.data)
            .with_metadata("encryption", result.algorithm)
            .with_metadata("keyid", result.key_id)
            .with_metadata("encryptedfields", encrypted_fields_json)
            .with_metadata("encrypteddek", result.wrapped_dek)
            .with_metadata("encryptioncontext", context_json);

        let engine_name = self.route(topic)?.to_string();
        self.dispatch(ctx, event, None, &engine_name).await
    }

    async fn subscribe_inner(&self, ctx: Context, topic: &str, kind: SubscriptionKind, handler: Handler) -> Result<SubscriptionHandle, BusError> {
        if !self.started.load(Ordering::Acquire) {
            return Err(CoreError::NotStarted.into());
        }
        let engine_name = self.route(topic)?.to_string();
        let engine = self.engines.get(&engine_name).ok_or_else(|| CoreError::UnknownEngine(engine_name.clone()))?;
        // The engine itself emits `subscription.created`/`topic.created` — it
        // is the one sharing this bus's `ObserverRegistry`, so notifying here
        // too would double-fire.
        let handle = engine.subscribe(ctx, topic, kind, handler).await?;
        Ok(handle)
    }

    /// Subscribe `handler` synchronously to `topic`: invocations for one
    /// subscription are serialized (strict FIFO on the durable engine,
    /// best-effort order on the drop engine).
    pub async fn subscribe(&self, ctx: Context, topic: &str, handler: Handler) -> Result<SubscriptionHandle, BusError> {
        self.subscribe_inner(ctx, topic, SubscriptionKind::Sync, handler).await
    }

    /// Subscribe `handler` asynchronously to `topic`: the drop engine may
    /// fan invocations out across its worker pool; the durable engine
    /// behaves identically to [`EventBus::subscribe`].
    pub async fn subscribe_async(&self, ctx: Context, topic: &str, handler: Handler) -> Result<SubscriptionHandle, BusError> {
        self.subscribe_inner(ctx, topic, SubscriptionKind::Async, handler).await
    }

    /// Subscribe `handler` to `topic`, scoped to `tenant`. The handler only
    /// fires for events published via [`EventBus::publish_for_tenant`] with
    /// the same tenant.
    pub async fn subscribe_for_tenant(
        &self,
        ctx: Context,
        tenant: &str,
        topic: &str,
        kind: SubscriptionKind,
        handler: Handler,
    ) -> Result<SubscriptionHandle, BusError> {
        let scoped = scope_to_tenant(handler, tenant.to_string());
        self.subscribe_inner(ctx, topic, kind, scoped).await
    }

    /// Remove a subscription. Idempotent; no further invocations occur for
    /// it once this returns.
    pub async fn unsubscribe(&self, ctx: Context, handle: SubscriptionHandle) -> Result<(), BusError> {
        let engine = self.engines.get(&handle.engine).ok_or(CoreError::InvalidSubscriptionType)?;
        // The engine itself emits `subscription.removed`/`topic.deleted`.
        engine.unsubscribe(ctx, handle).await?;
        Ok(())
    }

    /// Snapshot of topics with at least one live subscriber, aggregated
    /// across every configured engine.
    pub fn topics(&self) -> Vec<String> {
        let mut set = std::collections::BTreeSet::new();
        for engine in self.engines.values() {
            set.extend(engine.topics());
        }
        set.into_iter().collect()
    }

    /// Number of live subscribers for `topic`, summed across every
    /// configured engine.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.engines.values().map(|engine| engine.subscriber_count(topic)).sum()
    }
}
