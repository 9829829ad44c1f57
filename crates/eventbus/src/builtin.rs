//! Registers the built-in engine factories (memory, memory-durable, Kafka,
//! Kinesis, NATS) under the names a [`BusConfig`](eventbus_core::BusConfig)
//! refers to them by. Registration happens once per process; repeating it
//! is harmless because [`eventbus_core::registry::register`] is idempotent.

use std::sync::Arc;

use eventbus_core::engine::{Engine, EngineError};
use eventbus_core::observability::ObserverRegistry;
use eventbus_core::registry;
use eventbus_engine_kafka::{KafkaEngine, KafkaEngineConfig};
use eventbus_engine_kinesis::{KinesisEngine, KinesisEngineConfig};
use eventbus_engine_memory::{DropEngine, DurableEngine, MemoryEngineConfig};
use eventbus_engine_nats::{NatsEngine, NatsEngineConfig};
use eventbus_types::EngineConfig;
use tokio::sync::OnceCell;

fn parse_config<T: serde::de::DeserializeOwned + Default>(raw: &serde_json::Value) -> Result<T, EngineError> {
    if raw.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(raw.clone()).map_err(|err| EngineError::Configuration(err.to_string()))
}

fn parse_required_config<T: serde::de::DeserializeOwned>(raw: &serde_json::Value) -> Result<T, EngineError> {
    serde_json::from_value(raw.clone()).map_err(|err| EngineError::Configuration(err.to_string()))
}

static BUILTINS_REGISTERED: OnceCell<()> = OnceCell::const_new();

/// Register the built-in engine types. Safe to call from every
/// [`crate::EventBus::new`] — runs exactly once per process.
pub async fn register_builtin_engines() {
    BUILTINS_REGISTERED
        .get_or_init(|| async {
            registry::register(
                "memory",
                Arc::new(|cfg: &EngineConfig, observers: Arc<ObserverRegistry>| {
                    let mem_cfg: MemoryEngineConfig = parse_config(&cfg.config)?;
                    Ok(Arc::new(DropEngine::new(cfg.name.clone(), mem_cfg, observers)) as Arc<dyn Engine>)
                }),
            )
            .await;

            registry::register(
                "memory-durable",
                Arc::new(|cfg: &EngineConfig, observers: Arc<ObserverRegistry>| {
                    let mem_cfg: MemoryEngineConfig = parse_config(&cfg.config)?;
                    Ok(Arc::new(DurableEngine::new(cfg.name.clone(), mem_cfg, observers)) as Arc<dyn Engine>)
                }),
            )
            .await;

            registry::register(
                "kafka",
                Arc::new(|cfg: &EngineConfig, observers: Arc<ObserverRegistry>| {
                    let kafka_cfg: KafkaEngineConfig = parse_required_config(&cfg.config)?;
                    Ok(Arc::new(KafkaEngine::new(cfg.name.clone(), kafka_cfg, observers)) as Arc<dyn Engine>)
                }),
            )
            .await;

            registry::register(
                "kinesis",
                Arc::new(|cfg: &EngineConfig, observers: Arc<ObserverRegistry>| {
                    let kinesis_cfg: KinesisEngineConfig = parse_required_config(&cfg.config)?;
                    Ok(Arc::new(KinesisEngine::new(cfg.name.clone(), kinesis_cfg, observers)) as Arc<dyn Engine>)
                }),
            )
            .await;

            registry::register(
                "nats",
                Arc::new(|cfg: &EngineConfig, observers: Arc<ObserverRegistry>| {
                    let nats_cfg: NatsEngineConfig = parse_required_config(&cfg.config)?;
                    Ok(Arc::new(NatsEngine::new(cfg.name.clone(), nats_cfg, observers)) as Arc<dyn Engine>)
                }),
            )
            .await;
        })
        .await;
}
