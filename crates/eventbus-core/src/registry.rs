//! Process-wide engine type registry (§ Engine Registry).
//!
//! Mirrors the workspace's existing plugin-registry convention: a single
//! `Lazy<RwLock<HashMap<...>>>` static, written to before the first bus is
//! constructed and read many times after. Registration is idempotent by
//! name — re-registering a type name overwrites the previous factory.

use std::collections::HashMap;
use std::sync::Arc;

use eventbus_types::EngineConfig;
use once_cell::sync::Lazy;
use tokio::sync::RwLock;

use crate::engine::{Engine, EngineError};
use crate::observability::ObserverRegistry;

/// Constructs an [`Engine`] instance from an [`EngineConfig`] plus the
/// bus-wide [`ObserverRegistry`] it should report lifecycle events through.
/// Stored as a trait object so registration doesn't require a generic
/// parameter at the call site.
pub type EngineFactory =
    Arc<dyn Fn(&EngineConfig, Arc<ObserverRegistry>) -> Result<Arc<dyn Engine>, EngineError> + Send + Sync>;

static REGISTRY: Lazy<RwLock<HashMap<String, EngineFactory>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Errors raised while registering or resolving an engine type.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// `create` was called with a type name nothing registered.
    #[error("unknown engine type: {0}")]
    UnknownType(String),
    /// The factory for a known type failed to construct an engine.
    #[error(transparent)]
    Factory(#[from] EngineError),
}

/// Register `factory` under `engine_type`, overwriting any prior
/// registration for the same name.
pub async fn register(engine_type: impl Into<String>, factory: EngineFactory) {
    let mut guard = REGISTRY.write().await;
    guard.insert(engine_type.into(), factory);
}

/// Construct an engine instance for `config.engine_type`, returning
/// [`RegistryError::UnknownType`] if nothing is registered under that name.
pub async fn create(config: &EngineConfig, observers: Arc<ObserverRegistry>) -> Result<Arc<dyn Engine>, RegistryError> {
    let guard = REGISTRY.read().await;
    let factory = guard
        .get(&config.engine_type)
        .ok_or_else(|| RegistryError::UnknownType(config.engine_type.clone()))?
        .clone();
    drop(guard);
    Ok(factory(config, observers)?)
}

/// Whether `engine_type` currently has a registered factory. Exposed mainly
/// for tests and config validation.
pub async fn is_registered(engine_type: &str) -> bool {
    REGISTRY.read().await.contains_key(engine_type)
}
