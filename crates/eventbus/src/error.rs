//! Public error type for the facade (§ Error Handling Design, C14).

use eventbus_codec::CodecError;
use eventbus_core::{ConfigError, RegistryError};
use eventbus_types::CoreError;

use crate::encryption::EncryptionError;

/// Errors surfaced at the facade boundary. Wraps every internal crate's
/// error type via `#[from]`/`#[error(transparent)]` so callers only ever
/// need to match on one type.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Validation, lifecycle, or queue error shared across the core crates.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Bus configuration failed structural validation.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// An engine type referenced in configuration has no registered
    /// factory, or its factory failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// An engine reported a failure while starting, stopping, or handling
    /// a publish/subscribe call.
    #[error(transparent)]
    Engine(#[from] eventbus_core::EngineError),
    /// A CloudEvents record failed to decode or encode.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// `PublishEncrypted` failed to encrypt the requested fields.
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    /// A payload failed to serialize to or deserialize from JSON.
    #[error("payload (de)serialization failed: {0}")]
    Marshal(#[source] serde_json::Error),
}
