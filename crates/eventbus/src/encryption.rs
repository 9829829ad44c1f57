//! Field-level payload encryption for `PublishEncrypted` (§ Publish
//! Extensions, C10).

use eventbus_types::EncryptionResult;
use serde_json::Map;

/// Errors raised while encrypting payload fields for a publish.
#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    /// `PublishEncrypted` was called with a payload that doesn't serialize
    /// to a JSON object, so there are no named fields to encrypt.
    #[error("payload must serialize to a JSON object to use field-level encryption")]
    PayloadNotAnObject,
    /// The underlying encryptor implementation failed.
    #[error(transparent)]
    Encryptor(#[from] anyhow::Error),
}

/// Encrypts a named subset of a payload's top-level fields.
///
/// Implementations own key management and algorithm choice; the facade only
/// cares about the [`EncryptionResult`] shape it gets back so it can
/// populate CloudEvents extension attributes.
pub trait FieldEncryptor: Send + Sync {
    /// Replace each of `field_names` present in `fields` with a ciphertext
    /// object, returning the full mapping plus the metadata needed to
    /// populate `encryption`/`keyid`/`encryptedfields`/`encrypteddek`/
    /// `encryptioncontext` extension attributes.
    fn encrypt(&self, fields: &Map<String, serde_json::Value>, field_names: &[String]) -> Result<EncryptionResult, EncryptionError>;
}
