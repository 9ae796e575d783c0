//! Key finder abstraction: where key material comes from.

use crate::error::KeyFinderError;
use crate::key::EncryptionKey;
use async_trait::async_trait;

/// Resolves key names, versions and tenant identifiers to key material.
///
/// Implementations must be thread-safe (`Send + Sync`); one finder is
/// normally shared by every resolver in the process. The engine never retries
/// a failed lookup, so any retry policy belongs to the implementation.
///
/// # Example
///
/// ```rust,ignore
/// use fieldseal::key_finder::KeyFinder;
///
/// struct VaultFinder { /* client */ }
///
/// #[async_trait::async_trait]
/// impl KeyFinder for VaultFinder {
///     async fn find_key_value(&self, name: &str, version: Option<&str>)
///         -> Result<EncryptionKey, KeyFinderError> {
///         // fetch the secret
///     }
///     // ... other methods
/// }
/// ```
#[async_trait]
pub trait KeyFinder: Send + Sync {
    /// Fetches the key `key_name` with its material.
    ///
    /// With `key_version` of `None` the finder returns its default (newest)
    /// version, and the returned key carries that version.
    ///
    /// # Errors
    ///
    /// Returns `KeyFinderError::KeyNotFound` if no such key exists.
    async fn find_key_value(
        &self,
        key_name: &str,
        key_version: Option<&str>,
    ) -> Result<EncryptionKey, KeyFinderError>;

    /// Returns the rotation family prefix of a key, if it has one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be queried.
    async fn find_key_name_base(
        &self,
        key_name: &str,
        key_version: Option<&str>,
    ) -> Result<Option<String>, KeyFinderError>;

    /// Returns the key a tenant encrypts with.
    ///
    /// `None` for the identifier means the process-wide default. `Ok(None)`
    /// means no key is configured for the tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be queried.
    async fn current_encryption_key(
        &self,
        identifier: Option<&str>,
    ) -> Result<Option<EncryptionKey>, KeyFinderError>;

    /// Returns the shared fail-over key, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be queried.
    async fn common_encryption_key(&self) -> Result<Option<EncryptionKey>, KeyFinderError> {
        Ok(None)
    }
}
