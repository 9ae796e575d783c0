//! In-memory key finder for `fieldseal`.
//!
//! Holds a fixed set of keys configured at startup. Suitable for tests,
//! command-line use and deployments that inject keys through the
//! environment; it never reaches out to a secret store.

#![warn(clippy::pedantic, clippy::nursery)]

use async_trait::async_trait;
use fieldseal::error::KeyFinderError;
use fieldseal::key::{EncryptionKey, KeyMaterial};
use fieldseal::key_finder::KeyFinder;
use secrecy::SecretString;
use std::collections::HashMap;
use tracing::debug;

type KeyRef = (String, String);

fn normalize(name: &str, version: &str) -> KeyRef {
    (name.to_ascii_lowercase(), version.to_ascii_lowercase())
}

/// Key finder backed by an in-memory table.
///
/// Names and versions match case-insensitively. The last version added for a
/// name is its default version unless one is set explicitly.
///
/// # Example
///
/// ```
/// use fieldseal::key::EncryptionKey;
/// use fieldseal_key_static::StaticKeyFinder;
///
/// let key = EncryptionKey::new("key--exos-boa", "0f8fad5b-d9cb-469f-a165-70867728950e")
///     .with_value("AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=");
/// let finder = StaticKeyFinder::single(key);
/// assert_eq!(finder.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticKeyFinder {
    keys: HashMap<KeyRef, EncryptionKey>,
    default_versions: HashMap<String, String>,
    bases: HashMap<String, String>,
    tenants: HashMap<String, KeyRef>,
    fallback_current: Option<KeyRef>,
    common: Option<KeyRef>,
}

impl StaticKeyFinder {
    /// Creates an empty finder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A finder holding one key, which is also every tenant's current key.
    #[must_use]
    pub fn single(key: EncryptionKey) -> Self {
        let (name, version) = (key.key_name().to_owned(), key.key_version().to_owned());
        Self::new().with_key(key).with_current_key(&name, &version)
    }

    /// Adds a key. A base name set on the key is recorded for its name.
    #[must_use]
    pub fn with_key(mut self, key: EncryptionKey) -> Self {
        let id = normalize(key.key_name(), key.key_version());
        if let Some(base) = key.key_name_base() {
            self.bases.insert(id.0.clone(), base.to_owned());
        }
        self.default_versions.insert(id.0.clone(), key.key_version().to_owned());
        self.keys.insert(id, key);
        self
    }

    /// Adds a key from a textual secret (base64 of 32 bytes).
    #[must_use]
    pub fn with_secret(self, name: &str, version: &str, value: SecretString) -> Self {
        self.with_key(EncryptionKey::new(name, version).with_material(KeyMaterial::Text(value)))
    }

    /// Sets the version returned when a lookup names no version.
    #[must_use]
    pub fn with_default_version(mut self, name: &str, version: &str) -> Self {
        self.default_versions.insert(name.to_ascii_lowercase(), version.to_owned());
        self
    }

    /// Sets the rotation family prefix of `name`.
    #[must_use]
    pub fn with_name_base(mut self, name: &str, base: &str) -> Self {
        self.bases.insert(name.to_ascii_lowercase(), base.to_owned());
        self
    }

    /// Sets the current key for tenants without their own entry.
    #[must_use]
    pub fn with_current_key(mut self, name: &str, version: &str) -> Self {
        self.fallback_current = Some(normalize(name, version));
        self
    }

    /// Sets the current key of one tenant.
    #[must_use]
    pub fn with_tenant_key(mut self, identifier: &str, name: &str, version: &str) -> Self {
        self.tenants.insert(identifier.to_owned(), normalize(name, version));
        self
    }

    /// Sets the shared fail-over key.
    #[must_use]
    pub fn with_common_key(mut self, name: &str, version: &str) -> Self {
        self.common = Some(normalize(name, version));
        self
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no keys are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn get(&self, id: &KeyRef) -> Result<EncryptionKey, KeyFinderError> {
        let key = self
            .keys
            .get(id)
            .ok_or_else(|| KeyFinderError::KeyNotFound(format!("{}|{}", id.0, id.1)))?;
        Ok(match (key.key_name_base(), self.bases.get(&id.0)) {
            (None, Some(base)) => key.clone().with_name_base(base.as_str()),
            _ => key.clone(),
        })
    }
}

#[async_trait]
impl KeyFinder for StaticKeyFinder {
    async fn find_key_value(
        &self,
        key_name: &str,
        key_version: Option<&str>,
    ) -> Result<EncryptionKey, KeyFinderError> {
        let name = key_name.to_ascii_lowercase();
        let version = match key_version {
            Some(version) => version.to_ascii_lowercase(),
            None => self
                .default_versions
                .get(&name)
                .ok_or_else(|| KeyFinderError::KeyNotFound(key_name.to_owned()))?
                .to_ascii_lowercase(),
        };
        debug!(key_name, version = %version, "static key lookup");
        self.get(&(name, version))
    }

    async fn find_key_name_base(
        &self,
        key_name: &str,
        _key_version: Option<&str>,
    ) -> Result<Option<String>, KeyFinderError> {
        Ok(self.bases.get(&key_name.to_ascii_lowercase()).cloned())
    }

    async fn current_encryption_key(
        &self,
        identifier: Option<&str>,
    ) -> Result<Option<EncryptionKey>, KeyFinderError> {
        let id = identifier
            .and_then(|identifier| self.tenants.get(identifier))
            .or(self.fallback_current.as_ref());
        let Some(id) = id else {
            return Ok(None);
        };
        let key = self.get(id)?;
        Ok(Some(match identifier {
            Some(identifier) => key.with_identifier(identifier),
            None => key,
        }))
    }

    async fn common_encryption_key(&self) -> Result<Option<EncryptionKey>, KeyFinderError> {
        self.common.as_ref().map(|id| self.get(id)).transpose()
    }
}
