//! Encryption key identity and material.
//!
//! An [`EncryptionKey`] names one version of a logical key. Its name and
//! version travel with every ciphertext; its identifier and material never do.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString, SecretVec};
use std::fmt;
use zeroize::Zeroizing;

/// Size of usable key material in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// Standard alphabet, accepting input with or without `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Secret material behind a key, as configured.
pub enum KeyMaterial {
    /// Textual value, normally base64 of 32 random bytes.
    Text(SecretString),
    /// Raw bytes.
    Bytes(SecretVec<u8>),
}

impl KeyMaterial {
    /// Resolves the material to the bytes used by the ciphers.
    ///
    /// Text that is base64 of exactly [`KEY_SIZE`] bytes yields those bytes.
    /// Any other text is used as its UTF-8 encoding. Existing ciphertext
    /// depends on this two-step rule, so it stays even though the fallback can
    /// produce material of the wrong length, which then fails
    /// [`EncryptionKey::is_ready`].
    #[must_use]
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Zeroizing::new(bytes.expose_secret().clone()),
            Self::Text(text) => {
                let text = text.expose_secret();
                match LENIENT_BASE64.decode(text) {
                    Ok(decoded) if decoded.len() == KEY_SIZE => Zeroizing::new(decoded),
                    Ok(decoded) => {
                        drop(Zeroizing::new(decoded));
                        utf8_fallback(text)
                    }
                    Err(_) => utf8_fallback(text),
                }
            }
        }
    }
}

fn utf8_fallback(text: &str) -> Zeroizing<Vec<u8>> {
    if text.len() != KEY_SIZE {
        tracing::warn!(
            len = text.len(),
            "key value is not base64 of {KEY_SIZE} bytes; raw text fallback has the wrong length"
        );
    }
    Zeroizing::new(text.as_bytes().to_vec())
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        match self {
            Self::Text(text) => Self::Text(SecretString::new(text.expose_secret().clone())),
            Self::Bytes(bytes) => Self::Bytes(SecretVec::new(bytes.expose_secret().clone())),
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(_) => f.write_str("KeyMaterial::Text([REDACTED])"),
            Self::Bytes(_) => f.write_str("KeyMaterial::Bytes([REDACTED])"),
        }
    }
}

/// One specific version of a logical encryption key.
///
/// Equality compares name and version case-insensitively and ignores
/// material, identifier and base name.
///
/// # Example
///
/// ```
/// use fieldseal::key::EncryptionKey;
///
/// let key = EncryptionKey::new("key--exos-boa", "0f8fad5b-d9cb-469f-a165-70867728950e")
///     .with_value("AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=");
/// assert!(key.is_ready());
/// ```
#[derive(Clone, Default)]
pub struct EncryptionKey {
    key_identifier: Option<String>,
    key_name: String,
    key_name_base: Option<String>,
    key_version: String,
    material: Option<KeyMaterial>,
    hmac_base64: Option<String>,
}

impl EncryptionKey {
    /// Creates a key with a name and version and no material.
    #[must_use]
    pub fn new(key_name: impl Into<String>, key_version: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            key_version: key_version.into(),
            ..Self::default()
        }
    }

    /// Sets the tenant identifier the key was looked up with.
    #[must_use]
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.key_identifier = Some(identifier.into());
        self
    }

    /// Sets the rotation family prefix.
    #[must_use]
    pub fn with_name_base(mut self, base: impl Into<String>) -> Self {
        self.key_name_base = Some(base.into());
        self
    }

    /// Sets textual material (base64, or raw text as a fallback).
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.material = Some(KeyMaterial::Text(SecretString::new(value.into())));
        self
    }

    /// Sets raw byte material.
    #[must_use]
    pub fn with_value_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.material = Some(KeyMaterial::Bytes(SecretVec::new(bytes)));
        self
    }

    /// Sets already-built material.
    #[must_use]
    pub fn with_material(mut self, material: KeyMaterial) -> Self {
        self.material = Some(material);
        self
    }

    /// Sets the out-of-band HMAC carried in blob metadata.
    #[must_use]
    pub fn with_hmac(mut self, hmac_base64: impl Into<String>) -> Self {
        self.hmac_base64 = Some(hmac_base64.into());
        self
    }

    /// Returns the lookup identifier, if any.
    #[must_use]
    pub fn key_identifier(&self) -> Option<&str> {
        self.key_identifier.as_deref()
    }

    /// Returns the logical key name.
    #[must_use]
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Returns the rotation family prefix, if known.
    #[must_use]
    pub fn key_name_base(&self) -> Option<&str> {
        self.key_name_base.as_deref().filter(|base| !base.is_empty())
    }

    /// Returns the version token.
    #[must_use]
    pub fn key_version(&self) -> &str {
        &self.key_version
    }

    /// Returns the configured material, if any.
    #[must_use]
    pub const fn material(&self) -> Option<&KeyMaterial> {
        self.material.as_ref()
    }

    /// Returns the out-of-band HMAC, if any.
    #[must_use]
    pub fn hmac_base64(&self) -> Option<&str> {
        self.hmac_base64.as_deref().filter(|hmac| !hmac.is_empty())
    }

    pub(crate) fn set_hmac(&mut self, hmac_base64: Option<String>) {
        self.hmac_base64 = hmac_base64;
    }

    pub(crate) fn set_name_base(&mut self, base: String) {
        self.key_name_base = Some(base);
    }

    /// Resolved key bytes, or `None` when no material is configured.
    #[must_use]
    pub fn key_bytes(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.material.as_ref().map(KeyMaterial::to_bytes)
    }

    /// True when both name and version are non-empty.
    #[must_use]
    pub fn is_header_complete(&self) -> bool {
        !self.key_name.is_empty() && !self.key_version.is_empty()
    }

    /// True when header-complete and the material is exactly 256 bits.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_header_complete() && self.key_bytes().is_some_and(|bytes| bytes.len() == KEY_SIZE)
    }

    /// Case-insensitive prefix test used for rotation families.
    ///
    /// An empty prefix never matches.
    pub(crate) fn name_starts_with(&self, prefix: &str) -> bool {
        !prefix.is_empty()
            && self
                .key_name
                .get(..prefix.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }
}

impl PartialEq for EncryptionKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_name.eq_ignore_ascii_case(&other.key_name)
            && self.key_version.eq_ignore_ascii_case(&other.key_version)
    }
}

impl Eq for EncryptionKey {}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("key_identifier", &self.key_identifier)
            .field("key_name", &self.key_name)
            .field("key_name_base", &self.key_name_base)
            .field("key_version", &self.key_version)
            .field("material", &self.material.as_ref().map(|_| "[REDACTED]"))
            .field("hmac_base64", &self.hmac_base64)
            .finish()
    }
}

impl fmt::Display for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.key_name, self.key_version)
    }
}
