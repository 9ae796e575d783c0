//! AES-256-GCM encryption of short field values.
//!
//! Binary layout of a sealed value:
//!
//! ```text
//! [tag:16][nonce:12][ciphertext:N]
//! ```
//!
//! The string form is the base64 of that layout, normally prefixed with the
//! key header (see [`crate::header`]).

use crate::error::Error;
use crate::header::{assemble_field_value, FieldHeader};
use crate::key::EncryptionKey;
use crate::key_finder::KeyFinder;
use crate::resolver::KeyResolver;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

/// AEAD tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// Nonce size for AES-GCM (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Fixed prefix ahead of the ciphertext.
pub const PREFIX_SIZE: usize = TAG_SIZE + NONCE_SIZE;

fn build_cipher(key: &EncryptionKey) -> Result<Aes256Gcm, Error> {
    if !key.is_ready() {
        return Err(Error::KeyNotReady(format!("key '{}' cannot be used", key.key_name())));
    }
    let bytes = key.key_bytes().ok_or_else(|| Error::KeyNotReady("no key material".into()))?;
    Aes256Gcm::new_from_slice(&bytes).map_err(|e| Error::KeyNotReady(format!("invalid key: {e}")))
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns `Error::KeyNotReady` if the key is not ready to use.
pub fn seal(plaintext: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, Error> {
    let cipher = build_cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce_bytes), b"", &mut buffer)
        .map_err(|e| Error::EncryptionFailed(format!("AES-GCM encryption failed: {e}")))?;

    let mut sealed = Vec::with_capacity(PREFIX_SIZE + buffer.len());
    sealed.extend_from_slice(&tag);
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&buffer);
    Ok(sealed)
}

/// Decrypts and verifies a value produced by [`seal`].
///
/// # Errors
///
/// - `Error::MalformedCiphertext` if the input is shorter than the prefix
/// - `Error::KeyNotReady` if the key is not ready to use
/// - `Error::AuthenticationFailed` if the tag does not verify
pub fn open(sealed: &[u8], key: &EncryptionKey) -> Result<Vec<u8>, Error> {
    if sealed.len() < PREFIX_SIZE {
        return Err(Error::MalformedCiphertext(format!(
            "sealed value is {} bytes, shorter than the {PREFIX_SIZE}-byte prefix",
            sealed.len()
        )));
    }
    let cipher = build_cipher(key)?;

    let (tag, rest) = sealed.split_at(TAG_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| Error::AuthenticationFailed)?;
    Ok(buffer)
}

/// Field encryption bound to one resolver session.
///
/// Encryption uses the session's current key. When that key is not ready,
/// encryption is a no-op that returns `None`, so environments without a
/// configured key keep working with plaintext.
pub struct FieldCodec<'r, F: ?Sized> {
    pub(crate) resolver: &'r KeyResolver<F>,
}

impl<'r, F: KeyFinder + ?Sized> FieldCodec<'r, F> {
    /// Creates a codec over `resolver`.
    pub const fn new(resolver: &'r KeyResolver<F>) -> Self {
        Self { resolver }
    }

    /// Encrypts raw bytes, returning the binary layout without a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the current key cannot be resolved.
    pub async fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let key = self.resolver.current_key().await?;
        if !key.is_ready() {
            debug!("current key not ready, leaving value unencrypted");
            return Ok(None);
        }
        seal(plaintext, key).map(Some)
    }

    /// Encrypts a string into `name|version|base64`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current key cannot be resolved.
    pub async fn encrypt_str(&self, plaintext: &str) -> Result<Option<String>, Error> {
        self.encrypt_text(plaintext, true).await
    }

    /// Encrypts a string into base64, with or without the key header.
    ///
    /// # Errors
    ///
    /// Returns an error if the current key cannot be resolved.
    pub async fn encrypt_text(
        &self,
        plaintext: &str,
        include_header: bool,
    ) -> Result<Option<String>, Error> {
        let key = self.resolver.current_key().await?;
        if !key.is_ready() {
            debug!("current key not ready, leaving value unencrypted");
            return Ok(None);
        }
        let encoded = STANDARD.encode(seal(plaintext.as_bytes(), key)?);
        Ok(Some(if include_header { assemble_field_value(key, &encoded) } else { encoded }))
    }

    /// Decrypts a stored field value.
    ///
    /// Values that are not in encrypted form come back unchanged: no header,
    /// a non-GUID version, undecodable base64, or a payload shorter than the
    /// tag and nonce.
    ///
    /// # Errors
    ///
    /// - `Error::NotAuthorized` if the header names a key this session may not use
    /// - `Error::AuthenticationFailed` if the value was tampered with
    /// - `Error::DecryptionFailed` if the plaintext is not UTF-8
    pub async fn decrypt_str(&self, value: &str) -> Result<String, Error> {
        let Some(header) = FieldHeader::parse(value).filter(FieldHeader::has_guid_version) else {
            return Ok(value.to_owned());
        };
        let sealed = match STANDARD.decode(header.cipher_text()) {
            Ok(sealed) if sealed.len() >= PREFIX_SIZE => sealed,
            _ => {
                debug!("header present but payload is not a sealed value, passing through");
                return Ok(value.to_owned());
            }
        };

        let key = self.resolver.validate_decryption_key(&header.to_key()).await?;
        let plaintext = open(&sealed, &key)?;
        String::from_utf8(plaintext)
            .map_err(|e| Error::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }

    /// Decrypts a binary sealed value with the session's current key.
    ///
    /// # Errors
    ///
    /// Same as [`open`], plus key lookup failures.
    pub async fn decrypt_bytes(&self, sealed: &[u8]) -> Result<Vec<u8>, Error> {
        let key = self.resolver.current_key().await?;
        open(sealed, key)
    }

    /// Decrypts a binary sealed value whose key identity is stored elsewhere.
    ///
    /// # Errors
    ///
    /// Same as [`open`], plus key resolution failures.
    pub async fn decrypt_bytes_with(
        &self,
        sealed: &[u8],
        header_key: &EncryptionKey,
    ) -> Result<Vec<u8>, Error> {
        let key = self.resolver.validate_decryption_key(header_key).await?;
        open(sealed, &key)
    }
}
