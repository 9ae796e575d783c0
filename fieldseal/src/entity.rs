//! Object-level encryption over a fixed table of encrypted fields.
//!
//! Entity types list their encrypted fields by implementing
//! [`EncryptedFields`], normally through `#[derive(EncryptedFields)]` from
//! `fieldseal-derive`. Only textual fields can be listed, and the list is
//! fixed at compile time.

use crate::error::Error;
use crate::field::{seal, FieldCodec};
use crate::header::{assemble_field_value, is_encrypted};
use crate::key_finder::KeyFinder;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

/// Mutable access to one encrypted field of an entity.
#[derive(Debug)]
pub struct FieldSlot<'a> {
    name: &'static str,
    value: &'a mut String,
}

impl<'a> FieldSlot<'a> {
    /// Creates a slot for the field called `name`.
    pub fn new(name: &'static str, value: &'a mut String) -> Self {
        Self { name, value }
    }

    /// Returns the field name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the current field value.
    #[must_use]
    pub fn value(&self) -> &str {
        self.value
    }

    fn set(&mut self, value: String) {
        *self.value = value;
    }
}

/// Entities with fields stored encrypted.
///
/// # Example
///
/// ```
/// use fieldseal::entity::{EncryptedFields, FieldSlot};
///
/// struct Customer {
///     id: u64,
///     email: String,
///     nickname: Option<String>,
/// }
///
/// impl EncryptedFields for Customer {
///     fn encrypted_fields_mut(&mut self) -> Vec<FieldSlot<'_>> {
///         let mut slots = vec![FieldSlot::new("email", &mut self.email)];
///         if let Some(nickname) = self.nickname.as_mut() {
///             slots.push(FieldSlot::new("nickname", nickname));
///         }
///         slots
///     }
/// }
/// ```
pub trait EncryptedFields {
    /// Returns the encrypted fields that currently hold a value.
    fn encrypted_fields_mut(&mut self) -> Vec<FieldSlot<'_>>;
}

impl<'r, F: KeyFinder + ?Sized> FieldCodec<'r, F> {
    /// Encrypts every listed field of `entity` that is not already encrypted.
    ///
    /// Returns the number of fields encrypted. Running it twice changes
    /// nothing the second time. With no ready key this is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the current key cannot be resolved or encryption fails.
    pub async fn encrypt_entity<T: EncryptedFields + ?Sized>(
        &self,
        entity: &mut T,
    ) -> Result<usize, Error> {
        let key = self.resolver.current_key().await?;
        if !key.is_ready() {
            debug!("current key not ready, leaving entity unencrypted");
            return Ok(0);
        }

        let mut encrypted = 0;
        for mut slot in entity.encrypted_fields_mut() {
            if slot.value().is_empty() || is_encrypted(slot.value()) {
                continue;
            }
            let sealed = seal(slot.value().as_bytes(), key)?;
            slot.set(assemble_field_value(key, &STANDARD.encode(sealed)));
            encrypted += 1;
        }
        Ok(encrypted)
    }

    /// Decrypts every listed field of `entity` that is in encrypted form.
    ///
    /// This is the public entry point for entities the caller built or
    /// received itself. Entities materialized by the persistence layer go
    /// through `persistence::decrypt_loaded` instead.
    ///
    /// # Errors
    ///
    /// Fails on the first field that cannot be decrypted; fields before it
    /// are already replaced.
    pub async fn decrypt_entity<T: EncryptedFields + ?Sized>(
        &self,
        entity: &mut T,
    ) -> Result<usize, Error> {
        self.decrypt_fields(entity).await
    }

    pub(crate) async fn decrypt_fields<T: EncryptedFields + ?Sized>(
        &self,
        entity: &mut T,
    ) -> Result<usize, Error> {
        let mut decrypted = 0;
        for mut slot in entity.encrypted_fields_mut() {
            if !is_encrypted(slot.value()) {
                continue;
            }
            let plaintext = self.decrypt_str(slot.value()).await?;
            debug!(field = slot.name(), "decrypted field");
            slot.set(plaintext);
            decrypted += 1;
        }
        Ok(decrypted)
    }
}
