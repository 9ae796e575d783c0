//! Trusted decrypt entry point for the persistence integration.
//!
//! Compiled only with the `persistence` feature. The crate that hooks
//! entity materialization into the data store enables the feature and calls
//! [`decrypt_loaded`]; application code uses
//! [`FieldCodec::decrypt_entity`] on values it already holds.

use crate::entity::EncryptedFields;
use crate::error::Error;
use crate::field::FieldCodec;
use crate::key_finder::KeyFinder;

/// Decrypts an entity the persistence layer has just materialized.
///
/// # Errors
///
/// Same as [`FieldCodec::decrypt_entity`].
#[tracing::instrument(skip_all, fields(entity = std::any::type_name::<T>()))]
pub async fn decrypt_loaded<F, T>(codec: &FieldCodec<'_, F>, entity: &mut T) -> Result<usize, Error>
where
    F: KeyFinder + ?Sized,
    T: EncryptedFields,
{
    codec.decrypt_fields(entity).await
}
