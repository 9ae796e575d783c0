//! # `fieldseal`
//!
//! Multi-tenant field and blob encryption with key rotation.
//!
//! ## Features
//!
//! - AES-256-GCM field encryption with a self-describing `name|version|base64` header
//! - AES-256-CBC + HMAC-SHA256 blob encryption, whole or streamed
//! - Per-tenant current keys with rotation families and a shared common key
//! - Legacy blob layout with the HMAC embedded after the IV
//! - Entity-level encryption through `#[derive(EncryptedFields)]`
//!
//! ## Example
//!
//! ```rust,ignore
//! use fieldseal::prelude::*;
//!
//! let resolver = KeyResolver::new(Arc::new(finder)).for_tenant("tenant-42");
//! let codec = FieldCodec::new(&resolver);
//!
//! let stored = codec.encrypt_str("alice@example.com").await?.unwrap_or_default();
//! let email = codec.decrypt_str(&stored).await?;
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blob;
pub mod entity;
pub mod error;
pub mod field;
pub mod header;
pub mod key;
pub mod key_finder;
pub mod options;
#[cfg(feature = "persistence")]
pub mod persistence;
pub mod resolver;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::blob::{BlobCodec, BlobMetadata, DecryptingStream, StreamState};
    pub use crate::entity::{EncryptedFields, FieldSlot};
    pub use crate::error::{Error, KeyFinderError};
    pub use crate::field::FieldCodec;
    pub use crate::header::{is_encrypted, FieldHeader};
    pub use crate::key::{EncryptionKey, KeyMaterial};
    pub use crate::key_finder::KeyFinder;
    pub use crate::options::ResolverOptions;
    pub use crate::resolver::KeyResolver;
}
