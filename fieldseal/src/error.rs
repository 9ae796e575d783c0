//! Error types for `fieldseal` operations.

use std::fmt;
use std::io;

/// Main error type for `fieldseal` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required input (key, stream, buffer) was missing or empty
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The data was encrypted under a key the current tenant may not use.
    ///
    /// The key name is sanitized before it lands here; key material never does.
    #[error("not authorized to decrypt data encrypted with key '{key_name}'")]
    NotAuthorized {
        /// Sanitized name of the key found in the ciphertext header
        key_name: String,
    },

    /// AEAD tag verification failed (data may be corrupted or tampered)
    #[error("authentication failed: ciphertext may be corrupted or tampered")]
    AuthenticationFailed,

    /// Blob HMAC verification failed (data may be corrupted or tampered)
    #[error("HMAC mismatch: blob may be corrupted or tampered")]
    HmacMismatch,

    /// Ciphertext is shorter than its fixed prefix or otherwise unusable
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    /// The underlying stream ended before a fixed-size prefix was read
    #[error("unexpected end of stream: expected {expected} bytes, got {actual}")]
    UnexpectedEndOfStream {
        /// Bytes the prefix needs
        expected: usize,
        /// Bytes available before end of stream
        actual: usize,
    },

    /// The key is missing its name, version or 256-bit material
    #[error("encryption key not ready: {0}")]
    KeyNotReady(String),

    /// Blob metadata is missing a field or carries an unparseable value
    #[error("invalid blob metadata: {0}")]
    InvalidMetadata(String),

    /// Encryption operation failed
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption operation failed
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Key finder operation failed
    #[error("key finder error: {0}")]
    KeyFinder(#[from] KeyFinderError),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for failures of the AEAD tag or the blob HMAC.
    #[must_use]
    pub const fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::HmacMismatch)
    }

    /// Recovers a `fieldseal` error carried inside an [`io::Error`].
    ///
    /// The streaming decryptor reports through `io::Error`, since that is what
    /// `AsyncRead` allows; this unwraps it again.
    #[must_use]
    pub fn from_io(err: &io::Error) -> Option<&Self> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<Self>())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            Error::UnexpectedEndOfStream { .. } => Self::new(io::ErrorKind::UnexpectedEof, err),
            Error::InvalidArgument(_) => Self::new(io::ErrorKind::InvalidInput, err),
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Errors reported by a [`KeyFinder`](crate::key_finder::KeyFinder).
#[derive(Debug)]
pub enum KeyFinderError {
    /// No key with this name (and version, if one was given)
    KeyNotFound(String),

    /// The backing key store could not be reached
    Unavailable(String),

    /// I/O operation failed
    Io(io::Error),
}

impl fmt::Display for KeyFinderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound(name) => write!(f, "key not found: {name}"),
            Self::Unavailable(msg) => write!(f, "key store unavailable: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyFinderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for KeyFinderError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
