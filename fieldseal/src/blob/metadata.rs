//! Blob metadata stored next to an encrypted blob.
//!
//! The current blob format keeps the key identity and HMAC out of the byte
//! stream, in the blob store's metadata under these names.

use crate::error::Error;
use crate::key::EncryptionKey;
use std::collections::BTreeMap;

/// Metadata name for the key name.
pub const KEY_NAME: &str = "BlobEncryptionKeyName";

/// Metadata name for the key version.
pub const KEY_VERSION: &str = "BlobEncryptionKeyVersion";

/// Metadata name for the plaintext length in bytes.
pub const CONTENT_LENGTH: &str = "UnencryptedContentLength";

/// Metadata name for the base64 HMAC-SHA256 of the plaintext.
pub const HMAC: &str = "HMAC";

/// Key identity and integrity data for one encrypted blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobMetadata {
    /// Name of the key the blob was encrypted with.
    pub key_name: String,
    /// Version of that key; empty means the key's default version.
    pub key_version: String,
    /// Plaintext length, when recorded.
    pub unencrypted_content_length: Option<u64>,
    /// Base64 HMAC of the plaintext. `None` for legacy blobs that embed the
    /// HMAC after the IV.
    pub hmac_base64: Option<String>,
}

impl BlobMetadata {
    /// Metadata naming a key, with no length or HMAC.
    #[must_use]
    pub fn for_key(key_name: impl Into<String>, key_version: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            key_version: key_version.into(),
            unencrypted_content_length: None,
            hmac_base64: None,
        }
    }

    /// The header key to resolve before decrypting.
    #[must_use]
    pub fn header_key(&self) -> EncryptionKey {
        let key = EncryptionKey::new(&self.key_name, &self.key_version);
        match self.hmac_base64.as_deref().filter(|hmac| !hmac.is_empty()) {
            Some(hmac) => key.with_hmac(hmac),
            None => key,
        }
    }

    /// Metadata entries to store with the blob.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(KEY_NAME.to_owned(), self.key_name.clone());
        map.insert(KEY_VERSION.to_owned(), self.key_version.clone());
        if let Some(length) = self.unencrypted_content_length {
            map.insert(CONTENT_LENGTH.to_owned(), length.to_string());
        }
        if let Some(hmac) = &self.hmac_base64 {
            map.insert(HMAC.to_owned(), hmac.clone());
        }
        map
    }

    /// Reads metadata entries back. Names match case-insensitively, since
    /// some blob stores lowercase them.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMetadata` if the key name is missing or the
    /// content length is not a number.
    pub fn from_map<I, K, V>(entries: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut metadata = Self::for_key("", "");
        for (name, value) in entries {
            let (name, value) = (name.as_ref(), value.as_ref().trim());
            if name.eq_ignore_ascii_case(KEY_NAME) {
                metadata.key_name = value.to_owned();
            } else if name.eq_ignore_ascii_case(KEY_VERSION) {
                metadata.key_version = value.to_owned();
            } else if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value.parse().map_err(|_| {
                    Error::InvalidMetadata(format!("{CONTENT_LENGTH} is not a number: {value}"))
                })?;
                metadata.unencrypted_content_length = Some(length);
            } else if name.eq_ignore_ascii_case(HMAC) && !value.is_empty() {
                metadata.hmac_base64 = Some(value.to_owned());
            }
        }

        if metadata.key_name.is_empty() {
            return Err(Error::InvalidMetadata(format!("{KEY_NAME} is missing")));
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_round_trip() {
        let metadata = BlobMetadata {
            key_name: "key--exos-boa".into(),
            key_version: "0f8fad5b-d9cb-469f-a165-70867728950e".into(),
            unencrypted_content_length: Some(42),
            hmac_base64: Some("aG1hYw==".into()),
        };

        let map = metadata.to_map();
        assert_eq!(map[CONTENT_LENGTH], "42");
        assert_eq!(BlobMetadata::from_map(&map).unwrap(), metadata);
    }

    #[test]
    fn test_names_match_case_insensitively() {
        let entries = [("blobencryptionkeyname", "key--a"), ("hmac", "aG1hYw==")];
        let metadata = BlobMetadata::from_map(entries).unwrap();
        assert_eq!(metadata.key_name, "key--a");
        assert_eq!(metadata.header_key().hmac_base64(), Some("aG1hYw=="));
    }

    #[test]
    fn test_missing_name_and_bad_length_are_rejected() {
        assert!(matches!(
            BlobMetadata::from_map([(KEY_VERSION, "v1")]),
            Err(Error::InvalidMetadata(_))
        ));
        assert!(matches!(
            BlobMetadata::from_map([(KEY_NAME, "key--a"), (CONTENT_LENGTH, "many")]),
            Err(Error::InvalidMetadata(_))
        ));
    }
}
