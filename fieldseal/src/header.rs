//! Header format for encrypted field values.
//!
//! Every encrypted field value is stored as:
//!
//! ```text
//! {key_name}|{key_version}|{base64(tag || nonce || ciphertext)}
//! ```
//!
//! A value that does not split into exactly three segments, or whose first
//! segment is not a valid key name, is plaintext. Parsing never fails.

use crate::key::EncryptionKey;
use uuid::Uuid;

/// Segment delimiter.
pub const DELIMITER: char = '|';

/// Longest accepted key name.
pub const MAX_KEY_NAME_LEN: usize = 127;

/// The three segments of an encrypted field value, borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader<'a> {
    key_name: &'a str,
    key_version: &'a str,
    cipher_text: &'a str,
}

impl<'a> FieldHeader<'a> {
    /// Splits `value` into its segments.
    ///
    /// Returns `None` when the value should be treated as plaintext.
    #[must_use]
    pub fn parse(value: &'a str) -> Option<Self> {
        let mut parts = value.split(DELIMITER);
        let (Some(key_name), Some(key_version), Some(cipher_text), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };

        if !is_valid_key_name(key_name) {
            return None;
        }

        Some(Self { key_name, key_version, cipher_text })
    }

    /// Returns the key name segment.
    #[must_use]
    pub const fn key_name(&self) -> &'a str {
        self.key_name
    }

    /// Returns the key version segment.
    #[must_use]
    pub const fn key_version(&self) -> &'a str {
        self.key_version
    }

    /// Returns the base64 ciphertext segment.
    #[must_use]
    pub const fn cipher_text(&self) -> &'a str {
        self.cipher_text
    }

    /// True when the version segment is a GUID.
    ///
    /// This separates real ciphertext from plaintext that happens to contain
    /// two delimiters.
    #[must_use]
    pub fn has_guid_version(&self) -> bool {
        Uuid::try_parse(self.key_version).is_ok()
    }

    /// The key identity recorded in this header, without material.
    #[must_use]
    pub fn to_key(&self) -> EncryptionKey {
        EncryptionKey::new(self.key_name, self.key_version)
    }
}

/// True when `value` parses as a header and carries a GUID version.
#[must_use]
pub fn is_encrypted(value: &str) -> bool {
    FieldHeader::parse(value).is_some_and(|header| header.has_guid_version())
}

/// Builds the stored form of a field value from a key and its ciphertext.
#[must_use]
pub fn assemble_field_value(key: &EncryptionKey, cipher_text: &str) -> String {
    format!(
        "{}{DELIMITER}{}{DELIMITER}{cipher_text}",
        key.key_name(),
        key.key_version()
    )
}

/// Key names are 1 to 127 characters of `[0-9A-Za-z-]`.
#[must_use]
pub fn is_valid_key_name(name: &str) -> bool {
    (1..=MAX_KEY_NAME_LEN).contains(&name.len())
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

/// Reduces an untrusted key name to something safe to put in an error.
#[must_use]
pub fn sanitize_key_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(MAX_KEY_NAME_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSION: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    #[test]
    fn test_parse_valid_value() {
        let value = format!("key--exos-boa|{VERSION}|AAEC");
        let header = FieldHeader::parse(&value).expect("header should parse");

        assert_eq!(header.key_name(), "key--exos-boa");
        assert_eq!(header.key_version(), VERSION);
        assert_eq!(header.cipher_text(), "AAEC");
        assert!(header.has_guid_version());
        assert!(is_encrypted(&value));
    }

    #[test]
    fn test_wrong_segment_count_is_plaintext() {
        assert!(FieldHeader::parse("hello world").is_none());
        assert!(FieldHeader::parse("a|b").is_none());
        assert!(FieldHeader::parse("a|b|c|d").is_none());
        assert!(FieldHeader::parse("").is_none());
    }

    #[test]
    fn test_invalid_key_name_is_plaintext() {
        assert!(FieldHeader::parse(&format!("bad name|{VERSION}|AAEC")).is_none());
        assert!(FieldHeader::parse(&format!("|{VERSION}|AAEC")).is_none());
        let long = "k".repeat(MAX_KEY_NAME_LEN + 1);
        assert!(FieldHeader::parse(&format!("{long}|{VERSION}|AAEC")).is_none());
        let longest = "k".repeat(MAX_KEY_NAME_LEN);
        assert!(FieldHeader::parse(&format!("{longest}|{VERSION}|AAEC")).is_some());
    }

    #[test]
    fn test_non_guid_version_is_not_encrypted() {
        let value = "price|10|20";
        assert!(FieldHeader::parse(value).is_some());
        assert!(!is_encrypted(value));
    }

    #[test]
    fn test_assemble_then_parse() {
        let key = EncryptionKey::new("key--exos-boa", VERSION);
        let value = assemble_field_value(&key, "c2VjcmV0");

        assert_eq!(value, format!("key--exos-boa|{VERSION}|c2VjcmV0"));
        let header = FieldHeader::parse(&value).unwrap();
        assert_eq!(header.to_key(), key);
    }

    #[test]
    fn test_sanitize_key_name() {
        assert_eq!(sanitize_key_name("key--a<script>"), "key--ascript");
        assert_eq!(sanitize_key_name(&"x".repeat(300)).len(), MAX_KEY_NAME_LEN);
    }
}
