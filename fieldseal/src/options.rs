//! Engine options.
//!
//! Options are plain data with serde defaults so that the host application
//! can bind them from whatever configuration source it uses.

use serde::Deserialize;

/// Default read size for blob encryption and streaming decryption.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 8 * 1024;

/// Options controlling key resolution and blob I/O.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResolverOptions {
    /// Enforce tenant scoping when choosing a decryption key.
    ///
    /// Turning this off lets privileged callers decrypt with any key the
    /// finder knows about.
    #[serde(default = "default_true")]
    pub validate_key_for_decryption: bool,

    /// Fall back to the shared common key when the header key is unrelated
    /// to the current key.
    #[serde(default = "default_true")]
    pub common_key_failover: bool,

    /// Read size used when pulling from blob streams.
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,
}

const fn default_true() -> bool {
    true
}

const fn default_stream_buffer_size() -> usize {
    DEFAULT_STREAM_BUFFER_SIZE
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            validate_key_for_decryption: true,
            common_key_failover: true,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
        }
    }
}

impl ResolverOptions {
    /// Options for privileged contexts that decrypt regardless of tenant.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self { validate_key_for_decryption: false, ..Self::default() }
    }

    /// Overrides the stream read size. Zero is clamped to one byte.
    #[must_use]
    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_strict() {
        let options = ResolverOptions::default();
        assert!(options.validate_key_for_decryption);
        assert!(options.common_key_failover);
        assert_eq!(options.stream_buffer_size, DEFAULT_STREAM_BUFFER_SIZE);
    }

    #[test]
    fn test_unrestricted_relaxes_only_validation() {
        let options = ResolverOptions::unrestricted();
        assert!(!options.validate_key_for_decryption);
        assert!(options.common_key_failover);
    }

    #[test]
    fn test_buffer_size_clamped() {
        assert_eq!(ResolverOptions::default().with_stream_buffer_size(0).stream_buffer_size, 1);
    }
}
