//! Decryption key resolution.
//!
//! A [`KeyResolver`] is a short-lived session object for one unit of work
//! (one request, one job). It owns the tenant's "current key", resolved lazily
//! on first use, and decides which key material may decrypt a given header.
//!
//! Resolution order for a header key found in stored data:
//!
//! 1. Same name and version as the current key: reuse the current material.
//! 2. Same name, other version (rotation): fetch that version, or the default
//!    version when the header carries none.
//! 3. Name starts with the current key's base name: fetch that exact key.
//!    A key without a base name has no family and skips this step.
//! 4. Name starts with the common key's base name (or equals its name when it
//!    has none): reuse the common key when the versions match, otherwise fetch
//!    that exact key.
//! 5. Otherwise the caller is not authorized.
//!
//! With [`ResolverOptions::validate_key_for_decryption`] turned off, steps 3
//! to 5 are replaced by a direct lookup of the header key.

use crate::error::Error;
use crate::header::sanitize_key_name;
use crate::key::EncryptionKey;
use crate::key_finder::KeyFinder;
use crate::options::ResolverOptions;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Per-session key resolver.
///
/// # Example
///
/// ```rust,ignore
/// use fieldseal::resolver::KeyResolver;
///
/// let resolver = KeyResolver::new(Arc::new(finder)).for_tenant("tenant-42");
/// let key = resolver.validate_decryption_key(&header.to_key()).await?;
/// ```
pub struct KeyResolver<F: ?Sized> {
    finder: Arc<F>,
    options: ResolverOptions,
    identifier: Option<String>,
    current: OnceCell<EncryptionKey>,
}

impl<F: KeyFinder + ?Sized> KeyResolver<F> {
    /// Creates a resolver for the process-wide default tenant.
    pub fn new(finder: Arc<F>) -> Self {
        Self {
            finder,
            options: ResolverOptions::default(),
            identifier: None,
            current: OnceCell::new(),
        }
    }

    /// Scopes the resolver to a tenant identifier from the request context.
    #[must_use]
    pub fn for_tenant(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self.current = OnceCell::new();
        self
    }

    /// Replaces the resolver options.
    #[must_use]
    pub fn with_options(mut self, options: ResolverOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the resolver options.
    pub const fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Returns the tenant identifier, if one was set.
    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    /// Returns the key this session encrypts with.
    ///
    /// Looked up once per session; a tenant without a configured key gets an
    /// empty (not ready) key.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyFinder` if the lookup fails. A failed lookup is not
    /// cached.
    pub async fn current_key(&self) -> Result<&EncryptionKey, Error> {
        self.current.get_or_try_init(|| self.load_current_key(self.identifier.as_deref())).await
    }

    /// Pins the current key to the one configured for `identifier`.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyFinder` if the lookup fails; the previous key stays.
    pub async fn set_encryption_key_for(&mut self, identifier: &str) -> Result<(), Error> {
        let key = self.load_current_key(Some(identifier)).await?;
        self.identifier = Some(identifier.to_owned());
        self.current = OnceCell::new_with(Some(key));
        Ok(())
    }

    /// Pins the current key, bypassing lookup from the tenant identifier.
    pub fn set_encryption_key(&mut self, key: EncryptionKey) {
        self.current = OnceCell::new_with(Some(key));
    }

    async fn load_current_key(&self, identifier: Option<&str>) -> Result<EncryptionKey, Error> {
        let mut key = self.finder.current_encryption_key(identifier).await?.unwrap_or_default();
        if key.key_name_base().is_none() {
            if let Some(base) = self.name_base(&key).await? {
                key.set_name_base(base);
            }
        }
        debug!(key_name = key.key_name(), ready = key.is_ready(), "resolved current key");
        Ok(key)
    }

    /// Rotation family prefix of `key`, configured or looked up.
    ///
    /// `None` when the key belongs to no family; such a key only ever matches
    /// its own name.
    async fn name_base(&self, key: &EncryptionKey) -> Result<Option<String>, Error> {
        if let Some(base) = key.key_name_base() {
            return Ok(Some(base.to_owned()));
        }
        if key.key_name().is_empty() {
            return Ok(None);
        }
        let base = self
            .finder
            .find_key_name_base(key.key_name(), non_empty(key.key_version()))
            .await?
            .filter(|base| !base.is_empty());
        Ok(base)
    }

    async fn fetch_exact(&self, header_key: &EncryptionKey) -> Result<EncryptionKey, Error> {
        let key = self
            .finder
            .find_key_value(header_key.key_name(), non_empty(header_key.key_version()))
            .await?;
        Ok(key)
    }

    /// Decides which key material decrypts data stamped with `header_key`.
    ///
    /// An out-of-band HMAC on `header_key` is carried over to the result.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidArgument` if the header key has no name
    /// - `Error::NotAuthorized` if no permitted key matches the header
    /// - `Error::KeyFinder` if a lookup fails
    #[tracing::instrument(
        skip_all,
        fields(key_name = %sanitize_key_name(header_key.key_name()))
    )]
    pub async fn validate_decryption_key(
        &self,
        header_key: &EncryptionKey,
    ) -> Result<EncryptionKey, Error> {
        if header_key.key_name().is_empty() {
            return Err(Error::InvalidArgument("header key has no name".into()));
        }

        let hmac = header_key.hmac_base64().map(str::to_owned);
        let current = self.current_key().await?;

        if header_key == current {
            debug!("header matches current key");
            return Ok(carry_hmac(current.clone(), hmac));
        }

        if !current.key_name().is_empty()
            && header_key.key_name().eq_ignore_ascii_case(current.key_name())
        {
            debug!("header is another version of the current key");
            let key = self
                .finder
                .find_key_value(header_key.key_name(), non_empty(header_key.key_version()))
                .await?;
            return Ok(carry_hmac(key, hmac));
        }

        if !self.options.validate_key_for_decryption {
            debug!("tenant validation disabled, fetching header key directly");
            return Ok(carry_hmac(self.fetch_exact(header_key).await?, hmac));
        }

        if let Some(base) = self.name_base(current).await? {
            if header_key.name_starts_with(&base) {
                debug!(base = %base, "header key shares the current key's rotation family");
                return Ok(carry_hmac(self.fetch_exact(header_key).await?, hmac));
            }
        }

        if self.options.common_key_failover {
            if let Some(common) = self.finder.common_encryption_key().await? {
                let in_family = match self.name_base(&common).await? {
                    Some(base) => header_key.name_starts_with(&base),
                    None => header_key.key_name().eq_ignore_ascii_case(common.key_name()),
                };
                if in_family {
                    if header_key.key_version().eq_ignore_ascii_case(common.key_version()) {
                        debug!("header matches common key");
                        return Ok(carry_hmac(common, hmac));
                    }
                    debug!("header is another version of the common key");
                    return Ok(carry_hmac(self.fetch_exact(header_key).await?, hmac));
                }
            }
        }

        if current.key_name().is_empty() {
            warn!("decryption refused: no key configured for this tenant");
        } else {
            warn!(
                current_key = %sanitize_key_name(current.key_name()),
                "decryption refused: data encrypted under a key this tenant may not use"
            );
        }
        Err(Error::NotAuthorized { key_name: sanitize_key_name(header_key.key_name()) })
    }
}

fn carry_hmac(mut key: EncryptionKey, hmac: Option<String>) -> EncryptionKey {
    if hmac.is_some() {
        key.set_hmac(hmac);
    }
    key
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::KeyFinderError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const V1: &str = "11111111-1111-1111-1111-111111111111";
    pub const V2: &str = "22222222-2222-2222-2222-222222222222";
    pub const VC: &str = "cccccccc-cccc-cccc-cccc-cccccccccccc";

    // Mock key finder for testing
    #[derive(Default)]
    pub struct MockKeyFinder {
        keys: HashMap<(String, String), EncryptionKey>,
        defaults: HashMap<String, String>,
        bases: HashMap<String, String>,
        current: Option<EncryptionKey>,
        common: Option<EncryptionKey>,
        pub value_lookups: AtomicUsize,
        pub current_lookups: AtomicUsize,
    }

    impl MockKeyFinder {
        pub fn with_key(mut self, name: &str, version: &str, fill: u8) -> Self {
            let key = EncryptionKey::new(name, version).with_value_bytes(vec![fill; 32]);
            self.keys.insert((name.to_lowercase(), version.to_lowercase()), key);
            self.defaults.insert(name.to_lowercase(), version.to_owned());
            self
        }

        pub fn with_base(mut self, name: &str, base: &str) -> Self {
            self.bases.insert(name.to_lowercase(), base.to_owned());
            self
        }

        pub fn with_current(mut self, name: &str, version: &str) -> Self {
            self.current = self.lookup(name, Some(version));
            self
        }

        pub fn with_common(mut self, name: &str, version: &str, base: &str) -> Self {
            self.common = self.lookup(name, Some(version)).map(|key| key.with_name_base(base));
            self
        }

        fn lookup(&self, name: &str, version: Option<&str>) -> Option<EncryptionKey> {
            let name = name.to_lowercase();
            let version = match version {
                Some(version) => version.to_lowercase(),
                None => self.defaults.get(&name)?.to_lowercase(),
            };
            self.keys.get(&(name, version)).cloned()
        }

        pub fn value_lookups(&self) -> usize {
            self.value_lookups.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyFinder for MockKeyFinder {
        async fn find_key_value(
            &self,
            key_name: &str,
            key_version: Option<&str>,
        ) -> Result<EncryptionKey, KeyFinderError> {
            self.value_lookups.fetch_add(1, Ordering::SeqCst);
            self.lookup(key_name, key_version)
                .ok_or_else(|| KeyFinderError::KeyNotFound(key_name.to_owned()))
        }

        async fn find_key_name_base(
            &self,
            key_name: &str,
            _key_version: Option<&str>,
        ) -> Result<Option<String>, KeyFinderError> {
            Ok(self.bases.get(&key_name.to_lowercase()).cloned())
        }

        async fn current_encryption_key(
            &self,
            _identifier: Option<&str>,
        ) -> Result<Option<EncryptionKey>, KeyFinderError> {
            self.current_lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.current.clone())
        }

        async fn common_encryption_key(&self) -> Result<Option<EncryptionKey>, KeyFinderError> {
            Ok(self.common.clone())
        }
    }

    fn rotation_finder() -> MockKeyFinder {
        MockKeyFinder::default()
            .with_key("key--exos-boa", V1, 1)
            .with_key("key--exos-boa--v2", V2, 2)
            .with_key("key--other", V1, 3)
            .with_key("key--common", VC, 4)
            .with_key("key--common", V1, 5)
            .with_base("key--exos-boa--v2", "key--exos-boa")
            .with_current("key--exos-boa--v2", V2)
            .with_common("key--common", VC, "key--common")
    }

    fn resolver(finder: MockKeyFinder) -> (Arc<MockKeyFinder>, KeyResolver<MockKeyFinder>) {
        let finder = Arc::new(finder);
        (Arc::clone(&finder), KeyResolver::new(finder))
    }

    fn material(key: &EncryptionKey) -> Vec<u8> {
        key.key_bytes().unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_current_key_is_cache_hit() {
        let (finder, resolver) = resolver(rotation_finder());
        let header = EncryptionKey::new("KEY--EXOS-BOA--V2", V2).with_hmac("aG1hYw==");

        let key = resolver.validate_decryption_key(&header).await.unwrap();

        assert_eq!(material(&key), vec![2; 32]);
        assert_eq!(key.hmac_base64(), Some("aG1hYw=="));
        assert_eq!(finder.value_lookups(), 0);
    }

    #[tokio::test]
    async fn test_current_key_resolved_once_per_session() {
        let (finder, resolver) = resolver(rotation_finder());
        let header = EncryptionKey::new("key--exos-boa--v2", V2);

        resolver.validate_decryption_key(&header).await.unwrap();
        resolver.validate_decryption_key(&header).await.unwrap();

        assert_eq!(finder.current_lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_name_other_version_fetches_that_version() {
        let finder = rotation_finder().with_key("key--exos-boa--v2", V1, 9);
        let (finder, resolver) = resolver(finder);

        let key =
            resolver.validate_decryption_key(&EncryptionKey::new("key--exos-boa--v2", V1)).await;

        assert_eq!(material(&key.unwrap()), vec![9; 32]);
        assert_eq!(finder.value_lookups(), 1);
    }

    #[tokio::test]
    async fn test_same_name_empty_version_fetches_default() {
        let (finder, resolver) = resolver(rotation_finder());

        let key = resolver
            .validate_decryption_key(&EncryptionKey::new("key--exos-boa--v2", ""))
            .await
            .unwrap();

        assert_eq!(key.key_version(), V2);
        assert_eq!(finder.value_lookups(), 1);
    }

    #[tokio::test]
    async fn test_rotation_family_resolves_older_key() {
        let (_, resolver) = resolver(rotation_finder());

        let key =
            resolver.validate_decryption_key(&EncryptionKey::new("key--exos-boa", V1)).await;

        assert_eq!(material(&key.unwrap()), vec![1; 32]);
    }

    #[tokio::test]
    async fn test_common_key_same_version_needs_no_lookup() {
        let (finder, resolver) = resolver(rotation_finder());
        let header = EncryptionKey::new("key--common", VC).with_hmac("Y29tbW9u");

        let key = resolver.validate_decryption_key(&header).await.unwrap();

        assert_eq!(material(&key), vec![4; 32]);
        assert_eq!(key.hmac_base64(), Some("Y29tbW9u"));
        assert_eq!(finder.value_lookups(), 0);
    }

    #[tokio::test]
    async fn test_common_key_other_version_needs_one_lookup() {
        let (finder, resolver) = resolver(rotation_finder());

        let key = resolver.validate_decryption_key(&EncryptionKey::new("key--common", V1)).await;

        assert_eq!(material(&key.unwrap()), vec![5; 32]);
        assert_eq!(finder.value_lookups(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_key_is_not_authorized() {
        let (finder, resolver) = resolver(rotation_finder());

        let result = resolver.validate_decryption_key(&EncryptionKey::new("key--other", V1)).await;

        assert!(matches!(
            result,
            Err(Error::NotAuthorized { ref key_name }) if key_name == "key--other"
        ));
        assert_eq!(finder.value_lookups(), 0);
    }

    #[tokio::test]
    async fn test_tenant_without_key_is_not_authorized() {
        let finder = MockKeyFinder::default().with_key("key--other", V1, 3);
        let (_, resolver) = resolver(finder);

        let result = resolver.validate_decryption_key(&EncryptionKey::new("key--other", V1)).await;

        assert!(matches!(result, Err(Error::NotAuthorized { .. })));
    }

    #[tokio::test]
    async fn test_failover_disabled_refuses_common_key() {
        let (_, resolver) = resolver(rotation_finder());
        let resolver = resolver
            .with_options(ResolverOptions { common_key_failover: false, ..Default::default() });

        let result = resolver.validate_decryption_key(&EncryptionKey::new("key--common", VC)).await;

        assert!(matches!(result, Err(Error::NotAuthorized { .. })));
    }

    #[tokio::test]
    async fn test_unrestricted_mode_fetches_any_key() {
        let (finder, resolver) = resolver(rotation_finder());
        let resolver = resolver.with_options(ResolverOptions::unrestricted());

        let key = resolver.validate_decryption_key(&EncryptionKey::new("key--other", V1)).await;

        assert_eq!(material(&key.unwrap()), vec![3; 32]);
        assert_eq!(finder.value_lookups(), 1);
    }

    #[tokio::test]
    async fn test_pinned_key_overrides_lazy_lookup() {
        let (finder, mut resolver) = resolver(rotation_finder());
        let pinned = EncryptionKey::new("key--other", V1).with_value_bytes(vec![3; 32]);
        resolver.set_encryption_key(pinned);

        let key = resolver.validate_decryption_key(&EncryptionKey::new("key--other", V1)).await;

        assert_eq!(material(&key.unwrap()), vec![3; 32]);
        assert_eq!(finder.current_lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_set_encryption_key_for_identifier() {
        let (finder, mut resolver) = resolver(rotation_finder());

        resolver.set_encryption_key_for("tenant-7").await.unwrap();

        assert_eq!(resolver.identifier(), Some("tenant-7"));
        assert_eq!(resolver.current_key().await.unwrap().key_name(), "key--exos-boa--v2");
        assert_eq!(finder.current_lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_current_key_base_comes_from_finder() {
        let (_, resolver) = resolver(rotation_finder());
        let current = resolver.current_key().await.unwrap();
        assert_eq!(current.key_name_base(), Some("key--exos-boa"));
    }

    #[tokio::test]
    async fn test_key_without_base_does_not_claim_longer_names() {
        let finder = MockKeyFinder::default()
            .with_key("key--acme", V1, 1)
            .with_key("key--acmecorp", V1, 2)
            .with_current("key--acme", V1);
        let (finder, resolver) = resolver(finder);

        let result =
            resolver.validate_decryption_key(&EncryptionKey::new("key--acmecorp", V1)).await;

        assert!(matches!(result, Err(Error::NotAuthorized { .. })));
        assert_eq!(finder.value_lookups(), 0);
        assert_eq!(resolver.current_key().await.unwrap().key_name_base(), None);
    }

    #[tokio::test]
    async fn test_common_key_without_base_matches_its_name_only() {
        let finder = MockKeyFinder::default()
            .with_key("key--acme", V1, 1)
            .with_key("key--shared", VC, 4)
            .with_key("key--shared", V2, 5)
            .with_key("key--shared-eu", VC, 6)
            .with_current("key--acme", V1)
            .with_common("key--shared", VC, "");
        let (_, resolver) = resolver(finder);

        let other_version =
            resolver.validate_decryption_key(&EncryptionKey::new("KEY--SHARED", V2)).await;
        assert_eq!(material(&other_version.unwrap()), vec![5; 32]);

        let longer =
            resolver.validate_decryption_key(&EncryptionKey::new("key--shared-eu", VC)).await;
        assert!(matches!(longer, Err(Error::NotAuthorized { .. })));
    }

    #[tokio::test]
    async fn test_empty_header_name_is_invalid() {
        let (_, resolver) = resolver(rotation_finder());
        let result = resolver.validate_decryption_key(&EncryptionKey::new("", V1)).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
