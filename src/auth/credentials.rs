// Credential store
// Pair-level access to the access/renewal tokens over an injected storage

use parking_lot::RwLock;
use std::sync::Arc;

use super::storage::{MemoryStorage, TokenStorage};
use super::types::{TokenPair, ACCESS_TOKEN_KEY, RENEWAL_TOKEN_KEY};

/// Holds the current credential pair for the lifetime of the session.
///
/// Reads and writes of the two keys are serialised by one lock, so a reader
/// sees either the old pair or the new one. Storage failures are logged and
/// never raised; a failed read counts as "absent".
pub struct CredentialStore {
    storage: Arc<dyn TokenStorage>,
    lock: RwLock<()>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            storage,
            lock: RwLock::new(()),
        }
    }

    /// Store backed by process memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Current pair, `None` when no access token is stored
    pub fn get(&self) -> Option<TokenPair> {
        let _guard = self.lock.read();

        let access_token = self.read_key(ACCESS_TOKEN_KEY)?;
        let renewal_token = self.read_key(RENEWAL_TOKEN_KEY);

        Some(TokenPair {
            access_token,
            renewal_token,
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().map(|pair| pair.access_token)
    }

    pub fn renewal_token(&self) -> Option<String> {
        let _guard = self.lock.read();
        self.read_key(RENEWAL_TOKEN_KEY)
    }

    /// Write the pair atomically.
    /// `None` for the renewal token keeps the one already stored.
    pub fn set(&self, access_token: &str, renewal_token: Option<&str>) {
        let _guard = self.lock.write();

        let result = match renewal_token {
            Some(renewal) => self
                .storage
                .set_many(&[(ACCESS_TOKEN_KEY, access_token), (RENEWAL_TOKEN_KEY, renewal)]),
            None => self.storage.set(ACCESS_TOKEN_KEY, access_token),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
    }

    /// Start a new session: write the access token and replace the renewal
    /// token, removing it when the server issued none
    pub fn replace(&self, access_token: &str, renewal_token: Option<&str>) {
        let _guard = self.lock.write();

        let result = match renewal_token {
            Some(renewal) => self
                .storage
                .set_many(&[(ACCESS_TOKEN_KEY, access_token), (RENEWAL_TOKEN_KEY, renewal)]),
            None => self
                .storage
                .apply(&[(ACCESS_TOKEN_KEY, access_token)], &[RENEWAL_TOKEN_KEY]),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
    }

    /// Store a renewed access token, but only for the session that holds
    /// `renewal_token`. Returns `false` and writes nothing once the session
    /// was replaced or cleared.
    pub fn set_access_if_renewal(&self, renewal_token: &str, access_token: &str) -> bool {
        let _guard = self.lock.write();

        if self.read_key(RENEWAL_TOKEN_KEY).as_deref() != Some(renewal_token) {
            return false;
        }

        if let Err(e) = self.storage.set(ACCESS_TOKEN_KEY, access_token) {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
        true
    }

    /// Remove both tokens if the stored renewal token is still `renewal_token`
    pub fn clear_if_renewal(&self, renewal_token: Option<&str>) -> bool {
        let _guard = self.lock.write();

        if self.read_key(RENEWAL_TOKEN_KEY).as_deref() != renewal_token {
            return false;
        }

        if let Err(e) = self
            .storage
            .remove_many(&[ACCESS_TOKEN_KEY, RENEWAL_TOKEN_KEY])
        {
            tracing::warn!(error = %e, "Failed to clear credentials");
        }
        true
    }

    /// Remove both tokens
    pub fn clear(&self) {
        let _guard = self.lock.write();

        if let Err(e) = self
            .storage
            .remove_many(&[ACCESS_TOKEN_KEY, RENEWAL_TOKEN_KEY])
        {
            tracing::warn!(error = %e, "Failed to clear credentials");
        }
    }

    fn read_key(&self, key: &str) -> Option<String> {
        match self.storage.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Failed to read credential");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct BrokenStorage;

    impl TokenStorage for BrokenStorage {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow!("disk on fire"))
        }

        fn apply(&self, _entries: &[(&str, &str)], _removals: &[&str]) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    #[test]
    fn test_empty_store_returns_none() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.get(), None);
        assert_eq!(store.access_token(), None);
        assert_eq!(store.renewal_token(), None);
    }

    #[test]
    fn test_set_and_get_pair() {
        let store = CredentialStore::in_memory();
        store.set("access", Some("renew"));

        assert_eq!(
            store.get(),
            Some(TokenPair::new("access", Some("renew".to_string())))
        );
    }

    #[test]
    fn test_set_without_renewal_keeps_existing() {
        let store = CredentialStore::in_memory();
        store.set("access-1", Some("renew"));
        store.set("access-2", None);

        let pair = store.get().unwrap();
        assert_eq!(pair.access_token, "access-2");
        assert_eq!(pair.renewal_token.as_deref(), Some("renew"));
    }

    #[test]
    fn test_replace_drops_old_renewal_token() {
        let store = CredentialStore::in_memory();
        store.set("access-1", Some("renew-1"));
        store.replace("access-2", None);

        assert_eq!(store.get(), Some(TokenPair::new("access-2", None)));

        store.replace("access-3", Some("renew-3"));
        assert_eq!(
            store.get(),
            Some(TokenPair::new("access-3", Some("renew-3".to_string())))
        );
    }

    #[test]
    fn test_replace_without_renewal_is_one_write() {
        #[derive(Default)]
        struct CountingStorage {
            inner: MemoryStorage,
            writes: std::sync::atomic::AtomicUsize,
        }

        impl TokenStorage for CountingStorage {
            fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
                self.inner.get(key)
            }

            fn apply(&self, entries: &[(&str, &str)], removals: &[&str]) -> anyhow::Result<()> {
                self.writes
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                self.inner.apply(entries, removals)
            }
        }

        let storage = Arc::new(CountingStorage::default());
        let store = CredentialStore::new(storage.clone());
        store.set("access-1", Some("renew-1"));
        store.replace("access-2", None);

        assert_eq!(storage.writes.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(store.get(), Some(TokenPair::new("access-2", None)));
    }

    #[test]
    fn test_set_access_if_renewal_matches_session() {
        let store = CredentialStore::in_memory();
        store.set("access-1", Some("renew-1"));

        assert!(store.set_access_if_renewal("renew-1", "access-2"));
        assert_eq!(
            store.get(),
            Some(TokenPair::new("access-2", Some("renew-1".to_string())))
        );

        // Another user logged in since the renewal token was read
        store.replace("other-access", Some("other-renew"));
        assert!(!store.set_access_if_renewal("renew-1", "access-3"));
        assert_eq!(
            store.get(),
            Some(TokenPair::new("other-access", Some("other-renew".to_string())))
        );

        // Logged out since
        store.clear();
        assert!(!store.set_access_if_renewal("other-renew", "access-4"));
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_clear_if_renewal_keeps_newer_session() {
        let store = CredentialStore::in_memory();
        store.set("access-1", Some("renew-1"));

        assert!(!store.clear_if_renewal(Some("renew-0")));
        assert!(store.get().is_some());

        assert!(store.clear_if_renewal(Some("renew-1")));
        assert_eq!(store.get(), None);

        store.set("access-2", None);
        assert!(store.clear_if_renewal(None));
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_clear_removes_both() {
        let store = CredentialStore::in_memory();
        store.set("access", Some("renew"));
        store.clear();

        assert_eq!(store.get(), None);
        assert_eq!(store.renewal_token(), None);
    }

    #[test]
    fn test_storage_errors_are_swallowed() {
        let store = CredentialStore::new(Arc::new(BrokenStorage));
        store.set("access", Some("renew"));
        assert_eq!(store.get(), None);
        store.clear();
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_pair() {
        let store = Arc::new(CredentialStore::in_memory());
        store.set("access-0", Some("renew-0"));

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 1..500 {
                    store.set(&format!("access-{}", i), Some(format!("renew-{}", i).as_str()));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let pair = store.get().unwrap();
                        let access = pair.access_token.trim_start_matches("access-");
                        let renewal = pair.renewal_token.unwrap();
                        assert_eq!(access, renewal.trim_start_matches("renew-"));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
