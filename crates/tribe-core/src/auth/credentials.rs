use anyhow::Result;
use chrono::Duration;
use tracing::{debug, warn};

use super::backends::{FileStore, KeyringStore, MemoryStore, StorageBackend};
use super::error::StorageError;
use crate::config::Config;
use crate::models::SessionUser;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const USER_KEY: &str = "user";

/// Keys written by older releases, removed on logout
const LEGACY_KEYS: &[&str] = &["authToken"];

/// Token and user persistence over an ordered chain of backends.
///
/// Reads take the first present value. Writes go to the first backend that
/// accepts them and the key is then removed from every other backend, so a
/// stale copy can never shadow the new value.
pub struct CredentialStore {
    backends: Vec<Box<dyn StorageBackend>>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl CredentialStore {
    pub fn new(backends: Vec<Box<dyn StorageBackend>>) -> Self {
        let defaults = Config::default();
        Self {
            backends,
            access_ttl: defaults.access_token_ttl(),
            refresh_ttl: defaults.refresh_token_ttl(),
        }
    }

    /// Keychain first, then the local file in the data directory.
    pub fn from_config(config: &Config, passphrase: Option<&str>) -> Result<Self> {
        let mut file = FileStore::new(&config.data_dir()?);
        if let Some(passphrase) = passphrase {
            file = file.with_passphrase(passphrase);
        }
        let backends: Vec<Box<dyn StorageBackend>> =
            vec![Box::new(KeyringStore::from_config(config)), Box::new(file)];
        Ok(Self::new(backends).with_lifetimes(config.access_token_ttl(), config.refresh_token_ttl()))
    }

    pub fn in_memory() -> Self {
        Self::new(vec![Box::new(MemoryStore::new())])
    }

    pub fn with_lifetimes(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    fn read(&self, key: &str) -> Option<String> {
        for backend in &self.backends {
            match backend.get(key) {
                Ok(Some(value)) => return Some(value),
                Ok(None) => {}
                Err(e) => {
                    debug!(backend = backend.name(), key = key, error = %e, "Read failed, trying next backend");
                }
            }
        }
        None
    }

    /// Write and read back; a backend that cannot return what it was
    /// given counts as failed.
    fn write_verified(backend: &dyn StorageBackend, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        backend.set(key, value, ttl)?;
        match backend.get(key)? {
            Some(stored) if stored == value => Ok(()),
            _ => {
                let _ = backend.remove(key);
                Err(StorageError::Unavailable {
                    backend: backend.name(),
                    reason: "value did not read back".to_string(),
                })
            }
        }
    }

    fn write(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        for (index, backend) in self.backends.iter().enumerate() {
            match Self::write_verified(backend.as_ref(), key, value, ttl) {
                Ok(()) => {
                    if index > 0 {
                        debug!(backend = backend.name(), key = key, "Stored in fallback backend");
                    }
                    self.discard_except(key, index);
                    return Ok(());
                }
                Err(e) => {
                    warn!(backend = backend.name(), key = key, error = %e, "Write failed, falling back");
                }
            }
        }
        Err(StorageError::Exhausted { key: key.to_string() })
    }

    fn discard_except(&self, key: &str, keep: usize) {
        for (index, backend) in self.backends.iter().enumerate() {
            if index == keep {
                continue;
            }
            if let Err(e) = backend.remove(key) {
                debug!(backend = backend.name(), key = key, error = %e, "Could not remove stale copy");
            }
        }
    }

    /// Store a freshly issued (or rotated) token pair.
    pub fn set_tokens(&self, access_token: &str, refresh_token: &str) -> Result<(), StorageError> {
        self.write(ACCESS_TOKEN_KEY, access_token, self.access_ttl)?;
        self.write(REFRESH_TOKEN_KEY, refresh_token, self.refresh_ttl)
    }

    /// Replace only the access token; any stored refresh token is dropped
    /// so it cannot outlive the pair it belonged to.
    pub fn set_access_token(&self, access_token: &str) -> Result<(), StorageError> {
        self.write(ACCESS_TOKEN_KEY, access_token, self.access_ttl)?;
        self.discard_except(REFRESH_TOKEN_KEY, usize::MAX);
        Ok(())
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    pub fn set_user(&self, user: &SessionUser) -> Result<(), StorageError> {
        let json = serde_json::to_string(user).map_err(|e| StorageError::Corrupt {
            backend: "user",
            reason: e.to_string(),
        })?;
        self.write(USER_KEY, &json, self.refresh_ttl)
    }

    /// Stored user; unparsable data reads as no user.
    pub fn user(&self) -> Option<SessionUser> {
        let raw = self.read(USER_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Ignoring corrupt stored user record");
                None
            }
        }
    }

    /// A session was established and a refresh may succeed. Says nothing
    /// about whether the access token is still valid.
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some() || self.refresh_token().is_some()
    }

    /// Remove every credential from every backend. Never fails.
    pub fn clear_all(&self) {
        let keys = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY]
            .into_iter()
            .chain(LEGACY_KEYS.iter().copied());
        for key in keys {
            self.discard_except(key, usize::MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Backend that can be switched into a failing state.
    #[derive(Clone, Default)]
    struct Flaky {
        inner: Arc<MemoryStore>,
        broken: Arc<AtomicBool>,
    }

    impl Flaky {
        fn broken() -> Self {
            let flaky = Self::default();
            flaky.broken.store(true, Ordering::SeqCst);
            flaky
        }

        fn check(&self) -> Result<(), StorageError> {
            if self.broken.load(Ordering::SeqCst) {
                Err(StorageError::Unavailable {
                    backend: "flaky",
                    reason: "disabled".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl StorageBackend for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.check()?;
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
            self.check()?;
            self.inner.set(key, value, ttl)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.check()?;
            self.inner.remove(key)
        }
    }

    /// Accepts writes and forgets them.
    struct Forgetful;

    impl StorageBackend for Forgetful {
        fn name(&self) -> &'static str {
            "forgetful"
        }

        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), StorageError> {
            Ok(())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn sample_user() -> SessionUser {
        SessionUser {
            id: "1".to_string(),
            name: "A B".to_string(),
            email: "a@b.com".to_string(),
            role: "1".to_string(),
        }
    }

    #[test]
    fn test_user_round_trip() {
        let store = CredentialStore::in_memory();
        let user = sample_user();
        store.set_user(&user).unwrap();
        assert_eq!(store.user(), Some(user));
    }

    #[test]
    fn test_user_round_trip_with_failing_primary() {
        let fallback = Flaky::default();
        let store = CredentialStore::new(vec![Box::new(Flaky::broken()), Box::new(fallback.clone())]);

        let user = sample_user();
        store.set_user(&user).unwrap();
        assert_eq!(store.user(), Some(user));
        assert!(fallback.inner.get(USER_KEY).unwrap().is_some());
    }

    #[test]
    fn test_forgetful_primary_falls_back() {
        let store = CredentialStore::new(vec![Box::new(Forgetful), Box::new(MemoryStore::new())]);
        store.set_tokens("AT1", "RT1").unwrap();
        assert_eq!(store.access_token().as_deref(), Some("AT1"));
        assert_eq!(store.refresh_token().as_deref(), Some("RT1"));
    }

    #[test]
    fn test_fallback_write_removes_primary_copy() {
        let primary = Flaky::default();
        let store = CredentialStore::new(vec![Box::new(primary.clone()), Box::new(MemoryStore::new())]);
        store.set_tokens("AT1", "RT1").unwrap();

        // writes fail on the primary but the stale entry can still be removed
        struct WriteOnlyBroken(Flaky);
        impl StorageBackend for WriteOnlyBroken {
            fn name(&self) -> &'static str {
                "write-broken"
            }
            fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
                self.0.inner.get(key)
            }
            fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), StorageError> {
                Err(StorageError::Unavailable {
                    backend: "write-broken",
                    reason: "quota".to_string(),
                })
            }
            fn remove(&self, key: &str) -> Result<(), StorageError> {
                self.0.inner.remove(key)
            }
        }

        let degraded = CredentialStore::new(vec![
            Box::new(WriteOnlyBroken(primary.clone())),
            Box::new(MemoryStore::new()),
        ]);
        degraded.set_tokens("AT2", "RT2").unwrap();
        assert_eq!(degraded.refresh_token().as_deref(), Some("RT2"));
        assert_eq!(primary.inner.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_all_backends_failing() {
        let store = CredentialStore::new(vec![Box::new(Flaky::broken()), Box::new(Flaky::broken())]);
        assert!(matches!(
            store.set_tokens("AT1", "RT1"),
            Err(StorageError::Exhausted { .. })
        ));
        assert!(!store.is_authenticated());
        store.clear_all();
    }

    #[test]
    fn test_corrupt_user_reads_as_absent() {
        let memory = Flaky::default();
        let store = CredentialStore::new(vec![Box::new(memory.clone())]);
        memory.inner.set(USER_KEY, "{\"id\": 1,", Duration::days(7)).unwrap();
        assert_eq!(store.user(), None);
    }

    #[test]
    fn test_is_authenticated_with_either_token() {
        let store = CredentialStore::in_memory();
        assert!(!store.is_authenticated());

        store.set_tokens("AT1", "RT1").unwrap();
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_already_expired_write_is_rejected() {
        let store = CredentialStore::in_memory().with_lifetimes(Duration::seconds(-1), Duration::days(7));
        assert!(matches!(
            store.set_tokens("AT1", "RT1"),
            Err(StorageError::Exhausted { .. })
        ));
    }

    #[test]
    fn test_refresh_token_alone_is_authenticated() {
        let memory = Flaky::default();
        let store = CredentialStore::new(vec![Box::new(memory.clone())]);
        memory.inner.set(REFRESH_TOKEN_KEY, "RT1", Duration::days(7)).unwrap();
        assert!(store.access_token().is_none());
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_clear_all_is_idempotent_and_tolerates_failures() {
        let healthy = Flaky::default();
        let store = CredentialStore::new(vec![Box::new(Flaky::broken()), Box::new(healthy.clone())]);
        store.set_tokens("AT1", "RT1").unwrap();
        store.set_user(&sample_user()).unwrap();
        healthy.inner.set("authToken", "legacy", Duration::days(7)).unwrap();

        store.clear_all();
        store.clear_all();

        assert!(!store.is_authenticated());
        assert_eq!(store.user(), None);
        assert_eq!(healthy.inner.get("authToken").unwrap(), None);
    }

    #[test]
    fn test_set_access_token_drops_refresh_token() {
        let store = CredentialStore::in_memory();
        store.set_tokens("AT1", "RT1").unwrap();
        store.set_access_token("AT2").unwrap();
        assert_eq!(store.access_token().as_deref(), Some("AT2"));
        assert_eq!(store.refresh_token(), None);
    }
}
