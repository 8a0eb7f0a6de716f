//! Storage backends for the credential store.
//!
//! - `KeyringStore`: cookie-like records in the OS keychain (primary)
//! - `FileStore`: JSON key-value file in the data directory, optionally
//!   sealed with a passphrase (fallback)
//! - `MemoryStore`: process-local map

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::StorageError;
use crate::config::{Config, APP_NAME};

/// Capability interface every credential backend provides.
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, readable until `ttl` elapses.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// A value with its expiry, as kept by the file and memory backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredValue {
    pub fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

// ============================================================================
// Keychain (primary)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// Cookie-style record kept in a keychain entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieRecord {
    pub value: String,
    pub expires_at: DateTime<Utc>,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub same_site: SameSite,
}

impl CookieRecord {
    /// Whether a store scoped to `domain` may hand this record out at `now`.
    pub fn readable_by(&self, domain: &str, secure_context: bool, now: DateTime<Utc>) -> bool {
        if now >= self.expires_at {
            return false;
        }
        if !self.domain.eq_ignore_ascii_case(domain) {
            return false;
        }
        // secure records never leave a TLS context
        !self.secure || secure_context
    }
}

pub struct KeyringStore {
    service: String,
    domain: String,
    secure: bool,
}

impl KeyringStore {
    pub fn new(domain: &str, secure: bool) -> Self {
        Self {
            service: format!("{}@{}", APP_NAME, domain),
            domain: domain.to_string(),
            secure,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.cookie_domain(), config.is_secure())
    }

    fn entry(&self, key: &str) -> Result<Entry, StorageError> {
        Entry::new(&self.service, key).map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, err: keyring::Error) -> StorageError {
        StorageError::Unavailable {
            backend: self.name(),
            reason: err.to_string(),
        }
    }
}

impl StorageBackend for KeyringStore {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entry = self.entry(key)?;
        let raw = match entry.get_password() {
            Ok(raw) => raw,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => return Err(self.unavailable(e)),
        };

        let record: CookieRecord = serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
            backend: self.name(),
            reason: e.to_string(),
        })?;

        if record.readable_by(&self.domain, self.secure, Utc::now()) {
            Ok(Some(record.value))
        } else {
            debug!(key = key, "Dropping expired or out-of-scope keychain record");
            let _ = entry.delete_credential();
            Ok(None)
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let record = CookieRecord {
            value: value.to_string(),
            expires_at: Utc::now() + ttl,
            domain: self.domain.clone(),
            path: "/".to_string(),
            secure: self.secure,
            same_site: SameSite::Strict,
        };
        let raw = serde_json::to_string(&record).map_err(|e| StorageError::Corrupt {
            backend: self.name(),
            reason: e.to_string(),
        })?;
        self.entry(key)?
            .set_password(&raw)
            .map_err(|e| self.unavailable(e))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(self.unavailable(e)),
        }
    }
}

// ============================================================================
// Local file (fallback)
// ============================================================================

/// File name of the fallback store inside the data directory
const LOCAL_STORE_FILE: &str = "local_storage.json";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize)]
struct SealedFile {
    salt: Vec<u8>,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

/// Passphrase-based ChaCha20-Poly1305 sealing. The Argon2-derived key is
/// cached per salt; the salt stays fixed for the life of the file.
struct Sealer {
    passphrase: String,
    key: Mutex<Option<(Vec<u8>, [u8; 32])>>,
}

impl Sealer {
    fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.to_string(),
            key: Mutex::new(None),
        }
    }

    fn key_for(&self, salt: &[u8]) -> Result<[u8; 32], StorageError> {
        let mut cached = self.key.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_salt, key)) = cached.as_ref() {
            if cached_salt.as_slice() == salt {
                return Ok(*key);
            }
        }
        let mut key = [0u8; 32];
        Argon2::default()
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StorageError::Unavailable {
                backend: "file",
                reason: format!("key derivation failed: {}", e),
            })?;
        *cached = Some((salt.to_vec(), key));
        Ok(key)
    }

    fn current_salt(&self) -> Vec<u8> {
        let cached = self.key.lock().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some((salt, _)) => salt.clone(),
            None => {
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                salt
            }
        }
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let salt = self.current_salt();
        let key = self.key_for(&salt)?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| StorageError::Corrupt {
                backend: "file",
                reason: "encryption failed".to_string(),
            })?;

        serde_json::to_vec(&SealedFile {
            salt,
            nonce: nonce.to_vec(),
            ciphertext,
        })
        .map_err(|e| StorageError::Corrupt {
            backend: "file",
            reason: e.to_string(),
        })
    }

    fn open(&self, contents: &[u8]) -> Result<Vec<u8>, StorageError> {
        let corrupt = |reason: String| StorageError::Corrupt {
            backend: "file",
            reason,
        };
        let sealed: SealedFile =
            serde_json::from_slice(contents).map_err(|e| corrupt(e.to_string()))?;
        if sealed.nonce.len() != NONCE_LEN {
            return Err(corrupt("bad nonce length".to_string()));
        }
        let key = self.key_for(&sealed.salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
            .map_err(|_| StorageError::Unavailable {
                backend: "file",
                reason: "wrong passphrase or tampered file".to_string(),
            })
    }
}

pub struct FileStore {
    path: PathBuf,
    sealer: Option<Sealer>,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(LOCAL_STORE_FILE),
            sealer: None,
            lock: Mutex::new(()),
        }
    }

    /// Encrypt the file at rest with a key derived from `passphrase`.
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.sealer = Some(Sealer::new(passphrase));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, StoredValue>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read(&self.path)?;
        let plaintext = match &self.sealer {
            Some(sealer) => sealer.open(&contents)?,
            None => contents,
        };
        serde_json::from_slice(&plaintext).map_err(|e| StorageError::Corrupt {
            backend: self.name(),
            reason: e.to_string(),
        })
    }

    /// Write through a temp file so a crash never leaves a torn map behind.
    fn write_map(&self, map: &BTreeMap<String, StoredValue>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let plaintext = serde_json::to_vec_pretty(map).map_err(|e| StorageError::Corrupt {
            backend: self.name(),
            reason: e.to_string(),
        })?;
        let contents = match &self.sealer {
            Some(sealer) => sealer.seal(&plaintext)?,
            None => plaintext,
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Map for a read-modify-write. A file that does not parse is replaced
    /// rather than wedging the fallback forever; one that cannot be
    /// decrypted is left alone.
    fn map_for_update(&self) -> Result<BTreeMap<String, StoredValue>, StorageError> {
        match self.read_map() {
            Ok(mut map) => {
                map.retain(|_, stored| !stored.is_expired());
                Ok(map)
            }
            Err(StorageError::Corrupt { reason, .. }) => {
                debug!(path = %self.path.display(), reason = %reason, "Replacing unreadable local store");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }
}

impl StorageBackend for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let map = self.read_map()?;
        Ok(map
            .get(key)
            .filter(|stored| !stored.is_expired())
            .map(|stored| stored.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut map = self.map_for_update()?;
        map.insert(key.to_string(), StoredValue::new(value, ttl));
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.path.exists() {
            return Ok(());
        }
        let mut map = self.map_for_update()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values
            .get(key)
            .filter(|stored| !stored.is_expired())
            .map(|stored| stored.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), StoredValue::new(value, ttl));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}
