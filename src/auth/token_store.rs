/// Token Store
///
/// Durable persistence of the current credential pair. The pair is written
/// as a single JSON blob so a reader never observes a half-written update.
/// Reads fail soft: anything unreadable is treated as "no credentials".

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::auth::claims::parse_jwt_exp_ms;
use crate::error::StorageError;

/// Key holding the serialized credential blob
pub const CREDENTIALS_KEY: &str = "be_user";
/// Individual keys written by older clients; removed on `clear`.
pub const LEGACY_KEYS: [&str; 3] = ["token", "refresh_token", "token_expires_at"];

/// Synchronous key-value storage scoped to one user profile
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local storage, lost on exit
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Storage backed by a JSON object on disk, one file per profile
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> HashMap<String, String> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return HashMap::new(),
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "Ignoring corrupt storage file");
            HashMap::new()
        })
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        // Write then rename so a crash never leaves a truncated profile.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load();
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load();
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// Access/refresh token pair with the resolved access token expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds; `None` when unknown.
    #[serde(rename = "accessTokenExp", default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at_ms: Option<i64>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            access_token_expires_at_ms: None,
        }
    }

    pub fn with_expiry(mut self, expires_at_ms: Option<i64>) -> Self {
        self.access_token_expires_at_ms = expires_at_ms;
        self
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Shared handle to the persisted credentials
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Current credentials, or `None` if absent or unreadable.
    pub fn get(&self) -> Option<CredentialPair> {
        let raw = self.storage.get(CREDENTIALS_KEY)?;
        match serde_json::from_str::<CredentialPair>(&raw) {
            Ok(pair) if !pair.access_token.is_empty() => Some(pair),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Stored credentials are malformed, treating as absent");
                None
            }
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().map(|pair| pair.access_token)
    }

    pub fn expires_at_ms(&self) -> Option<i64> {
        self.get().and_then(|pair| pair.access_token_expires_at_ms)
    }

    /// Persist `pair`, resolving the expiry from the token's `exp` claim
    /// when the caller did not supply one. Returns what was stored.
    pub fn set(&self, pair: CredentialPair) -> Result<CredentialPair, StorageError> {
        if pair.access_token.is_empty() {
            return Err(StorageError::Serialization("access token is empty".to_string()));
        }

        let expires_at = pair
            .access_token_expires_at_ms
            .or_else(|| parse_jwt_exp_ms(&pair.access_token));
        let stored = pair.with_expiry(expires_at);

        let raw = serde_json::to_string(&stored)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.storage.set(CREDENTIALS_KEY, &raw)?;

        tracing::debug!(expires_at_ms = ?stored.access_token_expires_at_ms, "Credentials stored");
        Ok(stored)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(CREDENTIALS_KEY)?;
        for key in LEGACY_KEYS {
            self.storage.remove(key)?;
        }
        Ok(())
    }
}
