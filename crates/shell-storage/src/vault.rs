//! Session persistence over the well-known storage keys.

use crate::{SecureStorage, StorageError, StorageKeys, StorageResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Tokens closer than this to expiry are treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Non-secret session metadata, stored as JSON under `session_meta`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub user_id: String,
    /// Provider tag ("password", "kakao", ...).
    pub provider: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionMeta {
    /// Whether the token is within a minute of expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now < Duration::seconds(EXPIRY_SKEW_SECS)
    }
}

/// A session as it sits in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub meta: SessionMeta,
}

/// Reads and writes the persisted session.
#[derive(Clone)]
pub struct SessionVault {
    storage: Arc<dyn SecureStorage>,
}

impl SessionVault {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    /// Persist `session`, replacing whatever was stored.
    pub fn store_session(&self, session: &StoredSession) -> StorageResult<()> {
        let meta = serde_json::to_string(&session.meta)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        self.storage
            .set(StorageKeys::SESSION_ACCESS_TOKEN, &session.access_token)?;
        match &session.refresh_token {
            Some(token) => self.storage.set(StorageKeys::SESSION_REFRESH_TOKEN, token)?,
            None => {
                self.storage.delete(StorageKeys::SESSION_REFRESH_TOKEN)?;
            }
        }
        self.storage.set(StorageKeys::SESSION_META, &meta)?;

        debug!(user_id = %session.meta.user_id, "Stored session");
        Ok(())
    }

    /// Load the persisted session.
    ///
    /// A half-written session (token without metadata or the reverse) reads
    /// as no session.
    pub fn load_session(&self) -> StorageResult<Option<StoredSession>> {
        let access_token = self.storage.get(StorageKeys::SESSION_ACCESS_TOKEN)?;
        let meta = self.storage.get(StorageKeys::SESSION_META)?;

        let (access_token, meta) = match (access_token, meta) {
            (Some(token), Some(meta)) => (token, meta),
            (None, None) => return Ok(None),
            _ => {
                warn!("Incomplete persisted session, ignoring");
                return Ok(None);
            }
        };

        let meta: SessionMeta =
            serde_json::from_str(&meta).map_err(|e| StorageError::Encoding(e.to_string()))?;
        let refresh_token = self.storage.get(StorageKeys::SESSION_REFRESH_TOKEN)?;

        Ok(Some(StoredSession {
            access_token,
            refresh_token,
            meta,
        }))
    }

    /// Whether both the token and metadata are present.
    pub fn has_session(&self) -> StorageResult<bool> {
        let has_token = self.storage.has(StorageKeys::SESSION_ACCESS_TOKEN)?;
        let has_meta = self.storage.has(StorageKeys::SESSION_META)?;
        Ok(has_token && has_meta)
    }

    /// Whether the stored session is missing or within a minute of expiry.
    pub fn is_expired(&self) -> StorageResult<bool> {
        match self.load_session()? {
            Some(session) => Ok(session.meta.is_expired_at(Utc::now())),
            None => Ok(true),
        }
    }

    /// Delete every session key.
    ///
    /// All deletions are attempted. If any fails the result is
    /// [`StorageError::PartialClear`] naming the keys that remain.
    pub fn clear_session(&self) -> StorageResult<()> {
        let failed: Vec<String> = StorageKeys::SESSION_KEYS
            .iter()
            .filter_map(|key| match self.storage.delete(key) {
                Ok(_) => None,
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete session key");
                    Some(key.to_string())
                }
            })
            .collect();

        if failed.is_empty() {
            debug!("Cleared session");
            Ok(())
        } else {
            Err(StorageError::PartialClear { failed })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    fn session(expires_in: Duration) -> StoredSession {
        let now = Utc::now();
        StoredSession {
            access_token: "access-token".to_string(),
            refresh_token: Some("refresh-token".to_string()),
            meta: SessionMeta {
                user_id: "user-123".to_string(),
                provider: "password".to_string(),
                issued_at: now,
                expires_at: now + expires_in,
            },
        }
    }

    /// Storage whose deletes fail for one key.
    struct StuckKeyStorage {
        inner: MemoryStorage,
        stuck: &'static str,
    }

    impl SecureStorage for StuckKeyStorage {
        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.inner.set(key, value)
        }

        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.inner.get(key)
        }

        fn delete(&self, key: &str) -> StorageResult<bool> {
            if key == self.stuck {
                return Err(StorageError::Backend("locked".to_string()));
            }
            self.inner.delete(key)
        }
    }

    #[test]
    fn test_store_and_load_session() {
        let vault = SessionVault::new(Arc::new(MemoryStorage::new()));
        assert!(vault.load_session().unwrap().is_none());
        assert!(!vault.has_session().unwrap());

        let stored = session(Duration::hours(1));
        vault.store_session(&stored).unwrap();

        assert!(vault.has_session().unwrap());
        assert_eq!(vault.load_session().unwrap(), Some(stored));
        assert!(!vault.is_expired().unwrap());
    }

    #[test]
    fn test_store_without_refresh_token_drops_old_one() {
        let vault = SessionVault::new(Arc::new(MemoryStorage::new()));
        vault.store_session(&session(Duration::hours(1))).unwrap();

        let mut replacement = session(Duration::hours(2));
        replacement.refresh_token = None;
        vault.store_session(&replacement).unwrap();

        let loaded = vault.load_session().unwrap().unwrap();
        assert_eq!(loaded.refresh_token, None);
    }

    #[test]
    fn test_session_expiry_skew() {
        let vault = SessionVault::new(Arc::new(MemoryStorage::new()));
        assert!(vault.is_expired().unwrap());

        vault.store_session(&session(Duration::seconds(30))).unwrap();
        assert!(vault.is_expired().unwrap());

        vault.store_session(&session(Duration::hours(1))).unwrap();
        assert!(!vault.is_expired().unwrap());
    }

    #[test]
    fn test_incomplete_session_reads_as_none() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(StorageKeys::SESSION_ACCESS_TOKEN, "orphan")
            .unwrap();

        let vault = SessionVault::new(storage);
        assert!(vault.load_session().unwrap().is_none());
    }

    #[test]
    fn test_clear_session() {
        let vault = SessionVault::new(Arc::new(MemoryStorage::new()));
        vault.store_session(&session(Duration::hours(1))).unwrap();

        vault.clear_session().unwrap();
        assert!(vault.load_session().unwrap().is_none());

        // Clearing an empty vault is fine.
        vault.clear_session().unwrap();
    }

    #[test]
    fn test_partial_clear_reports_remaining_keys() {
        let storage = Arc::new(StuckKeyStorage {
            inner: MemoryStorage::new(),
            stuck: StorageKeys::SESSION_META,
        });
        let vault = SessionVault::new(storage.clone());
        vault.store_session(&session(Duration::hours(1))).unwrap();

        match vault.clear_session() {
            Err(StorageError::PartialClear { failed }) => {
                assert_eq!(failed, vec![StorageKeys::SESSION_META.to_string()]);
            }
            other => panic!("expected PartialClear, got {other:?}"),
        }

        // The other keys were still removed.
        assert!(!storage.has(StorageKeys::SESSION_ACCESS_TOKEN).unwrap());
        assert!(!storage.has(StorageKeys::SESSION_REFRESH_TOKEN).unwrap());
    }
}
