//! Client-local persistence for the most recent entries.
//!
//! The registry keeps a single key in a [`KeyValueStore`] holding a JSON
//! array of the last entries it saw. The mirror is bounded separately from
//! the in-memory buffer.

use crate::entry::LogEntry;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Key under which the mirror is stored.
pub const STORAGE_KEY: &str = "error-registry";

/// Default number of entries kept in the mirror.
pub const DEFAULT_PERSISTED_ENTRIES: usize = 100;

/// Errors raised by a [`KeyValueStore`] or by the mirror itself.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize persisted entries: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage quota exceeded: {needed} bytes needed, {limit} allowed")]
    QuotaExceeded { needed: usize, limit: usize },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// String key/value storage local to the running client.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process store, optionally enforcing a per-value byte quota.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose value is longer than `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        MemoryStore {
            values: Mutex::new(HashMap::new()),
            quota: Some(bytes),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        if let Some(limit) = self.quota {
            if value.len() > limit {
                return Err(StorageError::QuotaExceeded {
                    needed: value.len(),
                    limit,
                });
            }
        }
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Bounded JSON list of recent entries kept under [`STORAGE_KEY`].
#[derive(Clone)]
pub struct PersistentMirror {
    store: Arc<dyn KeyValueStore>,
    capacity: usize,
}

impl PersistentMirror {
    pub fn new(store: Arc<dyn KeyValueStore>, capacity: usize) -> Self {
        PersistentMirror {
            store,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append one entry, dropping the oldest ones beyond capacity.
    ///
    /// A stored value that is not a JSON array is discarded and the list
    /// starts over.
    pub async fn append(&self, entry: &LogEntry) -> Result<(), StorageError> {
        let mut stored: Vec<serde_json::Value> = match self.store.get(STORAGE_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        };
        stored.push(serde_json::to_value(entry)?);
        if stored.len() > self.capacity {
            let excess = stored.len() - self.capacity;
            stored.drain(..excess);
        }
        self.store
            .set(STORAGE_KEY, serde_json::to_string(&stored)?)
            .await
    }

    /// Entries currently persisted, oldest first.
    pub async fn load(&self) -> Result<Vec<LogEntry>, StorageError> {
        match self.store.get(STORAGE_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(STORAGE_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Level, LogRequest};
    use chrono::Utc;

    fn entry(message: &str) -> LogEntry {
        LogEntry::build(
            LogRequest::new(Level::Info, message),
            Utc::now(),
            "session_test",
            None,
            None,
        )
    }

    #[tokio::test]
    async fn test_mirror_keeps_last_entries() {
        let mirror = PersistentMirror::new(Arc::new(MemoryStore::new()), 3);
        for m in ["a", "b", "c", "d", "e"] {
            mirror.append(&entry(m)).await.unwrap();
        }
        let messages: Vec<String> = mirror
            .load()
            .await
            .unwrap()
            .iter()
            .map(|e| e.message().to_string())
            .collect();
        assert_eq!(messages, vec!["c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_mirror_recovers_from_garbage() {
        let store = Arc::new(MemoryStore::new());
        store.set(STORAGE_KEY, "not json".to_string()).await.unwrap();
        let mirror = PersistentMirror::new(store, 10);
        mirror.append(&entry("fresh")).await.unwrap();
        assert_eq!(mirror.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let mirror = PersistentMirror::new(Arc::new(MemoryStore::with_quota(8)), 10);
        let err = mirror.append(&entry("too big")).await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { limit: 8, .. }));
    }

    #[tokio::test]
    async fn test_file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::new(dir.path().join("nested")));
        let mirror = PersistentMirror::new(store.clone(), DEFAULT_PERSISTED_ENTRIES);

        mirror.append(&entry("persisted")).await.unwrap();
        assert!(dir.path().join("nested").join("error-registry.json").exists());
        assert_eq!(mirror.load().await.unwrap()[0].message(), "persisted");

        mirror.clear().await.unwrap();
        assert!(store.get(STORAGE_KEY).await.unwrap().is_none());
        // clearing twice is fine
        mirror.clear().await.unwrap();
    }
}
