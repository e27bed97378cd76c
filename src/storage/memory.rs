//! An in-memory key-value store.
//!
//! Backed by a sorted map behind a read-write lock. `memory://name` paths
//! resolve to process-shared instances so a dataset written through one
//! handle can be reopened through another, which is what the tests rely on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::error::StorageError;

use super::{KeyValueStore, TimestampedGeneration};

/// An in-memory [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Bytes>>,
    generation: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<TimestampedGeneration, StorageError> {
        self.entries.write().insert(key.to_string(), value);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(TimestampedGeneration::now(generation.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        if prefix.is_empty() {
            entries.clear();
        } else {
            let dir = format!("{}/", prefix.trim_end_matches('/'));
            entries.retain(|key, _| key != prefix && !key.starts_with(&dir));
        }
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read();
        if prefix.is_empty() {
            return Ok(entries.keys().cloned().collect());
        }
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        Ok(entries
            .keys()
            .filter(|key| key.as_str() == prefix || key.starts_with(&dir))
            .cloned()
            .collect())
    }
}

static SHARED: OnceLock<Mutex<BTreeMap<String, Arc<MemoryStore>>>> = OnceLock::new();

/// The process-shared store for a `memory://name` path, created on first
/// use.
pub(crate) fn open_shared(name: &str) -> Arc<dyn KeyValueStore> {
    let mut registry = SHARED
        .get_or_init(|| Mutex::new(BTreeMap::new()))
        .lock();
    registry
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(MemoryStore::new()))
        .clone()
}
