//! A local-filesystem key-value store.
//!
//! Keys map directly to paths below the store root; chunk keys such as
//! `0/0/1` become nested directories, matching the `/` dimension separator
//! of the on-disk layout. Filesystem operations are performed inline: local
//! I/O is fast enough that handing it to a blocking pool would cost more
//! than it saves, and the async interface is preserved for the callers.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;

use super::{KeyValueStore, TimestampedGeneration};

/// A [`KeyValueStore`] rooted at a local directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    generation: AtomicU64,
}

impl FileStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            generation: AtomicU64::new(0),
        }
    }

    /// The store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|part| !part.is_empty()) {
            path.push(part);
        }
        path
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        match std::fs::read(self.key_path(key)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<TimestampedGeneration, StorageError> {
        let path = self.key_path(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, &value)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(TimestampedGeneration::now(format!(
            "{}@{generation}",
            path.display()
        )))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        let path = self.key_path(prefix);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // A prefix may also name a single key.
                self.delete(prefix).await.map(|_| ())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.key_path(prefix);
        if !base.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&base).sort_by_file_name() {
            let entry = entry.map_err(|err| StorageError::Other(err.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|err| StorageError::Other(err.to_string()))?;
            keys.push(relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"));
        }
        keys.sort();
        Ok(keys)
    }
}
