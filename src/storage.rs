//! Key-value storage for datasets.
//!
//! A dataset root and each of its variables are prefixes in a key-value
//! store. The [`KeyValueStore`] trait is the abstraction the chunked-array
//! engine and the consolidated-metadata I/O are written against:
//! `read`/`write`/`delete`/`delete_prefix`/`list_prefix` over `/`-separated
//! keys.
//!
//! A [`KvStoreSpec`] names a concrete store: the `file` driver (any path
//! without a scheme), the `memory` driver (`memory://name`, process-shared,
//! used by tests), and the `gcs`/`s3` drivers (`gs://bucket/path`,
//! `s3://bucket/path`). Cloud specs resolve and serialise like any other,
//! but opening them fails with a driver-registration hint because this
//! crate links no cloud SDKs.

pub mod file;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

pub use file::FileStore;
pub use memory::MemoryStore;

/// The generation token and wall-clock time returned by an acknowledged
/// metadata or chunk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedGeneration {
    /// An opaque token that differs between successive writes of a key.
    pub generation: String,
    /// The acknowledgement time.
    pub time: DateTime<Utc>,
}

impl TimestampedGeneration {
    pub(crate) fn now(generation: String) -> Self {
        Self {
            generation,
            time: Utc::now(),
        }
    }
}

/// Asynchronous key-value storage.
///
/// Keys are `/`-separated relative paths. Implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait KeyValueStore: std::fmt::Debug + Send + Sync {
    /// Retrieve the value at `key`, or [`None`] if the key does not exist.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying store error.
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    /// Store `value` at `key`, replacing any existing value.
    ///
    /// # Errors
    /// Returns a [`StorageError`] on failure to store.
    async fn write(&self, key: &str, value: Bytes) -> Result<TimestampedGeneration, StorageError>;

    /// Erase `key`. Returns true if the key existed.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying store error.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Erase every key under `prefix` (every key when `prefix` is empty).
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying store error.
    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError>;

    /// List the keys under `prefix` in lexicographic order.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying store error.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// A store driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KvDriver {
    /// Local filesystem.
    File,
    /// Process-shared in-memory store.
    Memory,
    /// Google Cloud Storage (spec-only; no driver is linked).
    Gcs,
    /// Amazon S3 (spec-only; no driver is linked).
    S3,
}

/// A key-value store specification: driver, optional bucket, and path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvStoreSpec {
    /// The store driver.
    pub driver: KvDriver,
    /// The bucket, for cloud drivers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// The path below the driver root (or bucket).
    pub path: String,
}

impl KvStoreSpec {
    /// Resolve a user-facing dataset path into a store spec.
    ///
    /// `gs://bucket/path` routes to the `gcs` driver, `s3://bucket/path` to
    /// the `s3` driver, `memory://name` to the in-memory driver, and
    /// anything else to the `file` driver.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if a cloud path lacks a bucket or path
    /// component.
    pub fn from_path(path: &str) -> Result<Self, StorageError> {
        for (scheme, driver) in [("gs://", KvDriver::Gcs), ("s3://", KvDriver::S3)] {
            if let Some(rest) = path.strip_prefix(scheme) {
                let rest = rest.trim_end_matches('/');
                let (bucket, object_path) = rest.split_once('/').ok_or_else(|| {
                    StorageError::Other(format!(
                        "cloud path requires {scheme}[bucket]/[path], got {path}"
                    ))
                })?;
                if bucket.is_empty() || object_path.is_empty() {
                    return Err(StorageError::Other(format!(
                        "cloud path requires {scheme}[bucket]/[path], got {path}"
                    )));
                }
                return Ok(Self {
                    driver,
                    bucket: Some(bucket.to_string()),
                    path: object_path.to_string(),
                });
            }
        }
        if let Some(name) = path.strip_prefix("memory://") {
            return Ok(Self {
                driver: KvDriver::Memory,
                bucket: None,
                path: name.trim_end_matches('/').to_string(),
            });
        }
        Ok(Self {
            driver: KvDriver::File,
            bucket: None,
            path: path.trim_end_matches('/').to_string(),
        })
    }

    /// The spec for a child prefix (e.g. a variable directory).
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut child = self.clone();
        if child.path.is_empty() {
            child.path = name.to_string();
        } else {
            child.path = format!("{}/{name}", child.path.trim_end_matches('/'));
        }
        child
    }

    /// The spec for the parent prefix (e.g. the dataset root above a
    /// variable directory).
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut parent = self.clone();
        let trimmed = parent.path.trim_end_matches('/');
        parent.path = match trimmed.rfind('/') {
            Some(position) => trimmed[..position].to_string(),
            None => String::new(),
        };
        parent
    }

    /// The final path component.
    #[must_use]
    pub fn stem(&self) -> &str {
        self.path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("")
    }

    /// Open the store.
    ///
    /// # Errors
    /// Returns a [`StorageError`] for unavailable drivers; `gcs` and `s3`
    /// report a driver-registration message that the crate error layer
    /// upgrades to a driver-missing hint.
    pub async fn open(&self) -> Result<Arc<dyn KeyValueStore>, StorageError> {
        match self.driver {
            KvDriver::File => Ok(Arc::new(FileStore::new(&self.path))),
            KvDriver::Memory => Ok(memory::open_shared(&self.path)),
            KvDriver::Gcs => Err(StorageError::Unsupported(
                "store driver \"gcs\" is not registered".to_string(),
            )),
            KvDriver::S3 => Err(StorageError::Unsupported(
                "store driver \"s3\" is not registered".to_string(),
            )),
        }
    }
}

/// A view of a store under a key prefix.
#[derive(Debug, Clone)]
pub struct ScopedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl ScopedStore {
    /// Scope `inner` to `prefix`.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: &str) -> Self {
        Self {
            inner,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else if key.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }
}

#[async_trait]
impl KeyValueStore for ScopedStore {
    async fn read(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        self.inner.read(&self.full_key(key)).await
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<TimestampedGeneration, StorageError> {
        self.inner.write(&self.full_key(key), value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.delete(&self.full_key(key)).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), StorageError> {
        self.inner.delete_prefix(&self.full_key(prefix)).await
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let full = self.full_key(prefix);
        let keys = self.inner.list_prefix(&full).await?;
        let strip = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        };
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&strip)
                    .map(std::string::ToString::to_string)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_scheme_routing() {
        let spec = KvStoreSpec::from_path("gs://bucket/some/dataset").unwrap();
        assert_eq!(spec.driver, KvDriver::Gcs);
        assert_eq!(spec.bucket.as_deref(), Some("bucket"));
        assert_eq!(spec.path, "some/dataset");

        let spec = KvStoreSpec::from_path("s3://bucket/ds").unwrap();
        assert_eq!(spec.driver, KvDriver::S3);

        let spec = KvStoreSpec::from_path("/tmp/dataset/").unwrap();
        assert_eq!(spec.driver, KvDriver::File);
        assert_eq!(spec.path, "/tmp/dataset");

        let spec = KvStoreSpec::from_path("memory://toy").unwrap();
        assert_eq!(spec.driver, KvDriver::Memory);
        assert_eq!(spec.path, "toy");
    }

    #[test]
    fn cloud_path_requires_bucket_and_path() {
        assert!(KvStoreSpec::from_path("gs://bucket").is_err());
        assert!(KvStoreSpec::from_path("s3://bucket/").is_err());
    }

    #[test]
    fn child_parent_and_stem() {
        let spec = KvStoreSpec::from_path("gs://bucket/base").unwrap();
        let child = spec.child("velocity");
        assert_eq!(child.path, "base/velocity");
        assert_eq!(child.stem(), "velocity");
        assert_eq!(child.bucket.as_deref(), Some("bucket"));
        assert_eq!(child.parent(), spec);
    }

    #[tokio::test]
    async fn cloud_open_reports_missing_driver() {
        let spec = KvStoreSpec::from_path("gs://bucket/ds").unwrap();
        let err = spec.open().await.unwrap_err();
        assert!(err.to_string().contains("is not registered"));
    }

    #[tokio::test]
    async fn scoped_store_round_trip() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let scoped = ScopedStore::new(store.clone(), "image");
        scoped
            .write(".zarray", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(
            store.read("image/.zarray").await.unwrap(),
            Some(Bytes::from_static(b"{}"))
        );
        assert_eq!(scoped.list_prefix("").await.unwrap(), vec![".zarray"]);
        scoped.delete_prefix("").await.unwrap();
        assert!(store.read("image/.zarray").await.unwrap().is_none());
    }
}
