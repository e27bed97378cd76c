//! Consolidated-metadata I/O: `.zgroup`, `.zattrs`, and `.zmetadata` at a
//! dataset root.
//!
//! The consolidated `.zmetadata` document lets a reader discover the whole
//! dataset without listing directories:
//!
//! ```json
//! {
//!     "zarr_consolidated_format": 1,
//!     "metadata": {
//!         ".zgroup": {"zarr_format": 2},
//!         ".zattrs": { "name": "...", "apiVersion": "1.0.0", ... },
//!         "image/.zarray": { ... },
//!         "image/.zattrs": { "_ARRAY_DIMENSIONS": [...], ... }
//!     }
//! }
//! ```
//!
//! The dataset root `.zattrs` carries `apiVersion`; a document carrying
//! the snake-case `api_version` key is a legacy v0 dataset and is
//! rejected.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result, StorageError};
use crate::storage::KeyValueStore;

/// The root `.zgroup` key.
pub const ZGROUP_KEY: &str = ".zgroup";
/// The root `.zattrs` key.
pub const ZATTRS_KEY: &str = ".zattrs";
/// The consolidated-metadata key.
pub const ZMETADATA_KEY: &str = ".zmetadata";

/// One variable's entries in the consolidated document.
#[derive(Debug, Clone)]
pub struct ConsolidatedEntry {
    /// The variable name.
    pub name: String,
    /// Its `.zarray` document.
    pub zarray: Value,
    /// Its `.zattrs` document.
    pub zattrs: Value,
}

/// Assemble the `.zmetadata` document.
#[must_use]
pub fn build_zmetadata(dataset_metadata: &Value, entries: &[ConsolidatedEntry]) -> Value {
    let mut metadata = Map::new();
    metadata.insert(
        ZGROUP_KEY.to_string(),
        serde_json::json!({"zarr_format": 2}),
    );
    metadata.insert(ZATTRS_KEY.to_string(), dataset_metadata.clone());
    for entry in entries {
        metadata.insert(format!("{}/.zarray", entry.name), entry.zarray.clone());
        metadata.insert(format!("{}/.zattrs", entry.name), entry.zattrs.clone());
    }
    serde_json::json!({
        "zarr_consolidated_format": 1,
        "metadata": metadata,
    })
}

/// Write the root documents: `.zgroup`, `.zattrs`, and `.zmetadata`.
///
/// # Errors
/// Returns the first storage failure.
pub async fn write_consolidated(
    root: &Arc<dyn KeyValueStore>,
    dataset_metadata: &Value,
    entries: &[ConsolidatedEntry],
) -> Result<()> {
    let zgroup = serde_json::json!({"zarr_format": 2});
    let zmetadata = build_zmetadata(dataset_metadata, entries);
    let encode = |value: &Value| -> Result<Bytes> {
        Ok(Bytes::from(
            serde_json::to_vec_pretty(value).map_err(StorageError::InvalidJSON)?,
        ))
    };
    futures::future::try_join3(
        root.write(ZGROUP_KEY, encode(&zgroup)?),
        root.write(ZATTRS_KEY, encode(dataset_metadata)?),
        root.write(ZMETADATA_KEY, encode(&zmetadata)?),
    )
    .await?;
    debug!(variables = entries.len(), "wrote consolidated metadata");
    Ok(())
}

/// Read `.zmetadata` and return the dataset metadata plus the variable
/// names (derived from the `<name>/.zarray` entries, sorted).
///
/// # Errors
/// - [`Error::LegacyVersion`] when the root attributes carry the v0
///   `api_version` key.
/// - [`Error::InvalidSchema`] for malformed documents or when no variable
///   entries are present.
pub async fn read_consolidated(root: &Arc<dyn KeyValueStore>) -> Result<(Value, Vec<String>)> {
    let bytes = root.read(ZMETADATA_KEY).await?.ok_or_else(|| {
        StorageError::KeyNotFound(format!("{ZMETADATA_KEY} (is this a dataset root?)"))
    })?;
    let document: Value = serde_json::from_slice(&bytes).map_err(StorageError::InvalidJSON)?;

    let metadata = document
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            Error::InvalidSchema(".zmetadata does not contain metadata".to_string())
        })?;
    let dataset_metadata = metadata.get(ZATTRS_KEY).cloned().ok_or_else(|| {
        Error::InvalidSchema(".zmetadata does not contain dataset metadata".to_string())
    })?;

    if dataset_metadata.get("api_version").is_some() {
        return Err(Error::LegacyVersion);
    }

    let mut names: Vec<String> = metadata
        .keys()
        .filter_map(|key| key.strip_suffix("/.zarray"))
        .map(String::from)
        .collect();
    names.sort();
    names.dedup();
    if names.is_empty() {
        return Err(Error::InvalidSchema(
            "no variables found in .zmetadata".to_string(),
        ));
    }
    Ok((dataset_metadata, names))
}
