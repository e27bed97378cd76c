//! Error types for datasets, variables, and the storage layer.
//!
//! [`StorageError`] covers the key-value store and chunk I/O layer.
//! [`Error`] is the crate-level error returned by dataset and variable
//! operations; storage failures surface through it as
//! [`Error::BackendError`].

use thiserror::Error;

use crate::dtype::DataType;

/// A storage (key-value store or chunk I/O) error.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A write operation was attempted on a read only store.
    #[error("a write operation was attempted on a read only store")]
    ReadOnly,
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An error serializing or deserializing JSON.
    #[error(transparent)]
    InvalidJSON(#[from] serde_json::Error),
    /// A key was expected to exist but was not found.
    #[error("key {0} not found")]
    KeyNotFound(String),
    /// A chunk payload failed to encode or decode.
    #[error("codec error: {0}")]
    Codec(String),
    /// The requested method is not supported.
    #[error("{0}")]
    Unsupported(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

/// A dataset or variable error.
#[derive(Debug, Error)]
pub enum Error {
    /// The dataset specification document is malformed.
    #[error("invalid dataset specification: {0}")]
    InvalidSchema(String),
    /// Dimension sizes conflict between variables, or a dimension lacks its
    /// dimension-coordinate variable.
    #[error("inconsistent dimensions: {0}")]
    InconsistentDimensions(String),
    /// A referenced dimension label does not exist.
    #[error("unknown dimension: {0}")]
    UnknownDimension(String),
    /// A referenced coordinate name does not exist.
    #[error("unknown coordinate: {0}")]
    UnknownCoordinate(String),
    /// The data type is not in the permitted set.
    #[error("unsupported dtype: {0}")]
    UnsupportedDtype(String),
    /// The compressor is not blosc or its parameters are out of range.
    #[error("unsupported compressor: {0}")]
    UnsupportedCompressor(String),
    /// A slice descriptor is invalid (start > stop, step != 1, too many
    /// descriptors, overlapping repeated-label descriptors).
    #[error("invalid slice: {0}")]
    InvalidSlice(String),
    /// A `sel` range descriptor is invalid.
    #[error("invalid range: {0}")]
    InvalidRange(String),
    /// The same label appears in more than one `sel` descriptor.
    #[error("repeated sel label: {0}")]
    RepeatedSelLabel(String),
    /// A `sel` list descriptor contains a repeated value.
    #[error("repeated sel value for label {0}")]
    RepeatedSelValue(String),
    /// A `sel` boundary value matches multiple non-contiguous coordinate
    /// positions.
    #[error("coordinate value matches non-contiguous positions: {0}")]
    RepeatedCoordinate(String),
    /// A `sel` value does not exist in the coordinate variable.
    #[error("missing coordinate value: {0}")]
    MissingCoordinate(String),
    /// The write buffer's data type differs from the variable's.
    #[error("dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch {
        /// The variable's data type.
        expected: DataType,
        /// The buffer's data type.
        actual: DataType,
    },
    /// A typed lookup requested an element type the variable does not hold.
    #[error("type mismatch for variable {variable}: stored dtype is {actual}")]
    TypeMismatch {
        /// The variable name.
        variable: String,
        /// The stored data type.
        actual: DataType,
    },
    /// `select_field` was called on a non-structured variable.
    #[error("variable {0} is not a structured dtype")]
    NotStructured(String),
    /// `select_field` named a field the structured dtype does not have.
    #[error("field {field} not found in variable {variable}")]
    UnknownField {
        /// The variable name.
        variable: String,
        /// The requested field.
        field: String,
    },
    /// A variable name was not found in the dataset.
    #[error("variable {0} not found in the dataset")]
    VariableNotFound(String),
    /// The dataset carries v0 metadata (`api_version` rather than
    /// `apiVersion`).
    #[error("dataset metadata is legacy v0 (found snake-case api_version)")]
    LegacyVersion,
    /// `commit_metadata` was called but no variable reports changes.
    #[error("no variables were modified")]
    NoChanges,
    /// Variables disagree on the size of a shared dimension after slicing.
    #[error("inconsistent domain: {0}")]
    InconsistentDomain(String),
    /// A chunk read failed while materialising a variable.
    #[error("read failed: {0}")]
    ReadFailed(#[source] StorageError),
    /// A path scheme requires a store driver that is not available.
    #[error("{0}")]
    DriverMissing(String),
    /// A storage-layer failure.
    #[error(transparent)]
    BackendError(StorageError),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        check_missing_driver(err)
    }
}

/// Wraps a storage error, upgrading well-known "driver not registered"
/// messages for cloud schemes into [`Error::DriverMissing`] with a hint.
pub(crate) fn check_missing_driver(err: StorageError) -> Error {
    let message = err.to_string();
    if message.contains("is not registered") || message.contains("driver is not available") {
        if message.contains("gcs") {
            return Error::DriverMissing(
                "a GCS path was detected but the GCS store driver is not available; \
                 build with a GCS-capable key-value store"
                    .to_string(),
            );
        }
        if message.contains("s3") {
            return Error::DriverMissing(
                "an S3 path was detected but the S3 store driver is not available; \
                 build with an S3-capable key-value store"
                    .to_string(),
            );
        }
    }
    Error::BackendError(err)
}

/// Convenience alias for crate results.
pub type Result<T> = std::result::Result<T, Error>;
