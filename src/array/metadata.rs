//! The `.zarray` metadata document (Zarr storage specification v2).
//!
//! An example document for a compressed 3-D float array:
//! ```json
//! {
//!     "zarr_format": 2,
//!     "shape": [256, 512, 384],
//!     "chunks": [64, 64, 64],
//!     "dtype": "<f4",
//!     "compressor": {"id": "blosc", "cname": "lz4", "clevel": 5, "shuffle": 1, "blocksize": 0},
//!     "fill_value": "NaN",
//!     "order": "C",
//!     "filters": null,
//!     "dimension_separator": "/"
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dtype::{DataType, FillValue, Index};
use crate::error::{Error, Result};

/// The `.zarray` document for a chunked array.
#[derive(Debug, Clone, PartialEq)]
pub struct ZarrayMetadata {
    /// Array dimension sizes in declared order.
    pub shape: Vec<Index>,
    /// Chunk shape; the same rank as `shape`.
    pub chunks: Vec<Index>,
    /// The element data type.
    pub dtype: DataType,
    /// The chunk compressor; [`None`] stores chunks uncompressed.
    pub compressor: Option<BloscConfig>,
    /// The fill value for unwritten regions.
    pub fill_value: FillValue,
}

impl ZarrayMetadata {
    /// Create metadata, defaulting `chunks` to `shape` when absent.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSchema`] when the chunk grid rank differs
    /// from the array rank or any chunk extent is zero.
    pub fn new(
        shape: Vec<Index>,
        chunks: Option<Vec<Index>>,
        dtype: DataType,
        compressor: Option<BloscConfig>,
        fill_value: FillValue,
    ) -> Result<Self> {
        let chunks = chunks.unwrap_or_else(|| shape.clone());
        let metadata = Self {
            shape,
            chunks,
            dtype,
            compressor,
            fill_value,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    fn validate(&self) -> Result<()> {
        if self.chunks.len() != self.shape.len() {
            return Err(Error::InvalidSchema(format!(
                "chunk grid rank {} does not match array rank {}",
                self.chunks.len(),
                self.shape.len()
            )));
        }
        if self.chunks.iter().any(|&extent| extent == 0) {
            return Err(Error::InvalidSchema(
                "chunk extents must be non-zero".to_string(),
            ));
        }
        if let Some(compressor) = &self.compressor {
            compressor.validate()?;
        }
        Ok(())
    }

    /// The number of bytes in one decoded chunk.
    #[must_use]
    pub fn chunk_bytes(&self) -> usize {
        self.chunks.iter().product::<Index>() as usize * self.dtype.size()
    }

    /// Serialise to the on-disk JSON document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "zarr_format": 2,
            "shape": &self.shape,
            "chunks": &self.chunks,
            "dtype": self.dtype.to_zarr_json(),
            "compressor": &self.compressor,
            "fill_value": self.fill_value.to_json(),
            "order": "C",
            "filters": Value::Null,
            "dimension_separator": "/",
        })
    }

    /// Parse the on-disk JSON document. Absent `chunks` defaults to
    /// `shape`; absent `fill_value` defaults to null.
    ///
    /// # Errors
    /// Returns an error for documents that are not Zarr v2, carry an
    /// unsupported dtype, or fail chunk-grid validation.
    pub fn from_json(value: &Value) -> Result<Self> {
        let document: ZarrayDocument = serde_json::from_value(value.clone())
            .map_err(|err| Error::InvalidSchema(format!("malformed .zarray: {err}")))?;
        if document.zarr_format != 2 {
            return Err(Error::InvalidSchema(format!(
                "unsupported zarr_format {}",
                document.zarr_format
            )));
        }
        let dtype = DataType::from_zarr_json(&document.dtype)?;
        let fill_value = match document.fill_value {
            Some(value) => FillValue::from_json(&value)?,
            None => FillValue::Null,
        };
        Self::new(
            document.shape,
            document.chunks,
            dtype,
            document.compressor,
            fill_value,
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ZarrayDocument {
    zarr_format: u8,
    shape: Vec<Index>,
    #[serde(default)]
    chunks: Option<Vec<Index>>,
    dtype: Value,
    #[serde(default)]
    compressor: Option<BloscConfig>,
    #[serde(default)]
    fill_value: Option<Value>,
}

/// The blosc compressor configuration stored in `.zarray`.
///
/// Only blosc is accepted as a compressor; the algorithm, level, shuffle,
/// and block size are validated against the supported ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloscConfig {
    /// Always `"blosc"`.
    pub id: String,
    /// The inner compression algorithm.
    pub cname: BloscAlgorithm,
    /// Compression level, 0–9.
    pub clevel: u8,
    /// Shuffle mode: -1 automatic, 0 none, 1 byte, 2 bit.
    pub shuffle: i8,
    /// Block size in bytes; 0 selects it automatically.
    pub blocksize: i64,
}

impl Default for BloscConfig {
    fn default() -> Self {
        Self {
            id: "blosc".to_string(),
            cname: BloscAlgorithm::Lz4,
            clevel: 5,
            shuffle: 1,
            blocksize: 0,
        }
    }
}

impl BloscConfig {
    /// Validate the configuration ranges.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedCompressor`] when any parameter is out
    /// of range.
    pub fn validate(&self) -> Result<()> {
        if self.id != "blosc" {
            return Err(Error::UnsupportedCompressor(self.id.clone()));
        }
        if self.clevel > 9 {
            return Err(Error::UnsupportedCompressor(format!(
                "compressor level must be between 0 and 9, got {}",
                self.clevel
            )));
        }
        if !(-1..=2).contains(&self.shuffle) {
            return Err(Error::UnsupportedCompressor(format!(
                "shuffle must be -1, 0, 1 or 2, got {}",
                self.shuffle
            )));
        }
        if self.blocksize < 0 {
            return Err(Error::UnsupportedCompressor(format!(
                "blocksize must be non-negative, got {}",
                self.blocksize
            )));
        }
        Ok(())
    }

    /// Build a configuration from a dataset-spec `compressor` document:
    /// `{"name": "blosc", "algorithm"?, "level"?, "shuffle"?, "blocksize"?}`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedCompressor`] for non-blosc names or
    /// out-of-range parameters.
    pub fn from_spec_json(value: &Value) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UnsupportedCompressor("compressor name must be specified".to_string()))?;
        if name != "blosc" {
            return Err(Error::UnsupportedCompressor(format!(
                "only the blosc compressor is supported, got {name}"
            )));
        }
        let mut config = Self::default();
        if let Some(algorithm) = value.get("algorithm") {
            let algorithm = algorithm
                .as_str()
                .ok_or_else(|| Error::UnsupportedCompressor(algorithm.to_string()))?;
            config.cname = BloscAlgorithm::from_name(algorithm)?;
        }
        if let Some(level) = value.get("level") {
            let level = level
                .as_i64()
                .filter(|level| (0..=9).contains(level))
                .ok_or_else(|| {
                    Error::UnsupportedCompressor(format!(
                        "compressor level must be between 0 and 9, got {level}"
                    ))
                })?;
            config.clevel = level as u8;
        }
        if let Some(shuffle) = value.get("shuffle") {
            config.shuffle = shuffle
                .as_i64()
                .filter(|shuffle| (-1..=2).contains(shuffle))
                .ok_or_else(|| {
                    Error::UnsupportedCompressor(format!("shuffle must be -1, 0, 1 or 2, got {shuffle}"))
                })? as i8;
        }
        if let Some(blocksize) = value.get("blocksize") {
            config.blocksize = blocksize
                .as_i64()
                .filter(|blocksize| *blocksize >= 0)
                .ok_or_else(|| {
                    Error::UnsupportedCompressor(format!(
                        "blocksize must be non-negative, got {blocksize}"
                    ))
                })?;
        }
        Ok(config)
    }
}

/// The inner compression algorithms blosc supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloscAlgorithm {
    /// blosclz
    BloscLZ,
    /// lz4
    Lz4,
    /// lz4hc
    Lz4hc,
    /// zlib
    Zlib,
    /// zstd
    Zstd,
}

impl BloscAlgorithm {
    /// The c-blosc compressor name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BloscLZ => "blosclz",
            Self::Lz4 => "lz4",
            Self::Lz4hc => "lz4hc",
            Self::Zlib => "zlib",
            Self::Zstd => "zstd",
        }
    }

    /// Parse an algorithm name.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedCompressor`] for unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "blosclz" => Ok(Self::BloscLZ),
            "lz4" => Ok(Self::Lz4),
            "lz4hc" => Ok(Self::Lz4hc),
            "zlib" => Ok(Self::Zlib),
            "zstd" => Ok(Self::Zstd),
            _ => Err(Error::UnsupportedCompressor(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ScalarType;

    #[test]
    fn zarray_round_trip() {
        let metadata = ZarrayMetadata::new(
            vec![256, 512],
            Some(vec![64, 64]),
            DataType::Scalar(ScalarType::Float32),
            Some(BloscConfig::default()),
            FillValue::NaN,
        )
        .unwrap();
        let json = metadata.to_json();
        assert_eq!(json["zarr_format"], 2);
        assert_eq!(json["order"], "C");
        assert_eq!(json["filters"], Value::Null);
        assert_eq!(json["dimension_separator"], "/");
        assert_eq!(json["fill_value"], "NaN");
        assert_eq!(ZarrayMetadata::from_json(&json).unwrap(), metadata);
    }

    #[test]
    fn chunks_default_to_shape() {
        let metadata = ZarrayMetadata::new(
            vec![10, 20],
            None,
            DataType::Scalar(ScalarType::Int16),
            None,
            FillValue::Null,
        )
        .unwrap();
        assert_eq!(metadata.chunks, vec![10, 20]);
    }

    #[test]
    fn chunk_rank_mismatch_rejected() {
        let result = ZarrayMetadata::new(
            vec![10, 20],
            Some(vec![10]),
            DataType::Scalar(ScalarType::Int16),
            None,
            FillValue::Null,
        );
        assert!(matches!(result, Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn compressor_spec_defaults() {
        let config = BloscConfig::from_spec_json(&serde_json::json!({"name": "blosc"})).unwrap();
        assert_eq!(config, BloscConfig::default());
    }

    #[test]
    fn compressor_spec_rejects_non_blosc() {
        let result = BloscConfig::from_spec_json(&serde_json::json!({"name": "gzip"}));
        assert!(matches!(result, Err(Error::UnsupportedCompressor(_))));
    }

    #[test]
    fn compressor_spec_rejects_bad_level() {
        let result =
            BloscConfig::from_spec_json(&serde_json::json!({"name": "blosc", "level": 12}));
        assert!(matches!(result, Err(Error::UnsupportedCompressor(_))));
    }

    #[test]
    fn compressor_serde_names() {
        let config = BloscConfig {
            cname: BloscAlgorithm::Zstd,
            ..BloscConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["cname"], "zstd");
        assert_eq!(json["id"], "blosc");
    }
}
