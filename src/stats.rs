//! Editable per-variable metadata: summary statistics and free-form
//! attributes.
//!
//! A [`UserAttributes`] value is immutable after construction; editing it
//! means building a replacement from JSON and swapping it into the
//! variable's shared [`AttributesHandle`]. The handle's generation counter
//! is what `was_updated` and metadata publication are built on: the
//! version token changes iff an update was performed, and a variable is
//! dirty while the current version is ahead of the last published one.
//!
//! Histograms come in two shapes — centered bins or edge-defined bins —
//! and carry either `f32` or `i32` bin values. When parsing, the element
//! type is inferred from the document: bin values without fractional
//! content parse as `i32`, anything else as `f32`, and a `statsV1`
//! sequence always parses as `f32`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// The histogram bin element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramDtype {
    /// 32-bit float bins.
    Float32,
    /// 32-bit integer bins.
    Int32,
}

/// A Rust type usable as a histogram bin element.
pub trait HistogramElement: sealed::Sealed {
    /// The corresponding histogram element type.
    const DTYPE: HistogramDtype;
}

impl HistogramElement for f32 {
    const DTYPE: HistogramDtype = HistogramDtype::Float32;
}

impl HistogramElement for i32 {
    const DTYPE: HistogramDtype = HistogramDtype::Int32;
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for i32 {}
}

/// Histogram bin values, `f32` or `i32` per the source document.
#[derive(Debug, Clone, PartialEq)]
pub enum HistogramValues {
    /// Float bins.
    Float32(Vec<f32>),
    /// Integer bins.
    Int32(Vec<i32>),
}

impl HistogramValues {
    fn from_json(value: &Value, dtype: HistogramDtype) -> Result<Self> {
        let entries = value
            .as_array()
            .ok_or_else(|| Error::InvalidSchema("histogram bins must be an array".to_string()))?;
        match dtype {
            HistogramDtype::Float32 => {
                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    values.push(entry.as_f64().ok_or_else(|| {
                        Error::InvalidSchema(format!("histogram bin {entry} is not a number"))
                    })? as f32);
                }
                Ok(Self::Float32(values))
            }
            HistogramDtype::Int32 => {
                let mut values = Vec::with_capacity(entries.len());
                for entry in entries {
                    let value = entry
                        .as_i64()
                        .filter(|value| i32::try_from(*value).is_ok())
                        .ok_or_else(|| {
                            Error::InvalidSchema(format!(
                                "histogram bin {entry} is not a 32-bit integer"
                            ))
                        })?;
                    values.push(value as i32);
                }
                Ok(Self::Int32(values))
            }
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Float32(values) => Value::Array(
                values
                    .iter()
                    .map(|value| Value::from(f64::from(*value)))
                    .collect(),
            ),
            Self::Int32(values) => {
                Value::Array(values.iter().map(|value| Value::from(*value)).collect())
            }
        }
    }
}

/// A histogram: centered bins, or edge-defined bins.
#[derive(Debug, Clone, PartialEq)]
pub enum Histogram {
    /// Bin centers with counts.
    CenteredBin {
        /// The center of each bin.
        bin_centers: HistogramValues,
        /// The count in each bin.
        counts: Vec<i32>,
    },
    /// Bin edges and widths with counts.
    EdgeDefined {
        /// The left edge of each bin.
        bin_edges: HistogramValues,
        /// The width of each bin.
        bin_widths: HistogramValues,
        /// The count in each bin.
        counts: Vec<i32>,
    },
}

impl Histogram {
    fn from_json(histogram: &Value, dtype: HistogramDtype) -> Result<Self> {
        let counts = |value: &Value| -> Result<Vec<i32>> {
            let entries = value.as_array().ok_or_else(|| {
                Error::InvalidSchema("histogram counts must be an array".to_string())
            })?;
            entries
                .iter()
                .map(|entry| {
                    entry
                        .as_i64()
                        .filter(|count| i32::try_from(*count).is_ok())
                        .map(|count| count as i32)
                        .ok_or_else(|| {
                            Error::InvalidSchema(format!(
                                "histogram count {entry} is not a 32-bit integer"
                            ))
                        })
                })
                .collect()
        };

        if let (Some(bin_centers), Some(count_values)) =
            (histogram.get("binCenters"), histogram.get("counts"))
        {
            return Ok(Self::CenteredBin {
                bin_centers: HistogramValues::from_json(bin_centers, dtype)?,
                counts: counts(count_values)?,
            });
        }
        if let (Some(bin_edges), Some(bin_widths), Some(count_values)) = (
            histogram.get("binEdges"),
            histogram.get("binWidths"),
            histogram.get("counts"),
        ) {
            return Ok(Self::EdgeDefined {
                bin_edges: HistogramValues::from_json(bin_edges, dtype)?,
                bin_widths: HistogramValues::from_json(bin_widths, dtype)?,
                counts: counts(count_values)?,
            });
        }
        Err(Error::InvalidSchema(
            "could not deduce the type of the provided histogram; expected \
             binCenters/counts or binEdges/binWidths/counts"
                .to_string(),
        ))
    }

    fn to_json(&self) -> Value {
        let mut object = Map::new();
        match self {
            Self::CenteredBin { bin_centers, counts } => {
                object.insert("binCenters".to_string(), bin_centers.to_json());
                object.insert(
                    "counts".to_string(),
                    Value::Array(counts.iter().map(|count| Value::from(*count)).collect()),
                );
            }
            Self::EdgeDefined {
                bin_edges,
                bin_widths,
                counts,
            } => {
                object.insert("binEdges".to_string(), bin_edges.to_json());
                object.insert("binWidths".to_string(), bin_widths.to_json());
                object.insert(
                    "counts".to_string(),
                    Value::Array(counts.iter().map(|count| Value::from(*count)).collect()),
                );
            }
        }
        Value::Object(object)
    }
}

/// Summary statistics for one variable, with a histogram.
///
/// The numeric fields keep their source JSON representation (integer or
/// float) so publication reproduces the original document exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStats {
    /// The number of samples.
    pub count: i64,
    /// The minimum sample value.
    pub min: serde_json::Number,
    /// The maximum sample value.
    pub max: serde_json::Number,
    /// The sum of the samples.
    pub sum: serde_json::Number,
    /// The sum of the squared samples.
    pub sum_squares: serde_json::Number,
    /// The sample histogram.
    pub histogram: Histogram,
}

impl SummaryStats {
    fn from_json(stats: &Value, dtype: HistogramDtype) -> Result<Self> {
        let number = |key: &str| -> Result<serde_json::Number> {
            match stats.get(key) {
                Some(Value::Number(number)) => Ok(number.clone()),
                _ => Err(Error::InvalidSchema(format!(
                    "statsV1 is missing numeric field {key}"
                ))),
            }
        };
        let histogram = stats.get("histogram").ok_or_else(|| {
            Error::InvalidSchema("statsV1 is missing parent key 'histogram'".to_string())
        })?;
        Ok(Self {
            count: stats.get("count").and_then(Value::as_i64).ok_or_else(|| {
                Error::InvalidSchema("statsV1 is missing integer field count".to_string())
            })?,
            min: number("min")?,
            max: number("max")?,
            sum: number("sum")?,
            sum_squares: number("sumSquares")?,
            histogram: Histogram::from_json(histogram, dtype)?,
        })
    }

    fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("count".to_string(), Value::from(self.count));
        object.insert("min".to_string(), Value::Number(self.min.clone()));
        object.insert("max".to_string(), Value::Number(self.max.clone()));
        object.insert("sum".to_string(), Value::Number(self.sum.clone()));
        object.insert("sumSquares".to_string(), Value::Number(self.sum_squares.clone()));
        object.insert("histogram".to_string(), self.histogram.to_json());
        Value::Object(object)
    }
}

/// Immutable editable metadata of a variable: zero or more summary
/// statistics and a free-form attributes mapping.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserAttributes {
    stats: Vec<SummaryStats>,
    attributes: Map<String, Value>,
}

impl UserAttributes {
    /// Parse the `metadata` sub-document of a variable: optional `statsV1`
    /// (one object or a sequence) and an optional `attributes` mapping.
    /// The histogram element type is inferred (see the module docs).
    ///
    /// # Errors
    /// Returns [`Error::InvalidSchema`] for malformed documents.
    pub fn from_variable_json(document: &Value) -> Result<Self> {
        Self::parse(document, infer_histogram_dtype(document))
    }

    /// Parse with an explicit histogram element type.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSchema`] for malformed documents or bins
    /// that do not fit the requested type.
    pub fn from_json_typed(document: &Value, dtype: HistogramDtype) -> Result<Self> {
        Self::parse(document, dtype)
    }

    fn parse(document: &Value, dtype: HistogramDtype) -> Result<Self> {
        if document.is_null() {
            return Ok(Self::default());
        }
        let mut stats = Vec::new();
        if let Some(stats_value) = document.get("statsV1") {
            match stats_value {
                Value::Array(entries) => {
                    for entry in entries {
                        stats.push(SummaryStats::from_json(entry, dtype)?);
                    }
                }
                _ => stats.push(SummaryStats::from_json(stats_value, dtype)?),
            }
        }
        let attributes = match document.get("attributes") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(object)) => object.clone(),
            Some(other) => {
                return Err(Error::InvalidSchema(format!(
                    "attributes must be a mapping, got {other}"
                )))
            }
        };
        Ok(Self { stats, attributes })
    }

    /// The summary statistics.
    #[must_use]
    pub fn stats(&self) -> &[SummaryStats] {
        &self.stats
    }

    /// The free-form attributes mapping.
    #[must_use]
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// True when there is nothing to serialise.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty() && self.attributes.is_empty()
    }

    /// Serialise the non-empty parts: `statsV1` (an object for one entry, a
    /// sequence for several) and `attributes`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        match self.stats.len() {
            0 => {}
            1 => {
                object.insert("statsV1".to_string(), self.stats[0].to_json());
            }
            _ => {
                object.insert(
                    "statsV1".to_string(),
                    Value::Array(self.stats.iter().map(SummaryStats::to_json).collect()),
                );
            }
        }
        if !self.attributes.is_empty() {
            object.insert(
                "attributes".to_string(),
                Value::Object(self.attributes.clone()),
            );
        }
        Value::Object(object)
    }
}

fn infer_histogram_dtype(document: &Value) -> HistogramDtype {
    let Some(stats) = document.get("statsV1") else {
        return HistogramDtype::Float32;
    };
    // A sequence of statistics always parses with float bins.
    if stats.is_array() {
        return HistogramDtype::Float32;
    }
    let Some(histogram) = stats.get("histogram").and_then(Value::as_object) else {
        return HistogramDtype::Float32;
    };
    for bins in histogram.values() {
        let Some(entries) = bins.as_array() else {
            continue;
        };
        for entry in entries {
            if entry.is_number() && entry.as_i64().is_none() {
                return HistogramDtype::Float32;
            }
        }
    }
    HistogramDtype::Int32
}

/// The shared, atomically replaceable holder of a variable's
/// [`UserAttributes`].
///
/// Every handle to a variable observes the same value; replacing it bumps
/// the version token, and publication records the version that reached
/// storage. The value is dirty while those differ.
#[derive(Debug)]
pub struct AttributesHandle {
    current: RwLock<Arc<UserAttributes>>,
    version: AtomicU64,
    published: AtomicU64,
}

impl AttributesHandle {
    /// Wrap an initial value; the initial state is clean.
    #[must_use]
    pub fn new(attributes: UserAttributes) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(Arc::new(attributes)),
            version: AtomicU64::new(0),
            published: AtomicU64::new(0),
        })
    }

    /// The current value.
    #[must_use]
    pub fn load(&self) -> Arc<UserAttributes> {
        self.current.read().clone()
    }

    /// Atomically replace the value, bumping the version token.
    pub fn replace(&self, attributes: UserAttributes) {
        *self.current.write() = Arc::new(attributes);
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// The current version token; changes iff an update was performed.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// True between an update and the next acknowledged publication.
    #[must_use]
    pub fn was_updated(&self) -> bool {
        self.version.load(Ordering::Acquire) != self.published.load(Ordering::Acquire)
    }

    /// Record that `version` reached durable storage.
    pub fn mark_published(&self, version: u64) {
        self.published.store(version, Ordering::Release);
    }
}
