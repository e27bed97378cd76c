//! A library for labeled multi-dimensional scientific datasets stored in
//! the Zarr V2 format.
//!
//! A *dataset* is a named collection of *variables* — N-dimensional
//! chunked arrays — sharing a common labeled index space, annotated with
//! structured metadata (units, statistics, histograms, free-form
//! attributes). The on-disk layout is Zarr v2 with `/`-separated chunk
//! keys and consolidated metadata at the dataset root, so datasets are
//! readable by any Zarr v2 implementation; datasets written by this
//! library additionally carry `_ARRAY_DIMENSIONS` on every variable and
//! `apiVersion` on the root attributes.
//!
//! Typical volumes (seismic images, velocity models) run to tens of
//! gigabytes, so data access is asynchronous and slice-first: a
//! [`Dataset`] or [`Variable`] handle is cheap, label-based slicing is
//! synchronous and I/O-free, and only [`Variable::read`] /
//! [`Variable::write`] move chunk data.
//!
//! - [`Dataset::from_json`] validates a specification document and creates
//!   every variable.
//! - [`Dataset::open`] reopens a dataset from its consolidated metadata.
//! - [`Dataset::isel`] slices by index, [`Dataset::sel`] by coordinate
//!   value.
//! - [`Dataset::commit_metadata`] publishes edited statistics and
//!   attributes.
//!
//! ## Example
//!
//! ```no_run
//! use seiscube::{Context, Dataset, OpenMode, RangeDescriptor};
//!
//! # async fn example(spec: serde_json::Value) -> seiscube::Result<()> {
//! let context = Context::default();
//! let dataset = Dataset::from_json(&spec, "/data/survey", OpenMode::Create, &context).await?;
//!
//! // Half-open, label-based slicing; untouched axes stay intact.
//! let shallow = dataset.isel(&[RangeDescriptor::new("depth", 0, 100)])?;
//! let image = shallow.variables().get::<f32>("image")?;
//! let data = image.read().await?;
//! println!("read {} samples", data.num_samples());
//! # Ok(())
//! # }
//! ```

pub mod array;
pub mod collection;
pub mod config;
pub mod dataset;
pub mod dtype;
pub mod error;
pub mod schema;
pub mod stats;
pub mod storage;
pub mod utils;
pub mod variable;

pub use crate::array::{Dimension, Domain, Interval, OpenMode, ResizeMode};
pub use crate::collection::VariableCollection;
pub use crate::config::Context;
pub use crate::dataset::{Dataset, SelDescriptor};
pub use crate::dtype::{DataType, Element, FillValue, Index, ScalarType, StructuredField};
pub use crate::error::{Error, Result, StorageError};
pub use crate::schema::{construct, BackendSpec, API_VERSION};
pub use crate::stats::{
    Histogram, HistogramDtype, HistogramValues, SummaryStats, UserAttributes,
};
pub use crate::utils::{delete_dataset, trim_dataset};
pub use crate::variable::{
    AllocateConstraint, ListDescriptor, RangeDescriptor, ValueDescriptor, Variable, VariableData,
    INERT_SLICE_LABEL, MAX_SLICE_DESCRIPTORS,
};
