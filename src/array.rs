//! The chunked-array engine.
//!
//! An array is a node in the on-disk hierarchy holding N-dimensional data
//! split into regular chunks, each persisted as a compressed blob under a
//! `/`-separated key. The authoritative description of an array is its
//! `.zarray` document ([`ZarrayMetadata`]).
//!
//! A [`ChunkArray`] is the handle to one on-disk array. An [`ArrayStore`]
//! is what a variable holds: a labeled, offset-origin *view* over a chunk
//! array — possibly narrowed by slicing, possibly projecting a single field
//! of a structured dtype, and possibly a virtual concatenation of several
//! views along one axis (the representation behind repeated-label slicing).
//!
//! Reading materialises the view into a contiguous C-order buffer, striping
//! over the intersecting chunks; missing chunks read as the fill value.
//! Writing stripes a buffer back over the chunks, re-encoding only the
//! chunks the view touches.

pub mod codec;
pub mod metadata;

use std::sync::Arc;

use async_recursion::async_recursion;
use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use itertools::Itertools;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::config::Context;
use crate::dtype::{AlignedBytes, DataType, Index};
use crate::error::{Error, Result, StorageError};
use crate::storage::{KeyValueStore, KvStoreSpec};

pub use metadata::{BloscAlgorithm, BloscConfig, ZarrayMetadata};

/// How to open or create an array or dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Require an existing array; fail otherwise.
    Open,
    /// Create a new array; fail if one already exists.
    Create,
    /// Create a new array, removing any pre-existing content first.
    CreateClean,
}

/// How resize treats data outside the new bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Only rewrite the metadata; out-of-bounds chunks are kept but become
    /// inaccessible.
    MetadataOnly,
    /// Delete chunks that fall entirely outside the new bounds.
    TiedBounds,
}

/// One labeled axis of a domain: a half-open interval
/// `[origin, origin + size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    /// The axis label; empty for the trailing byte axis of raw structured
    /// views.
    pub label: String,
    /// The inclusive lower bound.
    pub origin: Index,
    /// The number of positions.
    pub size: Index,
}

impl Dimension {
    /// The exclusive upper bound.
    #[must_use]
    pub const fn end(&self) -> Index {
        self.origin + self.size
    }
}

/// The half-open extent of a labeled axis.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display(fmt = "{}: [{}, {})", label, inclusive_min, exclusive_max)]
pub struct Interval {
    /// The axis label.
    pub label: String,
    /// The inclusive minimum.
    pub inclusive_min: Index,
    /// The exclusive maximum.
    pub exclusive_max: Index,
}

/// A labeled index domain: the ordered axes of an array view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Domain {
    dims: Vec<Dimension>,
}

impl Domain {
    /// Create a domain from its axes.
    #[must_use]
    pub fn new(dims: Vec<Dimension>) -> Self {
        Self { dims }
    }

    /// A zero-origin domain from labels and sizes.
    #[must_use]
    pub fn from_labels_and_shape(labels: &[String], shape: &[Index]) -> Self {
        Self::new(
            labels
                .iter()
                .zip(shape)
                .map(|(label, &size)| Dimension {
                    label: label.clone(),
                    origin: 0,
                    size,
                })
                .collect(),
        )
    }

    /// The number of axes (including any trailing byte axis).
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// All axes in order.
    #[must_use]
    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// The axis labels in order.
    #[must_use]
    pub fn labels(&self) -> Vec<&str> {
        self.dims.iter().map(|dim| dim.label.as_str()).collect()
    }

    /// The axis sizes in order.
    #[must_use]
    pub fn shape(&self) -> Vec<Index> {
        self.dims.iter().map(|dim| dim.size).collect()
    }

    /// The axis origins in order.
    #[must_use]
    pub fn origin(&self) -> Vec<Index> {
        self.dims.iter().map(|dim| dim.origin).collect()
    }

    /// The total number of positions.
    #[must_use]
    pub fn num_elements(&self) -> Index {
        self.dims.iter().map(|dim| dim.size).product()
    }

    /// The index of the axis carrying `label`. Empty labels never match.
    #[must_use]
    pub fn axis(&self, label: &str) -> Option<usize> {
        if label.is_empty() {
            return None;
        }
        self.dims.iter().position(|dim| dim.label == label)
    }

    /// The half-open interval of the axis carrying `label`.
    #[must_use]
    pub fn interval(&self, label: &str) -> Option<Interval> {
        self.axis(label).map(|axis| {
            let dim = &self.dims[axis];
            Interval {
                label: dim.label.clone(),
                inclusive_min: dim.origin,
                exclusive_max: dim.end(),
            }
        })
    }

    /// The half-open intervals of every axis.
    #[must_use]
    pub fn intervals(&self) -> Vec<Interval> {
        self.dims
            .iter()
            .map(|dim| Interval {
                label: dim.label.clone(),
                inclusive_min: dim.origin,
                exclusive_max: dim.end(),
            })
            .collect()
    }

    /// A copy with the axis at `axis` narrowed to `[start, stop)`.
    #[must_use]
    pub(crate) fn with_axis_range(&self, axis: usize, start: Index, stop: Index) -> Self {
        let mut dims = self.dims.clone();
        dims[axis].origin = start;
        dims[axis].size = stop - start;
        Self { dims }
    }

    /// The axes excluding any trailing unlabeled byte axis.
    pub(crate) fn labeled(&self) -> &[Dimension] {
        match self.dims.last() {
            Some(last) if last.label.is_empty() => &self.dims[..self.dims.len() - 1],
            _ => &self.dims,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (index, dim) in self.dims.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "\"{}\": [{}, {})", dim.label, dim.origin, dim.end())?;
        }
        f.write_str("}")
    }
}

/// The key of the `.zarray` document below an array prefix.
pub const ZARRAY_KEY: &str = ".zarray";

/// A handle to one on-disk chunked array.
#[derive(Debug)]
pub struct ChunkArray {
    kv: Arc<dyn KeyValueStore>,
    kv_spec: KvStoreSpec,
    metadata: RwLock<ZarrayMetadata>,
    context: Context,
    cache_scope: String,
}

impl ChunkArray {
    /// Open an existing array (reads `.zarray`).
    ///
    /// # Errors
    /// Fails if the array does not exist or its metadata is malformed.
    pub async fn open(kv_spec: KvStoreSpec, context: Context) -> Result<Arc<Self>> {
        let kv = kv_spec.open().await?;
        let bytes = kv
            .read(ZARRAY_KEY)
            .await?
            .ok_or_else(|| StorageError::KeyNotFound(format!("{}/{ZARRAY_KEY}", kv_spec.path)))?;
        let document: Value =
            serde_json::from_slice(&bytes).map_err(StorageError::InvalidJSON)?;
        let metadata = ZarrayMetadata::from_json(&document)?;
        Ok(Arc::new(Self::new(kv, kv_spec, metadata, context)))
    }

    /// Create a new array (writes `.zarray`).
    ///
    /// # Errors
    /// In [`OpenMode::Create`], fails if the array already exists.
    /// [`OpenMode::Open`] is rejected here; use [`ChunkArray::open`].
    pub async fn create(
        kv_spec: KvStoreSpec,
        metadata: ZarrayMetadata,
        context: Context,
        mode: OpenMode,
    ) -> Result<Arc<Self>> {
        let kv = kv_spec.open().await?;
        match mode {
            OpenMode::Open => {
                return Err(Error::BackendError(StorageError::Unsupported(
                    "create requires a create mode".to_string(),
                )))
            }
            OpenMode::Create => {
                if kv.read(ZARRAY_KEY).await?.is_some() {
                    return Err(Error::BackendError(StorageError::Other(format!(
                        "array already exists at {}",
                        kv_spec.path
                    ))));
                }
            }
            OpenMode::CreateClean => {
                kv.delete_prefix("").await?;
            }
        }
        let document = serde_json::to_vec_pretty(&metadata.to_json())
            .map_err(StorageError::InvalidJSON)?;
        kv.write(ZARRAY_KEY, Bytes::from(document)).await?;
        debug!(path = %kv_spec.path, "created chunked array");
        Ok(Arc::new(Self::new(kv, kv_spec, metadata, context)))
    }

    fn new(
        kv: Arc<dyn KeyValueStore>,
        kv_spec: KvStoreSpec,
        metadata: ZarrayMetadata,
        context: Context,
    ) -> Self {
        let cache_scope = format!(
            "{:?}|{}|{}",
            kv_spec.driver,
            kv_spec.bucket.as_deref().unwrap_or(""),
            kv_spec.path
        );
        Self {
            kv,
            kv_spec,
            metadata: RwLock::new(metadata),
            context,
            cache_scope,
        }
    }

    /// A copy of the current `.zarray` metadata.
    #[must_use]
    pub fn metadata(&self) -> ZarrayMetadata {
        self.metadata.read().clone()
    }

    /// The store spec this array was opened with.
    #[must_use]
    pub fn kv_spec(&self) -> &KvStoreSpec {
        &self.kv_spec
    }

    /// The store holding this array's keys.
    #[must_use]
    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    fn chunk_key(indices: &[Index]) -> String {
        indices.iter().join("/")
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}|{key}", self.cache_scope)
    }

    async fn read_chunk(&self, indices: &[Index]) -> std::result::Result<Option<Bytes>, StorageError> {
        let key = Self::chunk_key(indices);
        let cache_key = self.cache_key(&key);
        if let Some(decoded) = self.context.cache().get(&cache_key) {
            return Ok(Some(decoded));
        }
        let Some(encoded) = self.kv.read(&key).await? else {
            return Ok(None);
        };
        let (compressor, expected) = {
            let metadata = self.metadata.read();
            (metadata.compressor.clone(), metadata.chunk_bytes())
        };
        let decoded = match compressor {
            Some(_) => Bytes::from(codec::decompress(&encoded)?),
            None => encoded,
        };
        if decoded.len() != expected {
            return Err(StorageError::Codec(format!(
                "chunk {key} decoded to {} bytes, expected {expected}",
                decoded.len()
            )));
        }
        self.context.cache().insert(cache_key, decoded.clone());
        Ok(Some(decoded))
    }

    async fn write_chunk(&self, indices: &[Index], decoded: Vec<u8>) -> std::result::Result<(), StorageError> {
        let key = Self::chunk_key(indices);
        let (compressor, typesize) = {
            let metadata = self.metadata.read();
            (metadata.compressor.clone(), metadata.dtype.size())
        };
        let payload = match &compressor {
            Some(config) => codec::compress(&decoded, config, typesize)?,
            None => decoded.clone(),
        };
        self.kv.write(&key, Bytes::from(payload)).await?;
        self.context
            .cache()
            .insert(self.cache_key(&key), Bytes::from(decoded));
        Ok(())
    }

    /// Resize the on-disk array to `new_shape`.
    ///
    /// With [`ResizeMode::TiedBounds`], chunks that fall entirely outside
    /// the new bounds are deleted; boundary chunks are kept.
    ///
    /// # Errors
    /// Fails on rank mismatch or storage errors.
    pub async fn resize(&self, new_shape: Vec<Index>, mode: ResizeMode) -> Result<()> {
        let (old_shape, chunks) = {
            let metadata = self.metadata.read();
            (metadata.shape.clone(), metadata.chunks.clone())
        };
        if new_shape.len() != old_shape.len() {
            return Err(Error::InvalidSlice(format!(
                "resize rank {} does not match array rank {}",
                new_shape.len(),
                old_shape.len()
            )));
        }

        if mode == ResizeMode::TiedBounds {
            let old_grid: Vec<Index> = old_shape
                .iter()
                .zip(&chunks)
                .map(|(&size, &chunk)| size.div_ceil(chunk))
                .collect();
            let new_grid: Vec<Index> = new_shape
                .iter()
                .zip(&chunks)
                .map(|(&size, &chunk)| size.div_ceil(chunk))
                .collect();
            if old_grid.iter().any(|&extent| extent == 0) {
                // Nothing stored.
            } else {
                let first = vec![0; old_grid.len()];
                let last: Vec<Index> = old_grid.iter().map(|&extent| extent - 1).collect();
                let mut indices = first.clone();
                loop {
                    let out_of_bounds = indices
                        .iter()
                        .zip(&new_grid)
                        .any(|(&index, &bound)| index >= bound);
                    if out_of_bounds {
                        self.kv.delete(&Self::chunk_key(&indices)).await?;
                        let cache_key = self.cache_key(&Self::chunk_key(&indices));
                        self.context.cache().invalidate(&cache_key);
                    }
                    if !advance(&mut indices, &first, &last) {
                        break;
                    }
                }
            }
        }

        let updated = {
            let mut metadata = self.metadata.write();
            metadata.shape = new_shape;
            metadata.clone()
        };
        let document = serde_json::to_vec_pretty(&updated.to_json())
            .map_err(StorageError::InvalidJSON)?;
        self.kv.write(ZARRAY_KEY, Bytes::from(document)).await?;
        debug!(path = %self.kv_spec.path, shape = ?updated.shape, "resized array");
        Ok(())
    }
}

/// Which part of each stored record a view exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// The whole record: scalar elements, or raw bytes with a trailing byte
    /// axis for structured dtypes.
    Full,
    /// One named field of a structured dtype, by index.
    Field(usize),
}

/// A labeled view over one chunked array.
#[derive(Debug, Clone)]
pub struct ArrayView {
    array: Arc<ChunkArray>,
    domain: Domain,
    projection: Projection,
}

impl ArrayView {
    /// A full view of `array` with the given axis labels.
    ///
    /// Structured arrays gain a trailing unlabeled byte axis of the record
    /// width.
    ///
    /// # Errors
    /// Fails if the label count does not match the array rank.
    pub fn new(array: Arc<ChunkArray>, labels: &[String]) -> Result<Self> {
        let metadata = array.metadata();
        if labels.len() != metadata.shape.len() {
            return Err(Error::InvalidSchema(format!(
                "{} dimension names for rank-{} array",
                labels.len(),
                metadata.shape.len()
            )));
        }
        let mut domain = Domain::from_labels_and_shape(labels, &metadata.shape);
        if metadata.dtype.fields().is_some() {
            domain = Domain::new(
                domain
                    .dims()
                    .iter()
                    .cloned()
                    .chain(std::iter::once(Dimension {
                        label: String::new(),
                        origin: 0,
                        size: metadata.dtype.size() as Index,
                    }))
                    .collect(),
            );
        }
        Ok(Self {
            array,
            domain,
            projection: Projection::Full,
        })
    }

    /// A view of one field of a structured array, with the given labels.
    ///
    /// # Errors
    /// Fails if the array is not structured or the field index is out of
    /// range.
    pub fn with_field(array: Arc<ChunkArray>, labels: &[String], field: usize) -> Result<Self> {
        let metadata = array.metadata();
        let Some(fields) = metadata.dtype.fields() else {
            return Err(Error::NotStructured(array.kv_spec().stem().to_string()));
        };
        if field >= fields.len() {
            return Err(Error::UnknownField {
                variable: array.kv_spec().stem().to_string(),
                field: field.to_string(),
            });
        }
        if labels.len() != metadata.shape.len() {
            return Err(Error::InvalidSchema(format!(
                "{} dimension names for rank-{} array",
                labels.len(),
                metadata.shape.len()
            )));
        }
        let domain = Domain::from_labels_and_shape(labels, &metadata.shape);
        Ok(Self {
            array,
            domain,
            projection: Projection::Field(field),
        })
    }

    /// Bytes per exposed position, and the byte offset inside each record.
    fn element_layout(&self) -> (usize, usize) {
        let metadata = self.array.metadata();
        match (&self.projection, metadata.dtype.fields()) {
            (Projection::Full, None) => (metadata.dtype.size(), 0),
            (Projection::Full, Some(_)) => (metadata.dtype.size(), 0),
            (Projection::Field(index), Some(fields)) => {
                let offset = fields[..*index]
                    .iter()
                    .map(|field| field.dtype.size())
                    .sum();
                (fields[*index].dtype.size(), offset)
            }
            (Projection::Field(_), None) => (metadata.dtype.size(), 0),
        }
    }

    fn fill_record(&self) -> Result<Vec<u8>> {
        let metadata = self.array.metadata();
        metadata.fill_value.element_bytes(&metadata.dtype)
    }
}

/// A labeled array store: a single view, or a virtual concatenation of
/// views along one axis.
#[derive(Debug, Clone)]
pub enum ArrayStore {
    /// A view over one chunked array.
    Base(ArrayView),
    /// Views concatenated along a labeled axis, in the order given.
    Concat {
        /// The concatenated parts.
        parts: Vec<ArrayStore>,
        /// The concatenation axis (index into the domain).
        axis: usize,
        /// The combined domain; the concatenation axis starts at zero.
        domain: Domain,
    },
}

impl ArrayStore {
    /// The view's labeled domain.
    #[must_use]
    pub fn domain(&self) -> &Domain {
        match self {
            Self::Base(view) => &view.domain,
            Self::Concat { domain, .. } => domain,
        }
    }

    /// The underlying array's data type.
    #[must_use]
    pub fn array_dtype(&self) -> DataType {
        match self {
            Self::Base(view) => view.array.metadata().dtype,
            Self::Concat { parts, .. } => parts[0].array_dtype(),
        }
    }

    /// The data type the view exposes: the array dtype for full views, the
    /// field's scalar type for field projections.
    #[must_use]
    pub fn effective_dtype(&self) -> DataType {
        match self {
            Self::Base(view) => {
                let dtype = view.array.metadata().dtype;
                if let Projection::Field(index) = &view.projection {
                    if let Some(fields) = dtype.fields() {
                        return DataType::Scalar(fields[*index].dtype);
                    }
                }
                dtype
            }
            Self::Concat { parts, .. } => parts[0].effective_dtype(),
        }
    }

    /// Bytes per labeled position.
    #[must_use]
    pub fn element_size(&self) -> usize {
        match self {
            Self::Base(view) => view.element_layout().0,
            Self::Concat { parts, .. } => parts[0].element_size(),
        }
    }

    /// The total byte length of a materialised buffer for this view.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        let positions: Index = self
            .domain()
            .labeled()
            .iter()
            .map(|dim| dim.size)
            .product();
        positions as usize * self.element_size()
    }

    /// The fill pattern of one exposed element.
    pub(crate) fn fill_element(&self) -> Result<Vec<u8>> {
        match self {
            Self::Base(view) => {
                let record = view.fill_record()?;
                let (width, offset) = view.element_layout();
                Ok(record[offset..offset + width].to_vec())
            }
            Self::Concat { parts, .. } => parts[0].fill_element(),
        }
    }

    /// The backing array of the first (or only) part.
    #[must_use]
    pub fn base_array(&self) -> &Arc<ChunkArray> {
        match self {
            Self::Base(view) => &view.array,
            Self::Concat { parts, .. } => parts[0].base_array(),
        }
    }

    /// The backend spec document for this view.
    #[must_use]
    pub fn spec_json(&self) -> Value {
        let array = self.base_array();
        let metadata = array.metadata();
        let mut spec = serde_json::json!({
            "driver": "zarr",
            "kvstore": serde_json::to_value(array.kv_spec()).unwrap_or(Value::Null),
            "metadata": metadata.to_json(),
        });
        if let Self::Base(view) = self {
            if let (Projection::Field(index), Some(fields)) =
                (&view.projection, metadata.dtype.fields())
            {
                spec["field"] = Value::String(fields[*index].name.clone());
            }
        }
        spec
    }

    /// Narrow the axis carrying `label` to `[start, stop)`.
    ///
    /// The range must lie within the current domain; the caller is expected
    /// to have clamped it.
    ///
    /// # Errors
    /// Fails if the label is absent or the range leaves the domain.
    pub fn restrict(&self, label: &str, start: Index, stop: Index) -> Result<ArrayStore> {
        let Some(axis) = self.domain().axis(label) else {
            return Err(Error::UnknownDimension(label.to_string()));
        };
        let dim = &self.domain().dims()[axis];
        if start < dim.origin || stop > dim.end() || start > stop {
            return Err(Error::InvalidSlice(format!(
                "range [{start}, {stop}) leaves the domain of {label} [{}, {})",
                dim.origin,
                dim.end()
            )));
        }
        match self {
            Self::Base(view) => {
                let mut narrowed = view.clone();
                narrowed.domain = view.domain.with_axis_range(axis, start, stop);
                Ok(Self::Base(narrowed))
            }
            Self::Concat {
                parts,
                axis: concat_axis,
                domain,
            } => {
                if axis != *concat_axis {
                    let parts = parts
                        .iter()
                        .map(|part| part.restrict(label, start, stop))
                        .collect::<Result<Vec<_>>>()?;
                    let domain = domain.with_axis_range(axis, start, stop);
                    return Ok(Self::Concat {
                        parts,
                        axis: *concat_axis,
                        domain,
                    });
                }
                // Split the range across the concatenated parts.
                let mut selected = Vec::new();
                let mut offset = domain.dims()[axis].origin;
                for part in parts {
                    let extent = part.domain().dims()[axis].size;
                    let part_begin = offset;
                    let part_end = offset + extent;
                    let overlap_begin = start.max(part_begin);
                    let overlap_end = stop.min(part_end);
                    if overlap_begin < overlap_end {
                        let local_origin = part.domain().dims()[axis].origin;
                        let local_start = local_origin + (overlap_begin - part_begin);
                        let local_stop = local_origin + (overlap_end - part_begin);
                        selected.push(part.restrict(label, local_start, local_stop)?);
                    }
                    offset = part_end;
                }
                match selected.len() {
                    0 => {
                        // An empty selection within the domain: keep a
                        // zero-size view of the first part.
                        let local_origin = parts[0].domain().dims()[axis].origin;
                        parts[0].restrict(label, local_origin, local_origin)
                    }
                    1 => Ok(selected.remove(0)),
                    _ => Self::concat(selected, label),
                }
            }
        }
    }

    /// Concatenate views along the axis carrying `label`, in order.
    ///
    /// # Errors
    /// Fails if the parts disagree on rank, labels, dtype, or on the
    /// intervals of any other axis.
    pub fn concat(parts: Vec<ArrayStore>, label: &str) -> Result<ArrayStore> {
        let first = parts
            .first()
            .ok_or_else(|| Error::InvalidSlice("cannot concatenate zero views".to_string()))?;
        let axis = first
            .domain()
            .axis(label)
            .ok_or_else(|| Error::UnknownDimension(label.to_string()))?;
        let reference = first.domain().clone();
        let dtype = first.effective_dtype();
        let mut total = 0;
        for part in &parts {
            if part.effective_dtype() != dtype {
                return Err(Error::InvalidSlice(
                    "cannot concatenate views with different dtypes".to_string(),
                ));
            }
            let domain = part.domain();
            if domain.rank() != reference.rank() {
                return Err(Error::InvalidSlice(
                    "cannot concatenate views with different ranks".to_string(),
                ));
            }
            for (index, (dim, reference_dim)) in
                domain.dims().iter().zip(reference.dims()).enumerate()
            {
                if dim.label != reference_dim.label {
                    return Err(Error::InvalidSlice(
                        "cannot concatenate views with different labels".to_string(),
                    ));
                }
                if index != axis
                    && (dim.origin != reference_dim.origin || dim.size != reference_dim.size)
                {
                    return Err(Error::InvalidSlice(format!(
                        "concatenated views disagree on axis {}",
                        dim.label
                    )));
                }
            }
            total += domain.dims()[axis].size;
        }
        let mut dims = reference.dims().to_vec();
        dims[axis].origin = 0;
        dims[axis].size = total;
        Ok(ArrayStore::Concat {
            parts,
            axis,
            domain: Domain::new(dims),
        })
    }

    /// Materialise the view into a contiguous C-order buffer.
    ///
    /// Missing chunks read as the fill value.
    ///
    /// # Errors
    /// Returns [`Error::ReadFailed`] if any chunk read or decode fails.
    #[async_recursion]
    pub async fn read(&self) -> Result<AlignedBytes> {
        match self {
            Self::Base(view) => read_view(view).await,
            Self::Concat {
                parts,
                axis,
                domain,
            } => {
                let element = self.element_size();
                let fill = self.fill_element()?;
                let mut out = AlignedBytes::filled(self.byte_len(), &fill);
                let out_shape: Vec<Index> =
                    domain.labeled().iter().map(|dim| dim.size).collect();
                let out_origin: Vec<Index> =
                    domain.labeled().iter().map(|dim| dim.origin).collect();
                let mut offset = domain.dims()[*axis].origin;
                for part in parts {
                    let data = part.read().await?;
                    let part_domain = part.domain();
                    let part_shape: Vec<Index> =
                        part_domain.labeled().iter().map(|dim| dim.size).collect();
                    // Place the part at its running offset along the
                    // concatenation axis; other axes align one to one.
                    let mut part_origin = out_origin.clone();
                    for (index, dim) in part_domain.labeled().iter().enumerate() {
                        part_origin[index] = if index == *axis { offset } else { dim.origin };
                    }
                    copy_region(
                        data.as_bytes(),
                        &BufferLayout {
                            shape: &part_shape,
                            origin: &part_origin,
                            element,
                            record: element,
                            offset_in_record: 0,
                        },
                        out.as_bytes_mut(),
                        &BufferLayout {
                            shape: &out_shape,
                            origin: &out_origin,
                            element,
                            record: element,
                            offset_in_record: 0,
                        },
                    );
                    offset += part_shape[*axis];
                }
                Ok(out)
            }
        }
    }

    /// Write a contiguous C-order buffer covering the view.
    ///
    /// # Errors
    /// Fails if the buffer length does not match the view or a chunk write
    /// fails.
    #[async_recursion]
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.byte_len() {
            return Err(Error::InvalidSlice(format!(
                "write buffer holds {} bytes, view covers {}",
                data.len(),
                self.byte_len()
            )));
        }
        match self {
            Self::Base(view) => write_view(view, data).await,
            Self::Concat {
                parts,
                axis,
                domain,
            } => {
                let element = self.element_size();
                let src_shape: Vec<Index> =
                    domain.labeled().iter().map(|dim| dim.size).collect();
                let src_origin: Vec<Index> =
                    domain.labeled().iter().map(|dim| dim.origin).collect();
                let mut offset = domain.dims()[*axis].origin;
                for part in parts {
                    let part_domain = part.domain();
                    let part_shape: Vec<Index> =
                        part_domain.labeled().iter().map(|dim| dim.size).collect();
                    let mut part_origin = src_origin.clone();
                    for (index, dim) in part_domain.labeled().iter().enumerate() {
                        part_origin[index] = if index == *axis { offset } else { dim.origin };
                    }
                    let positions: Index = part_shape.iter().product();
                    let mut block = vec![0u8; positions as usize * element];
                    copy_region(
                        data,
                        &BufferLayout {
                            shape: &src_shape,
                            origin: &src_origin,
                            element,
                            record: element,
                            offset_in_record: 0,
                        },
                        &mut block,
                        &BufferLayout {
                            shape: &part_shape,
                            origin: &part_origin,
                            element,
                            record: element,
                            offset_in_record: 0,
                        },
                    );
                    part.write(&block).await?;
                    offset += part_shape[*axis];
                }
                Ok(())
            }
        }
    }
}

async fn read_view(view: &ArrayView) -> Result<AlignedBytes> {
    let metadata = view.array.metadata();
    let (element, offset_in_record) = view.element_layout();
    let record = metadata.dtype.size();
    let fill_record = view.fill_record()?;
    let fill_element = fill_record[offset_in_record..offset_in_record + element].to_vec();

    let region_origin: Vec<Index> = view.domain.labeled().iter().map(|dim| dim.origin).collect();
    let region_shape: Vec<Index> = view.domain.labeled().iter().map(|dim| dim.size).collect();
    let positions: Index = region_shape.iter().product();
    let mut out = AlignedBytes::filled(positions as usize * element, &fill_element);
    if positions == 0 {
        return Ok(out);
    }

    let chunk_indices = chunks_in_region(&region_origin, &region_shape, &metadata.chunks);
    let concurrency = view.array.context.data_copy_concurrency();
    let chunks: Vec<(Vec<Index>, Option<Bytes>)> = futures::stream::iter(chunk_indices)
        .map(|indices| async move {
            let bytes = view
                .array
                .read_chunk(&indices)
                .await
                .map_err(Error::ReadFailed)?;
            Ok::<_, Error>((indices, bytes))
        })
        .buffer_unordered(concurrency)
        .try_collect()
        .await?;

    for (indices, bytes) in chunks {
        let Some(bytes) = bytes else { continue };
        let chunk_origin: Vec<Index> = indices
            .iter()
            .zip(&metadata.chunks)
            .map(|(&index, &chunk)| index * chunk)
            .collect();
        copy_region(
            &bytes,
            &BufferLayout {
                shape: &metadata.chunks,
                origin: &chunk_origin,
                element,
                record,
                offset_in_record,
            },
            out.as_bytes_mut(),
            &BufferLayout {
                shape: &region_shape,
                origin: &region_origin,
                element,
                record: element,
                offset_in_record: 0,
            },
        );
    }
    Ok(out)
}

async fn write_view(view: &ArrayView, data: &[u8]) -> Result<()> {
    let metadata = view.array.metadata();
    let (element, offset_in_record) = view.element_layout();
    let record = metadata.dtype.size();
    let fill_record = view.fill_record()?;
    let full_projection = element == record;

    let region_origin: Vec<Index> = view.domain.labeled().iter().map(|dim| dim.origin).collect();
    let region_shape: Vec<Index> = view.domain.labeled().iter().map(|dim| dim.size).collect();
    if region_shape.iter().product::<Index>() == 0 {
        return Ok(());
    }

    let chunk_indices = chunks_in_region(&region_origin, &region_shape, &metadata.chunks);
    let concurrency = view.array.context.data_copy_concurrency();
    futures::stream::iter(chunk_indices)
        .map(|indices| {
            let metadata = &metadata;
            let fill_record = &fill_record;
            let region_origin = &region_origin;
            let region_shape = &region_shape;
            async move {
                let chunk_origin: Vec<Index> = indices
                    .iter()
                    .zip(&metadata.chunks)
                    .map(|(&index, &chunk)| index * chunk)
                    .collect();
                let fully_covered = chunk_origin
                    .iter()
                    .zip(&metadata.chunks)
                    .zip(region_origin.iter().zip(region_shape))
                    .all(|((&start, &extent), (&origin, &size))| {
                        start >= origin && start + extent <= origin + size
                    });

                let mut chunk = if fully_covered && full_projection {
                    let mut chunk = vec![0u8; metadata.chunk_bytes()];
                    crate::dtype::fill_pattern(&mut chunk, fill_record);
                    chunk
                } else {
                    match view.array.read_chunk(&indices).await? {
                        Some(existing) => existing.to_vec(),
                        None => {
                            let mut chunk = vec![0u8; metadata.chunk_bytes()];
                            crate::dtype::fill_pattern(&mut chunk, fill_record);
                            chunk
                        }
                    }
                };

                copy_region(
                    data,
                    &BufferLayout {
                        shape: region_shape,
                        origin: region_origin,
                        element,
                        record: element,
                        offset_in_record: 0,
                    },
                    &mut chunk,
                    &BufferLayout {
                        shape: &metadata.chunks,
                        origin: &chunk_origin,
                        element,
                        record,
                        offset_in_record,
                    },
                );
                view.array.write_chunk(&indices, chunk).await
            }
        })
        .buffer_unordered(concurrency)
        .try_collect::<()>()
        .await
        .map_err(Error::from)
}

/// The C-order layout of one buffer participating in a region copy.
pub(crate) struct BufferLayout<'a> {
    /// The buffer's extent per axis, in positions.
    pub(crate) shape: &'a [Index],
    /// The global coordinates of the buffer's first position.
    pub(crate) origin: &'a [Index],
    /// Bytes copied per position.
    pub(crate) element: usize,
    /// Bytes stored per position.
    pub(crate) record: usize,
    /// Byte offset of the copied element within each stored record.
    pub(crate) offset_in_record: usize,
}

/// Copy the overlap of two C-order buffers, element by element.
pub(crate) fn copy_region(
    src: &[u8],
    src_layout: &BufferLayout,
    dst: &mut [u8],
    dst_layout: &BufferLayout,
) {
    let rank = src_layout.shape.len();
    debug_assert_eq!(rank, dst_layout.shape.len());
    if rank == 0 {
        return;
    }

    let mut begin = vec![0; rank];
    let mut end = vec![0; rank];
    for axis in 0..rank {
        begin[axis] = src_layout.origin[axis].max(dst_layout.origin[axis]);
        end[axis] = (src_layout.origin[axis] + src_layout.shape[axis])
            .min(dst_layout.origin[axis] + dst_layout.shape[axis]);
        if begin[axis] >= end[axis] {
            return;
        }
    }

    let src_strides = strides(src_layout.shape);
    let dst_strides = strides(dst_layout.shape);
    let width = src_layout.element.min(dst_layout.element);
    let contiguous = src_layout.element == src_layout.record
        && dst_layout.element == dst_layout.record
        && src_layout.record == dst_layout.record;

    let last = rank - 1;
    let run = (end[last] - begin[last]) as usize;
    let mut position = begin.clone();
    loop {
        let mut src_index = 0;
        let mut dst_index = 0;
        for axis in 0..rank {
            src_index += (position[axis] - src_layout.origin[axis]) * src_strides[axis];
            dst_index += (position[axis] - dst_layout.origin[axis]) * dst_strides[axis];
        }
        let src_base = src_index as usize;
        let dst_base = dst_index as usize;
        if contiguous {
            let bytes = run * width;
            let src_start = src_base * src_layout.record;
            let dst_start = dst_base * dst_layout.record;
            dst[dst_start..dst_start + bytes]
                .copy_from_slice(&src[src_start..src_start + bytes]);
        } else {
            for step in 0..run {
                let src_start =
                    (src_base + step) * src_layout.record + src_layout.offset_in_record;
                let dst_start =
                    (dst_base + step) * dst_layout.record + dst_layout.offset_in_record;
                dst[dst_start..dst_start + width]
                    .copy_from_slice(&src[src_start..src_start + width]);
            }
        }

        // Advance the odometer over every axis but the last.
        let mut axis = last;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            position[axis] += 1;
            if position[axis] < end[axis] {
                break;
            }
            position[axis] = begin[axis];
        }
    }
}

fn strides(shape: &[Index]) -> Vec<Index> {
    let mut strides = vec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// The grid indices of every chunk intersecting the region.
fn chunks_in_region(origin: &[Index], shape: &[Index], chunks: &[Index]) -> Vec<Vec<Index>> {
    if shape.iter().any(|&size| size == 0) {
        return Vec::new();
    }
    let first: Vec<Index> = origin
        .iter()
        .zip(chunks)
        .map(|(&start, &chunk)| start / chunk)
        .collect();
    let last: Vec<Index> = origin
        .iter()
        .zip(shape)
        .zip(chunks)
        .map(|((&start, &size), &chunk)| (start + size - 1) / chunk)
        .collect();
    let mut indices = Vec::new();
    let mut current = first.clone();
    loop {
        indices.push(current.clone());
        if !advance(&mut current, &first, &last) {
            break;
        }
    }
    indices
}

/// Advance `indices` one step through the inclusive box `[first, last]`.
/// Returns false once the box is exhausted.
fn advance(indices: &mut [Index], first: &[Index], last: &[Index]) -> bool {
    for axis in (0..indices.len()).rev() {
        if indices[axis] < last[axis] {
            indices[axis] += 1;
            return true;
        }
        indices[axis] = first[axis];
    }
    false
}
