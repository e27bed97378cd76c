//! Variables: typed, labeled handles over chunked backing stores.
//!
//! A [`Variable`] couples a backend array view with its name, optional long
//! name, axis labels, and editable [`UserAttributes`]. Reading materialises
//! the view into a [`VariableData`] buffer; writing stripes a buffer back
//! over the chunks.
//!
//! Slicing is label based and half open. Descriptors naming labels the
//! variable does not carry are silently ignored, which keeps one
//! descriptor list composable across heterogeneous variables. **A repeated
//! label concatenates**: when several descriptors name the same label,
//! each range is sliced independently and the pieces are joined along that
//! axis *in the order the descriptors were given* — out-of-order ranges
//! reorder the data. Ranges for a repeated label must be disjoint.
//!
//! Attribute edits go through [`Variable::update_attributes`] and are not
//! durable until [`Variable::publish_metadata`] (or the dataset-level
//! commit) is acknowledged; `was_updated` is true in between.

pub mod data;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::array::{
    ArrayStore, ArrayView, ChunkArray, Domain, Interval, OpenMode, ZarrayMetadata,
};
use crate::config::Context;
use crate::dtype::{DataType, Index};
use crate::error::{Error, Result, StorageError};
use crate::schema::BackendSpec;
use crate::stats::{AttributesHandle, HistogramElement, UserAttributes};
use crate::storage::{KvStoreSpec, TimestampedGeneration};

pub use data::{AllocateConstraint, VariableData};

/// The maximum number of descriptors one slice call accepts; longer lists
/// must be partitioned by the caller.
pub const MAX_SLICE_DESCRIPTORS: usize = 32;

/// The inert padding label: descriptors carrying it are ignored.
pub const INERT_SLICE_LABEL: &str = "__inert__";

/// The key of the `.zattrs` document below an array prefix.
pub const ZATTRS_KEY: &str = ".zattrs";

/// A half-open slice of one labeled axis: `[start, stop)` with a step.
///
/// The type parameter is the coordinate type: [`Index`] for index-space
/// slicing (`slice`/`isel`), a coordinate element type for value-space
/// slicing (`sel`). Only a step of 1 is supported.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeDescriptor<T = Index> {
    /// The axis label.
    pub label: String,
    /// The inclusive start.
    pub start: T,
    /// The exclusive stop.
    pub stop: T,
    /// The step; must be 1.
    pub step: Index,
}

impl<T> RangeDescriptor<T> {
    /// A descriptor with the default step of 1.
    pub fn new(label: impl Into<String>, start: T, stop: T) -> Self {
        Self {
            label: label.into(),
            start,
            stop,
            step: 1,
        }
    }
}

/// Selects every position whose coordinate equals `value` (`sel` only).
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDescriptor<T> {
    /// The coordinate (and axis) label.
    pub label: String,
    /// The coordinate value to match.
    pub value: T,
}

impl<T> ValueDescriptor<T> {
    /// A descriptor for one coordinate value.
    pub fn new(label: impl Into<String>, value: T) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Selects the positions of a set of coordinate values (`sel` only).
#[derive(Debug, Clone, PartialEq)]
pub struct ListDescriptor<T> {
    /// The coordinate (and axis) label.
    pub label: String,
    /// The coordinate values; each must exist, and repeats are rejected.
    pub values: Vec<T>,
}

impl<T> ListDescriptor<T> {
    /// A descriptor for a set of coordinate values.
    pub fn new(label: impl Into<String>, values: Vec<T>) -> Self {
        Self {
            label: label.into(),
            values,
        }
    }
}

/// A typed, labeled handle over a chunked backing store.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    long_name: String,
    dimension_names: Vec<String>,
    coordinates: Option<String>,
    units: Option<Value>,
    store: ArrayStore,
    attributes: Arc<AttributesHandle>,
    publish_pending: Arc<AtomicBool>,
    context: Context,
}

impl Variable {
    /// Open or create a variable from a backend spec.
    ///
    /// In create modes the backend array is created and the variable's
    /// `.zattrs` is written. In [`OpenMode::Open`] the stored array and
    /// attributes are loaded and checked against the spec's attributes.
    ///
    /// # Errors
    /// Fails when the array is absent (open), already exists (create), or
    /// the stored state conflicts with the spec.
    pub async fn open(spec: &BackendSpec, mode: OpenMode, context: &Context) -> Result<Self> {
        match mode {
            OpenMode::Open => {
                Self::open_existing(spec.kvstore.clone(), spec.field.as_deref(), Some(spec), context)
                    .await
            }
            OpenMode::Create | OpenMode::CreateClean => Self::create(spec, mode, context).await,
        }
    }

    /// Open an existing variable from its store location, optionally
    /// projecting one structured field.
    ///
    /// # Errors
    /// Fails when the array or its `.zattrs` is absent or malformed.
    pub async fn open_at(
        kv_spec: KvStoreSpec,
        field: Option<&str>,
        context: &Context,
    ) -> Result<Self> {
        Self::open_existing(kv_spec, field, None, context).await
    }

    async fn create(spec: &BackendSpec, mode: OpenMode, context: &Context) -> Result<Self> {
        let array = ChunkArray::create(
            spec.kvstore.clone(),
            spec.metadata.clone(),
            context.clone(),
            mode,
        )
        .await?;

        let user_attributes = match &spec.attributes.metadata {
            Some(metadata) => UserAttributes::from_variable_json(metadata)?,
            None => UserAttributes::default(),
        };
        let attributes = AttributesHandle::new(user_attributes);

        let variable = Self {
            name: spec.name().to_string(),
            long_name: spec.attributes.long_name.clone().unwrap_or_default(),
            dimension_names: spec.attributes.dimension_names.clone(),
            coordinates: spec.attributes.coordinates.clone(),
            units: spec
                .attributes
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.get("unitsV1"))
                .cloned(),
            store: ArrayStore::Base(ArrayView::new(array, &spec.attributes.dimension_names)?),
            attributes,
            publish_pending: Arc::new(AtomicBool::new(false)),
            context: context.clone(),
        };

        // The attributes written at creation are already durable.
        let written = variable.publish_metadata().await?;
        debug!(name = %variable.name, generation = %written.generation, "created variable");
        Ok(variable)
    }

    async fn open_existing(
        kv_spec: KvStoreSpec,
        field: Option<&str>,
        spec: Option<&BackendSpec>,
        context: &Context,
    ) -> Result<Self> {
        let array = ChunkArray::open(kv_spec.clone(), context.clone()).await?;
        let attrs_bytes = array
            .kv()
            .read(ZATTRS_KEY)
            .await?
            .ok_or_else(|| StorageError::KeyNotFound(format!("{}/{ZATTRS_KEY}", kv_spec.path)))?;
        let zattrs: Value =
            serde_json::from_slice(&attrs_bytes).map_err(StorageError::InvalidJSON)?;

        let dimension_names: Vec<String> = zattrs
            .get("_ARRAY_DIMENSIONS")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .ok_or_else(|| {
                Error::InvalidSchema(format!(
                    "variable {} has no _ARRAY_DIMENSIONS attribute",
                    kv_spec.stem()
                ))
            })?;

        let long_name = zattrs
            .get("long_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let coordinates = zattrs
            .get("coordinates")
            .and_then(Value::as_str)
            .filter(|coordinates| !coordinates.is_empty())
            .map(String::from);
        let units = zattrs.get("unitsV1").cloned();

        let mut editable = Map::new();
        if let Some(stats) = zattrs.get("statsV1") {
            editable.insert("statsV1".to_string(), stats.clone());
        }
        if let Some(attributes) = zattrs.get("attributes") {
            editable.insert("attributes".to_string(), attributes.clone());
        }
        let user_attributes = UserAttributes::from_variable_json(&Value::Object(editable))?;

        if let Some(spec) = spec {
            check_spec_consistency(spec, &array.metadata(), &zattrs)?;
        }

        let metadata = array.metadata();
        let store = match field {
            None | Some("") => ArrayStore::Base(ArrayView::new(array, &dimension_names)?),
            Some(field_name) => {
                let (index, _) = metadata.dtype.field_offset(field_name).ok_or_else(|| {
                    Error::UnknownField {
                        variable: kv_spec.stem().to_string(),
                        field: field_name.to_string(),
                    }
                })?;
                ArrayStore::Base(ArrayView::with_field(array, &dimension_names, index)?)
            }
        };

        Ok(Self {
            name: kv_spec.stem().to_string(),
            long_name,
            dimension_names,
            coordinates,
            units,
            store,
            attributes: AttributesHandle::new(user_attributes),
            publish_pending: Arc::new(AtomicBool::new(false)),
            context: context.clone(),
        })
    }

    /// The variable name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optional human-readable label; empty when absent.
    #[must_use]
    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    /// The space-separated auxiliary coordinate names, if any.
    #[must_use]
    pub fn coordinates(&self) -> Option<&str> {
        self.coordinates.as_deref()
    }

    /// The coordinate names as a list.
    #[must_use]
    pub fn coordinate_names(&self) -> Vec<String> {
        self.coordinates
            .as_deref()
            .map(|coordinates| {
                coordinates
                    .split(' ')
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The data type the variable exposes (the field's scalar type after
    /// field selection).
    #[must_use]
    pub fn dtype(&self) -> DataType {
        self.store.effective_dtype()
    }

    /// The number of axes, including the trailing byte axis of raw
    /// structured views.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.store.domain().rank()
    }

    /// The total number of samples (the product of the axis sizes).
    #[must_use]
    pub fn num_samples(&self) -> Index {
        self.store.domain().num_elements()
    }

    /// The labeled domain: labels, origins, and sizes.
    #[must_use]
    pub fn dimensions(&self) -> &Domain {
        self.store.domain()
    }

    /// The chunk shape recorded in the backend metadata.
    #[must_use]
    pub fn chunk_shape(&self) -> Vec<Index> {
        self.store.base_array().metadata().chunks
    }

    /// The full on-disk array shape recorded in the backend metadata.
    #[must_use]
    pub fn store_shape(&self) -> Vec<Index> {
        self.store.base_array().metadata().shape
    }

    /// The backend spec document for this variable's view.
    #[must_use]
    pub fn spec(&self) -> Value {
        self.store.spec_json()
    }

    /// The backend store view.
    #[must_use]
    pub fn store(&self) -> &ArrayStore {
        &self.store
    }

    /// The half-open intervals of the requested labels, or of every axis
    /// when none are given.
    ///
    /// # Errors
    /// Returns [`Error::UnknownDimension`] when labels were given but none
    /// matched.
    pub fn intervals(&self, labels: &[&str]) -> Result<Vec<Interval>> {
        let domain = self.store.domain();
        if labels.is_empty() {
            return Ok(domain.intervals());
        }
        let intervals: Vec<Interval> = labels
            .iter()
            .filter_map(|label| domain.interval(label))
            .collect();
        if intervals.is_empty() {
            return Err(Error::UnknownDimension(format!(
                "no requested label matches variable {}",
                self.name
            )));
        }
        Ok(intervals)
    }

    /// Slice along labeled axes (half-open, clamped to the domain).
    ///
    /// Unknown labels are ignored; a repeated label concatenates its
    /// disjoint ranges in descriptor order (see the module docs).
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] for `start > stop`, a step other
    /// than 1, overlapping repeated-label ranges, an empty descriptor
    /// list, or more than [`MAX_SLICE_DESCRIPTORS`] descriptors.
    pub fn slice(&self, descriptors: &[RangeDescriptor]) -> Result<Self> {
        let store = slice_store(&self.store, descriptors)?;
        Ok(Self {
            store,
            ..self.clone()
        })
    }

    /// Read the variable into memory.
    ///
    /// # Errors
    /// Returns [`Error::ReadFailed`] if any chunk read fails.
    pub async fn read(&self) -> Result<VariableData> {
        let buffer = self.store.read().await?;
        Ok(VariableData::from_parts(
            self.name.clone(),
            self.long_name.clone(),
            self.metadata_json(),
            self.dtype(),
            self.store.domain().clone(),
            buffer,
        ))
    }

    /// Write an in-memory buffer back to the backing store.
    ///
    /// # Errors
    /// Returns [`Error::DtypeMismatch`] when the buffer's dtype differs,
    /// or [`Error::InvalidSlice`] when the shapes are incompatible.
    pub async fn write(&self, data: &VariableData) -> Result<()> {
        if data.dtype() != self.dtype() {
            return Err(Error::DtypeMismatch {
                expected: self.dtype(),
                actual: data.dtype(),
            });
        }
        let domain = self.store.domain();
        if data.dimensions().shape() != domain.shape() {
            return Err(Error::InvalidSlice(format!(
                "buffer shape {:?} does not match variable shape {:?}",
                data.dimensions().shape(),
                domain.shape()
            )));
        }
        let bytes = data.contiguous_bytes();
        self.store.write(&bytes).await
    }

    /// Re-open the backing store projecting one field of a structured
    /// dtype. An empty `field_name` yields the raw-bytes view.
    ///
    /// The returned variable spans the full stored domain.
    ///
    /// # Errors
    /// Returns [`Error::NotStructured`] for scalar variables and
    /// [`Error::UnknownField`] for unknown field names.
    pub async fn select_field(&self, field_name: &str) -> Result<Self> {
        let array_dtype = self.store.array_dtype();
        if array_dtype.fields().is_none() {
            return Err(Error::NotStructured(self.name.clone()));
        }
        if !field_name.is_empty() && array_dtype.field_offset(field_name).is_none() {
            return Err(Error::UnknownField {
                variable: self.name.clone(),
                field: field_name.to_string(),
            });
        }
        let kv_spec = self.store.base_array().kv_spec().clone();
        let field = if field_name.is_empty() {
            None
        } else {
            Some(field_name)
        };
        let mut selected = Self::open_existing(kv_spec, field, None, &self.context).await?;
        // The selected view shares this variable's editable metadata.
        selected.attributes = self.attributes.clone();
        selected.publish_pending = self.publish_pending.clone();
        selected.long_name = self.long_name.clone();
        selected.coordinates = self.coordinates.clone();
        selected.units = self.units.clone();
        Ok(selected)
    }

    /// Replace the variable's [`UserAttributes`] from a JSON document,
    /// parsing histograms with element type `T`.
    ///
    /// The update is not durable until the next metadata publication.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSchema`] when the document is malformed;
    /// the current value is left untouched.
    pub fn update_attributes<T: HistogramElement>(&self, document: &Value) -> Result<()> {
        let parsed = UserAttributes::from_json_typed(document, T::DTYPE)?;
        self.attributes.replace(parsed);
        Ok(())
    }

    /// The current [`UserAttributes`] value.
    #[must_use]
    pub fn attributes(&self) -> Arc<UserAttributes> {
        self.attributes.load()
    }

    /// The version token of the attributes; changes iff an update was
    /// performed.
    #[must_use]
    pub fn attributes_version(&self) -> u64 {
        self.attributes.version()
    }

    /// True between an attributes update and the next acknowledged
    /// publication.
    #[must_use]
    pub fn was_updated(&self) -> bool {
        self.attributes.was_updated()
    }

    /// Mark the variable as requiring republication regardless of
    /// attribute changes (used after on-disk resizes).
    pub fn set_publish_pending(&self, pending: bool) {
        self.publish_pending.store(pending, Ordering::Release);
    }

    /// True when the next commit must republish this variable.
    #[must_use]
    pub fn should_publish(&self) -> bool {
        self.publish_pending.load(Ordering::Acquire) || self.was_updated()
    }

    /// The `.zattrs` document in its published shape.
    #[must_use]
    pub fn zattrs_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            "_ARRAY_DIMENSIONS".to_string(),
            Value::Array(
                self.dimension_names
                    .iter()
                    .map(|label| Value::String(label.clone()))
                    .collect(),
            ),
        );
        if !self.long_name.is_empty() {
            object.insert(
                "long_name".to_string(),
                Value::String(self.long_name.clone()),
            );
        }
        if let Some(coordinates) = &self.coordinates {
            object.insert(
                "coordinates".to_string(),
                Value::String(coordinates.clone()),
            );
        }
        if let Some(units) = &self.units {
            object.insert("unitsV1".to_string(), units.clone());
        }
        let editable = self.attributes.load().to_json();
        if let Value::Object(editable) = editable {
            for (key, value) in editable {
                object.insert(key, value);
            }
        }
        Value::Object(object)
    }

    /// The variable's metadata document: dimension names, optional long
    /// name and coordinates, and the nested editable metadata.
    #[must_use]
    pub fn metadata_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            "dimension_names".to_string(),
            Value::Array(
                self.dimension_names
                    .iter()
                    .map(|label| Value::String(label.clone()))
                    .collect(),
            ),
        );
        if !self.long_name.is_empty() {
            object.insert(
                "long_name".to_string(),
                Value::String(self.long_name.clone()),
            );
        }
        if let Some(coordinates) = &self.coordinates {
            object.insert(
                "coordinates".to_string(),
                Value::String(coordinates.clone()),
            );
        }
        let mut nested = Map::new();
        if let Some(units) = &self.units {
            nested.insert("unitsV1".to_string(), units.clone());
        }
        if let Value::Object(editable) = self.attributes.load().to_json() {
            for (key, value) in editable {
                nested.insert(key, value);
            }
        }
        if !nested.is_empty() {
            object.insert("metadata".to_string(), Value::Object(nested));
        }
        Value::Object(object)
    }

    /// Serialise the current metadata to the variable's `.zattrs`,
    /// clearing the dirty state once the backend acknowledges.
    ///
    /// # Errors
    /// Returns the storage failure; the variable stays dirty.
    pub async fn publish_metadata(&self) -> Result<TimestampedGeneration> {
        let version = self.attributes.version();
        let document = serde_json::to_vec_pretty(&self.zattrs_json())
            .map_err(StorageError::InvalidJSON)?;
        let written = self
            .store
            .base_array()
            .kv()
            .write(ZATTRS_KEY, document.into())
            .await?;
        self.attributes.mark_published(version);
        self.publish_pending.store(false, Ordering::Release);
        debug!(name = %self.name, generation = %written.generation, "published variable metadata");
        Ok(written)
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}\t{}", self.name, self.store.domain())?;
        write!(f, "{}\trank {}", self.dtype(), self.rank())
    }
}

/// Apply a descriptor list to a store view (shared by variables and
/// datasets).
pub(crate) fn slice_store(
    store: &ArrayStore,
    descriptors: &[RangeDescriptor],
) -> Result<ArrayStore> {
    if descriptors.is_empty() {
        return Err(Error::InvalidSlice("no slice descriptors provided".to_string()));
    }
    if descriptors.len() > MAX_SLICE_DESCRIPTORS {
        return Err(Error::InvalidSlice(format!(
            "too many slice descriptors: the maximum is {MAX_SLICE_DESCRIPTORS} but \
             {} were provided; partition the request",
            descriptors.len()
        )));
    }

    // Validate and clamp every descriptor first so errors surface even for
    // labels this view does not carry.
    let mut clamped: Vec<RangeDescriptor> = Vec::new();
    for descriptor in descriptors {
        if descriptor.step != 1 {
            return Err(Error::InvalidSlice(format!(
                "slice step must be 1, got {} for {}",
                descriptor.step, descriptor.label
            )));
        }
        if descriptor.start > descriptor.stop {
            return Err(Error::InvalidSlice(format!(
                "slice descriptor for {} is invalid: start={} > stop={}",
                descriptor.label, descriptor.start, descriptor.stop
            )));
        }
        if descriptor.label == INERT_SLICE_LABEL {
            continue;
        }
        let Some(axis) = store.domain().axis(&descriptor.label) else {
            continue;
        };
        let dim = &store.domain().dims()[axis];
        let start = descriptor.start.max(dim.origin);
        let stop = descriptor.stop.min(dim.end());
        if start > stop {
            return Err(Error::InvalidSlice(format!(
                "slice [{}, {}) lies outside the domain of {} [{}, {})",
                descriptor.start,
                descriptor.stop,
                descriptor.label,
                dim.origin,
                dim.end()
            )));
        }
        clamped.push(RangeDescriptor {
            label: descriptor.label.clone(),
            start,
            stop,
            step: 1,
        });
    }

    // Group by label, preserving first-appearance order.
    let mut groups: Vec<(String, Vec<RangeDescriptor>)> = Vec::new();
    for descriptor in clamped {
        match groups
            .iter_mut()
            .find(|(label, _)| *label == descriptor.label)
        {
            Some((_, group)) => group.push(descriptor),
            None => groups.push((descriptor.label.clone(), vec![descriptor])),
        }
    }

    let mut result = store.clone();
    // Single-range labels narrow in place; repeated labels concatenate.
    for (label, group) in &groups {
        if group.len() == 1 {
            result = result.restrict(label, group[0].start, group[0].stop)?;
        }
    }
    for (label, group) in &groups {
        if group.len() == 1 {
            continue;
        }
        for (index, descriptor) in group.iter().enumerate() {
            for other in &group[index + 1..] {
                if descriptor.start < other.stop && other.start < descriptor.stop {
                    return Err(Error::InvalidSlice(format!(
                        "repeated-label ranges for {label} must be disjoint: \
                         [{}, {}) overlaps [{}, {})",
                        descriptor.start, descriptor.stop, other.start, other.stop
                    )));
                }
            }
        }
        let parts = group
            .iter()
            .map(|descriptor| result.restrict(label, descriptor.start, descriptor.stop))
            .collect::<Result<Vec<_>>>()?;
        result = ArrayStore::concat(parts, label)?;
    }
    Ok(result)
}

fn check_spec_consistency(
    spec: &BackendSpec,
    stored: &ZarrayMetadata,
    zattrs: &Value,
) -> Result<()> {
    if spec.metadata.shape != stored.shape {
        return Err(Error::InvalidSchema(format!(
            "conflicting values for field shape: expected {:?}, but got {:?}",
            spec.metadata.shape, stored.shape
        )));
    }
    if spec.metadata.dtype != stored.dtype {
        return Err(Error::InvalidSchema(format!(
            "conflicting values for field dtype: expected {}, but got {}",
            spec.metadata.dtype, stored.dtype
        )));
    }
    let stored_dimensions = zattrs.get("_ARRAY_DIMENSIONS").and_then(Value::as_array);
    let expected: Vec<Value> = spec
        .attributes
        .dimension_names
        .iter()
        .map(|label| Value::String(label.clone()))
        .collect();
    if stored_dimensions != Some(&expected) {
        return Err(Error::InvalidSchema(format!(
            "conflicting values for field dimension_names: expected {expected:?}, \
             but got {stored_dimensions:?}"
        )));
    }
    if let Some(long_name) = &spec.attributes.long_name {
        let stored_long_name = zattrs.get("long_name").and_then(Value::as_str);
        if stored_long_name != Some(long_name.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "conflicting values for field long_name: expected {long_name}, \
                 but got {stored_long_name:?}"
            )));
        }
    }
    // The editable metadata must match the stored values, ignoring
    // chunkGrid (never serialised).
    if let Some(metadata) = &spec.attributes.metadata {
        if let Some(object) = metadata.as_object() {
            for (key, value) in object {
                if key == "chunkGrid" {
                    continue;
                }
                match zattrs.get(key) {
                    Some(stored_value) if stored_value == value => {}
                    Some(stored_value) => {
                        return Err(Error::InvalidSchema(format!(
                            "conflicting values for field {key}: expected {value}, \
                             but got {stored_value}"
                        )))
                    }
                    None => {
                        return Err(Error::InvalidSchema(format!(
                            "field not found in stored attributes: {key}"
                        )))
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::construct;
    use serde_json::json;

    fn memory_path(tag: &str) -> String {
        format!(
            "memory://variable-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    fn toy_spec() -> Value {
        json!({
            "metadata": {"name": "toy", "apiVersion": "1.0.0", "createdOn": "2024-08-31T12:00:00Z"},
            "variables": [
                {
                    "name": "velocity",
                    "dataType": "float32",
                    "longName": "Stacking velocity",
                    "dimensions": [
                        {"name": "inline", "size": 100},
                        {"name": "crossline", "size": 200}
                    ],
                    "metadata": {
                        "chunkGrid": {"name": "regular", "configuration": {"chunkShape": [50, 50]}},
                        "unitsV1": {"speed": "m/s"}
                    }
                },
                {
                    "name": "inline",
                    "dataType": "uint32",
                    "dimensions": [{"name": "inline", "size": 100}]
                },
                {
                    "name": "crossline",
                    "dataType": "uint32",
                    "dimensions": [{"name": "crossline", "size": 200}]
                }
            ]
        })
    }

    async fn create_velocity(tag: &str) -> (Variable, BackendSpec) {
        let (_, specs) = construct(&toy_spec(), &memory_path(tag)).unwrap();
        let spec = specs
            .iter()
            .find(|spec| spec.name() == "velocity")
            .unwrap()
            .clone();
        let variable = Variable::open(&spec, OpenMode::Create, &Context::default())
            .await
            .unwrap();
        (variable, spec)
    }

    #[tokio::test]
    async fn create_writes_zattrs() {
        let (variable, _) = create_velocity("zattrs").await;
        let zattrs = variable.zattrs_json();
        assert_eq!(zattrs["_ARRAY_DIMENSIONS"], json!(["inline", "crossline"]));
        assert_eq!(zattrs["long_name"], "Stacking velocity");
        assert_eq!(zattrs["unitsV1"], json!({"speed": "m/s"}));

        let stored = variable
            .store()
            .base_array()
            .kv()
            .read(ZATTRS_KEY)
            .await
            .unwrap()
            .unwrap();
        let stored: Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(stored, zattrs);
    }

    #[tokio::test]
    async fn reopen_round_trips_metadata() {
        let (variable, spec) = create_velocity("reopen").await;
        let reopened = Variable::open(&spec, OpenMode::Open, &Context::default())
            .await
            .unwrap();
        assert_eq!(reopened.name(), "velocity");
        assert_eq!(reopened.long_name(), "Stacking velocity");
        assert_eq!(reopened.dimensions(), variable.dimensions());
        assert_eq!(reopened.dtype(), variable.dtype());
        assert_eq!(reopened.zattrs_json(), variable.zattrs_json());
    }

    #[tokio::test]
    async fn open_missing_fails() {
        let (_, specs) = construct(&toy_spec(), &memory_path("missing")).unwrap();
        let err = Variable::open(&specs[0], OpenMode::Open, &Context::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendError(_)));
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let (_, specs) = construct(&toy_spec(), &memory_path("twice")).unwrap();
        Variable::open(&specs[0], OpenMode::Create, &Context::default())
            .await
            .unwrap();
        assert!(
            Variable::open(&specs[0], OpenMode::Create, &Context::default())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn slice_clamps_to_domain() {
        let (variable, _) = create_velocity("clamp").await;
        let sliced = variable
            .slice(&[RangeDescriptor::new("inline", 90, 150)])
            .unwrap();
        let interval = sliced.intervals(&["inline"]).unwrap()[0].clone();
        assert_eq!(interval.inclusive_min, 90);
        assert_eq!(interval.exclusive_max, 100);
        // Untouched axes stay intact.
        let crossline = sliced.intervals(&["crossline"]).unwrap()[0].clone();
        assert_eq!(crossline.exclusive_max, 200);
    }

    #[tokio::test]
    async fn slice_rejects_reversed_and_stepped() {
        let (variable, _) = create_velocity("reject").await;
        assert!(matches!(
            variable.slice(&[RangeDescriptor::new("inline", 10, 5)]),
            Err(Error::InvalidSlice(_))
        ));
        let mut descriptor = RangeDescriptor::new("inline", 0, 5);
        descriptor.step = 2;
        assert!(matches!(
            variable.slice(&[descriptor]),
            Err(Error::InvalidSlice(_))
        ));
    }

    #[tokio::test]
    async fn slice_outside_domain_fails() {
        let (variable, _) = create_velocity("outside").await;
        assert!(matches!(
            variable.slice(&[RangeDescriptor::new("inline", 200, 300)]),
            Err(Error::InvalidSlice(_))
        ));
    }

    #[tokio::test]
    async fn unknown_labels_ignored() {
        let (variable, _) = create_velocity("unknown").await;
        let sliced = variable
            .slice(&[
                RangeDescriptor::new("depth", 0, 1),
                RangeDescriptor::new("inline", 0, 10),
            ])
            .unwrap();
        assert_eq!(sliced.dimensions().interval("inline").unwrap().exclusive_max, 10);
    }

    #[tokio::test]
    async fn inert_label_ignored() {
        let (variable, _) = create_velocity("inert").await;
        let sliced = variable
            .slice(&[RangeDescriptor::new(INERT_SLICE_LABEL, 0, 1)])
            .unwrap();
        assert_eq!(sliced.dimensions(), variable.dimensions());
    }

    #[tokio::test]
    async fn too_many_descriptors_rejected() {
        let (variable, _) = create_velocity("many").await;
        let descriptors: Vec<RangeDescriptor> = (0..MAX_SLICE_DESCRIPTORS + 1)
            .map(|_| RangeDescriptor::new("inline", 0, 1))
            .collect();
        assert!(matches!(
            variable.slice(&descriptors),
            Err(Error::InvalidSlice(_))
        ));
    }

    #[tokio::test]
    async fn repeated_label_concatenates() {
        let (variable, _) = create_velocity("repeat").await;
        let sliced = variable
            .slice(&[
                RangeDescriptor::new("inline", 0, 5),
                RangeDescriptor::new("inline", 5, 11),
            ])
            .unwrap();
        let interval = sliced.dimensions().interval("inline").unwrap();
        assert_eq!(interval.exclusive_max - interval.inclusive_min, 11);
        assert_eq!(
            sliced.dimensions().interval("crossline").unwrap().exclusive_max,
            200
        );
    }

    #[tokio::test]
    async fn repeated_label_overlap_rejected() {
        let (variable, _) = create_velocity("overlap").await;
        assert!(matches!(
            variable.slice(&[
                RangeDescriptor::new("inline", 0, 6),
                RangeDescriptor::new("inline", 5, 11),
            ]),
            Err(Error::InvalidSlice(_))
        ));
    }

    #[tokio::test]
    async fn update_and_publish_cycle() {
        let (variable, _) = create_velocity("publish").await;
        assert!(!variable.was_updated());
        let before = variable.attributes_version();

        variable
            .update_attributes::<f32>(&json!({"attributes": {"qc": "passed"}}))
            .unwrap();
        assert!(variable.was_updated());
        assert_ne!(variable.attributes_version(), before);

        variable.publish_metadata().await.unwrap();
        assert!(!variable.was_updated());

        let stored = variable
            .store()
            .base_array()
            .kv()
            .read(ZATTRS_KEY)
            .await
            .unwrap()
            .unwrap();
        let stored: Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(stored["attributes"]["qc"], "passed");
    }

    #[tokio::test]
    async fn update_failure_keeps_value() {
        let (variable, _) = create_velocity("badupdate").await;
        variable
            .update_attributes::<f32>(&json!({"attributes": {"k": 1}}))
            .unwrap();
        let version = variable.attributes_version();
        assert!(variable
            .update_attributes::<f32>(&json!({"statsV1": {"count": 1}}))
            .is_err());
        assert_eq!(variable.attributes_version(), version);
        assert_eq!(variable.attributes().attributes().get("k"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn write_rejects_dtype_mismatch() {
        use crate::dtype::{DataType, ScalarType};
        let (variable, _) = create_velocity("dtypemismatch").await;
        let wrong = VariableData::filled(
            "velocity".to_string(),
            String::new(),
            json!({}),
            DataType::Scalar(ScalarType::UInt32),
            variable.dimensions().clone(),
        );
        assert!(matches!(
            variable.write(&wrong).await,
            Err(Error::DtypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn from_variable_allocates_fill_values() {
        let (variable, _) = create_velocity("fromvar").await;
        let data = VariableData::from_variable(&variable);
        assert_eq!(data.dtype(), variable.dtype());
        assert_eq!(data.dimensions(), variable.dimensions());
        // float32 buffers are value-initialised to NaN.
        assert!(data
            .as_slice::<f32>()
            .unwrap()
            .iter()
            .all(|value| value.is_nan()));
    }

    #[tokio::test]
    async fn select_field_on_scalar_fails() {
        let (variable, _) = create_velocity("notstruct").await;
        assert!(matches!(
            variable.select_field("cdp-x").await,
            Err(Error::NotStructured(_))
        ));
    }

    #[tokio::test]
    async fn num_samples_and_shapes() {
        let (variable, _) = create_velocity("samples").await;
        assert_eq!(variable.num_samples(), 100 * 200);
        assert_eq!(variable.chunk_shape(), vec![50, 50]);
        assert_eq!(variable.store_shape(), vec![100, 200]);
        assert_eq!(variable.rank(), 2);
    }
}
