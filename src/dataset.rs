//! Datasets: collections of variables sharing a labeled index space.
//!
//! A [`Dataset`] aggregates a metadata document, a [`VariableCollection`],
//! a coordinate map (variable name → ordered coordinate-variable names),
//! and the labeled union domain of every variable.
//!
//! Datasets are created from a specification with [`Dataset::from_json`]
//! or opened from consolidated metadata with [`Dataset::open`]. Slicing is
//! index based with [`Dataset::isel`] or coordinate-value based with
//! [`Dataset::sel`], which resolves values against the coordinate
//! variables and then delegates to `isel`.
//!
//! A dataset value can be shared across tasks for read-only use; attribute
//! updates, field selection, and [`Dataset::commit_metadata`] require
//! exclusive access.

pub mod consolidated;

use std::collections::BTreeMap;

use futures::future::try_join_all;
use serde_json::Value;
use tracing::debug;

use crate::array::{Dimension, Domain, Interval, OpenMode};
use crate::collection::VariableCollection;
use crate::config::Context;
use crate::dtype::{Element, Index};
use crate::error::{Error, Result};
use crate::schema::{construct, BackendSpec};
use crate::storage::KvStoreSpec;
use crate::variable::{
    ListDescriptor, RangeDescriptor, ValueDescriptor, Variable, MAX_SLICE_DESCRIPTORS,
};

pub use consolidated::ConsolidatedEntry;

/// A coordinate-value selection descriptor for [`Dataset::sel`].
#[derive(Debug, Clone, PartialEq, derive_more::From)]
pub enum SelDescriptor<T> {
    /// Every position whose coordinate equals a value.
    Value(ValueDescriptor<T>),
    /// The positions of a set of coordinate values.
    List(ListDescriptor<T>),
    /// The positions whose coordinate lies in `[start, stop)`.
    Range(RangeDescriptor<T>),
}

impl<T> SelDescriptor<T> {
    fn label(&self) -> &str {
        match self {
            Self::Value(descriptor) => &descriptor.label,
            Self::List(descriptor) => &descriptor.label,
            Self::Range(descriptor) => &descriptor.label,
        }
    }
}

/// A collection of variables sharing a common labeled grid.
#[derive(Debug, Clone)]
pub struct Dataset {
    metadata: Value,
    variables: VariableCollection,
    coordinates: BTreeMap<String, Vec<String>>,
    domain: Domain,
    root: KvStoreSpec,
    context: Context,
}

impl Dataset {
    /// Construct a dataset from a specification document: the factory
    /// validates and expands the spec, every variable is opened in
    /// parallel, and in create modes the consolidated metadata is written.
    ///
    /// # Errors
    /// Returns the first validation, expansion, or open failure.
    pub async fn from_json(
        spec: &Value,
        path: &str,
        mode: OpenMode,
        context: &Context,
    ) -> Result<Self> {
        let (metadata, variable_specs) = construct(spec, path)?;
        let root = KvStoreSpec::from_path(path)?;
        Self::open_with_specs(metadata, &variable_specs, root, mode, context).await
    }

    /// Open an existing dataset from its consolidated metadata.
    ///
    /// # Errors
    /// Fails when the path holds no `.zmetadata`, the metadata is legacy
    /// v0 ([`Error::LegacyVersion`]), or any variable fails to open.
    pub async fn open(path: &str, context: &Context) -> Result<Self> {
        let root = KvStoreSpec::from_path(path)?;
        let store = root.open().await?;
        let (metadata, names) = consolidated::read_consolidated(&store).await?;
        let variables = try_join_all(
            names
                .iter()
                .map(|name| Variable::open_at(root.child(name), None, context)),
        )
        .await?;
        debug!(path, variables = variables.len(), "opened dataset");
        Self::assemble(metadata, variables, root, context.clone())
    }

    /// Open a dataset from already-expanded variable specs, as produced by
    /// the factory.
    ///
    /// In create modes the backend arrays are created and the consolidated
    /// metadata is written; in [`OpenMode::Open`] the stored variables are
    /// checked against the specs.
    ///
    /// # Errors
    /// Fails on any variable open/create failure, or in
    /// [`OpenMode::Create`] when the dataset already exists.
    pub async fn open_with_specs(
        metadata: Value,
        variable_specs: &[BackendSpec],
        root: KvStoreSpec,
        mode: OpenMode,
        context: &Context,
    ) -> Result<Self> {
        if metadata.get("api_version").is_some() {
            return Err(Error::LegacyVersion);
        }
        let store = root.open().await?;
        let variable_mode = match mode {
            OpenMode::Open => OpenMode::Open,
            OpenMode::Create => {
                if store.read(consolidated::ZMETADATA_KEY).await?.is_some() {
                    return Err(Error::BackendError(crate::error::StorageError::Other(
                        format!("dataset already exists at {}", root.path),
                    )));
                }
                OpenMode::Create
            }
            OpenMode::CreateClean => {
                store.delete_prefix("").await?;
                OpenMode::Create
            }
        };

        let variables = try_join_all(
            variable_specs
                .iter()
                .map(|spec| Variable::open(spec, variable_mode, context)),
        )
        .await?;

        if matches!(mode, OpenMode::Create | OpenMode::CreateClean) {
            let entries: Vec<ConsolidatedEntry> = variables
                .iter()
                .map(|variable| ConsolidatedEntry {
                    name: variable.name().to_string(),
                    zarray: variable.store().base_array().metadata().to_json(),
                    zattrs: variable.zattrs_json(),
                })
                .collect();
            consolidated::write_consolidated(&store, &metadata, &entries).await?;
        }

        Self::assemble(metadata, variables, root, context.clone())
    }

    fn assemble(
        metadata: Value,
        variables: Vec<Variable>,
        root: KvStoreSpec,
        context: Context,
    ) -> Result<Self> {
        if metadata.get("api_version").is_some() {
            return Err(Error::LegacyVersion);
        }
        let mut collection = VariableCollection::new();
        let mut coordinates = BTreeMap::new();
        for variable in variables {
            let coordinate_names = variable.coordinate_names();
            if !coordinate_names.is_empty() {
                coordinates.insert(variable.name().to_string(), coordinate_names);
            }
            collection.add(variable);
        }
        let domain = union_domain(&collection)?;
        Ok(Self {
            metadata,
            variables: collection,
            coordinates,
            domain,
            root,
            context,
        })
    }

    /// The dataset's metadata document (the root `.zattrs`).
    #[must_use]
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// The variables.
    #[must_use]
    pub fn variables(&self) -> &VariableCollection {
        &self.variables
    }

    /// The coordinate map: variable name → ordered coordinate names.
    #[must_use]
    pub fn coordinates(&self) -> &BTreeMap<String, Vec<String>> {
        &self.coordinates
    }

    /// The labeled union domain of every variable.
    #[must_use]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Look up a variable, checking its element type.
    ///
    /// # Errors
    /// Returns [`Error::VariableNotFound`] or [`Error::TypeMismatch`].
    pub fn get_variable<T: Element>(&self, name: &str) -> Result<Variable> {
        self.variables.get::<T>(name)
    }

    /// The half-open intervals of the requested labels, or of the whole
    /// domain when none are given.
    ///
    /// # Errors
    /// Returns [`Error::UnknownDimension`] when labels were given but none
    /// matched.
    pub fn intervals(&self, labels: &[&str]) -> Result<Vec<Interval>> {
        if labels.is_empty() {
            return Ok(self.domain.intervals());
        }
        let intervals: Vec<Interval> = labels
            .iter()
            .filter_map(|label| self.domain.interval(label))
            .collect();
        if intervals.is_empty() {
            return Err(Error::UnknownDimension(
                "no requested label matches the dataset domain".to_string(),
            ));
        }
        Ok(intervals)
    }

    /// Index-space slicing: forward every descriptor to every variable
    /// (variables ignore labels they do not carry) and recompute the union
    /// domain.
    ///
    /// Descriptor lists longer than the per-slice bound are partitioned
    /// internally, keeping same-label descriptors together.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] for invalid descriptors and
    /// [`Error::InconsistentDomain`] when the sliced variables disagree on
    /// a shared label.
    pub fn isel(&self, descriptors: &[RangeDescriptor]) -> Result<Self> {
        let batches = partition_descriptors(descriptors)?;
        let mut collection = VariableCollection::new();
        for (_, variable) in self.variables.iter() {
            let mut sliced = variable.clone();
            for batch in &batches {
                sliced = sliced.slice(batch)?;
            }
            collection.add(sliced);
        }
        let domain = union_domain(&collection)?;
        Ok(Self {
            metadata: self.metadata.clone(),
            variables: collection,
            coordinates: self.coordinates.clone(),
            domain,
            root: self.root.clone(),
            context: self.context.clone(),
        })
    }

    /// Coordinate-value slicing: resolve each descriptor against the
    /// coordinate variable carrying its label, then delegate to
    /// [`Dataset::isel`].
    ///
    /// A value that occurs at several non-adjacent positions selects all
    /// of them, concatenated in ascending index order.
    ///
    /// # Errors
    /// - [`Error::RepeatedSelLabel`] when a label appears twice.
    /// - [`Error::MissingCoordinate`] when a requested value is absent.
    /// - [`Error::RepeatedSelValue`] for repeated list values.
    /// - [`Error::InvalidRange`] for reversed ranges or a step other
    ///   than 1.
    /// - [`Error::RepeatedCoordinate`] when a range boundary matches
    ///   non-contiguous positions.
    pub async fn sel<T>(&self, descriptors: &[SelDescriptor<T>]) -> Result<Self>
    where
        T: Element + PartialOrd,
    {
        for (index, descriptor) in descriptors.iter().enumerate() {
            if descriptors[..index]
                .iter()
                .any(|other| other.label() == descriptor.label())
            {
                return Err(Error::RepeatedSelLabel(descriptor.label().to_string()));
            }
        }

        let mut ranges: Vec<RangeDescriptor> = Vec::new();
        for descriptor in descriptors {
            let label = descriptor.label();
            let coordinate = self
                .variables
                .at(label)
                .map_err(|_| Error::UnknownCoordinate(label.to_string()))?;
            if coordinate.dimensions().labeled().len() != 1 {
                return Err(Error::InvalidRange(format!(
                    "coordinate {label} is not one-dimensional"
                )));
            }
            let data = coordinate.read().await?;
            let values = data.as_slice::<T>()?;
            let origin = coordinate.dimensions().dims()[0].origin;

            let positions: Vec<Index> = match descriptor {
                SelDescriptor::Value(value_descriptor) => {
                    let matches = positions_of(values, origin, |value| {
                        *value == value_descriptor.value
                    });
                    if matches.is_empty() {
                        return Err(Error::MissingCoordinate(format!(
                            "no position of {label} holds the requested value"
                        )));
                    }
                    matches
                }
                SelDescriptor::List(list_descriptor) => {
                    for (index, value) in list_descriptor.values.iter().enumerate() {
                        if list_descriptor.values[..index].contains(value) {
                            return Err(Error::RepeatedSelValue(label.to_string()));
                        }
                    }
                    let mut matches = Vec::new();
                    for value in &list_descriptor.values {
                        let found = positions_of(values, origin, |candidate| candidate == value);
                        if found.is_empty() {
                            return Err(Error::MissingCoordinate(format!(
                                "a requested value is absent from coordinate {label}"
                            )));
                        }
                        matches.extend(found);
                    }
                    matches.sort_unstable();
                    matches.dedup();
                    matches
                }
                SelDescriptor::Range(range_descriptor) => {
                    if range_descriptor.step != 1 {
                        return Err(Error::InvalidRange(format!(
                            "sel step must be 1, got {}",
                            range_descriptor.step
                        )));
                    }
                    if range_descriptor.start > range_descriptor.stop {
                        return Err(Error::InvalidRange(format!(
                            "sel range for {label} has start > stop"
                        )));
                    }
                    let matches = positions_of(values, origin, |value| {
                        *value >= range_descriptor.start && *value < range_descriptor.stop
                    });
                    let contiguous = matches
                        .windows(2)
                        .all(|pair| pair[1] == pair[0] + 1);
                    if !contiguous {
                        return Err(Error::RepeatedCoordinate(format!(
                            "range over coordinate {label} selects non-contiguous positions"
                        )));
                    }
                    matches
                }
            };

            match runs(&positions) {
                Some(label_runs) => {
                    for (start, stop) in label_runs {
                        ranges.push(RangeDescriptor::new(label.to_string(), start, stop));
                    }
                }
                None => {
                    // Empty range selection: a zero-size slice at the
                    // coordinate origin.
                    ranges.push(RangeDescriptor::new(label.to_string(), origin, origin));
                }
            }
        }

        self.isel(&ranges)
    }

    /// Project a single variable together with its dimension coordinates
    /// and declared coordinates (transitively).
    ///
    /// # Errors
    /// Returns [`Error::VariableNotFound`] when the variable or one of its
    /// coordinates is absent.
    pub fn project(&self, name: &str) -> Result<Self> {
        let mut collection = VariableCollection::new();
        let mut coordinates = BTreeMap::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            if collection.contains_key(&current) {
                continue;
            }
            let variable = self.variables.at(&current)?.clone();
            for dim in variable.dimensions().labeled() {
                if !collection.contains_key(&dim.label) {
                    pending.push(dim.label.clone());
                }
            }
            if let Some(names) = self.coordinates.get(&current) {
                coordinates.insert(current.clone(), names.clone());
                for coordinate in names {
                    if !collection.contains_key(coordinate) {
                        pending.push(coordinate.clone());
                    }
                }
            }
            collection.add(variable);
        }
        let domain = union_domain(&collection)?;
        Ok(Self {
            metadata: self.metadata.clone(),
            variables: collection,
            coordinates,
            domain,
            root: self.root.clone(),
            context: self.context.clone(),
        })
    }

    /// Select one field of a structured variable and swap the projected
    /// handle into this dataset. The returned variable (and the dataset's
    /// entry) is safe to use once the future resolves.
    ///
    /// # Errors
    /// Returns [`Error::VariableNotFound`], [`Error::NotStructured`], or
    /// [`Error::UnknownField`].
    pub async fn select_field(&mut self, variable_name: &str, field_name: &str) -> Result<Variable> {
        let variable = self.variables.at(variable_name)?.clone();
        let selected = variable.select_field(field_name).await?;
        self.variables.add(selected.clone());
        Ok(selected)
    }

    /// Publish every modified variable's `.zattrs`, then rewrite the
    /// consolidated metadata. Publication is two-phase so readers of
    /// `.zmetadata` always see a snapshot consistent with the per-variable
    /// documents.
    ///
    /// # Errors
    /// Returns [`Error::NoChanges`] when no variable reports changes;
    /// otherwise the first failing variable's error (partial publication
    /// is possible across variables).
    pub async fn commit_metadata(&self) -> Result<()> {
        let modified: Vec<&Variable> = self
            .variables
            .iter()
            .map(|(_, variable)| variable)
            .filter(|variable| variable.should_publish())
            .collect();
        if modified.is_empty() {
            return Err(Error::NoChanges);
        }
        debug!(modified = modified.len(), "committing dataset metadata");

        try_join_all(
            modified
                .iter()
                .map(|variable| variable.publish_metadata()),
        )
        .await?;

        let entries: Vec<ConsolidatedEntry> = self
            .variables
            .iter()
            .map(|(name, variable)| ConsolidatedEntry {
                name: name.clone(),
                zarray: variable.store().base_array().metadata().to_json(),
                zattrs: variable.zattrs_json(),
            })
            .collect();
        let store = self.root.open().await?;
        consolidated::write_consolidated(&store, &self.metadata, &entries).await
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Metadata: {}", self.metadata)?;
        for (name, variable) in self.variables.iter() {
            writeln!(f, "Variable: {name} - Dimensions: {}", variable.dimensions())?;
        }
        for (name, coordinates) in &self.coordinates {
            writeln!(f, "Variable: {name} - Coordinates: {}", coordinates.join(", "))?;
        }
        write!(f, "Domain: {}", self.domain)
    }
}

/// The union of the variables' labeled axes; every label must have a
/// single agreed interval.
fn union_domain(variables: &VariableCollection) -> Result<Domain> {
    let mut dims: BTreeMap<String, Dimension> = BTreeMap::new();
    for (name, variable) in variables.iter() {
        for dim in variable.dimensions().labeled() {
            match dims.get(&dim.label) {
                Some(existing) if existing.origin != dim.origin || existing.size != dim.size => {
                    return Err(Error::InconsistentDomain(format!(
                        "variable {name} carries {} as [{}, {}) but another variable \
                         carries [{}, {})",
                        dim.label,
                        dim.origin,
                        dim.end(),
                        existing.origin,
                        existing.end()
                    )));
                }
                Some(_) => {}
                None => {
                    dims.insert(dim.label.clone(), dim.clone());
                }
            }
        }
    }
    Ok(Domain::new(dims.into_values().collect()))
}

/// Split a descriptor list into batches within the per-slice bound,
/// keeping descriptors of the same label in one batch.
fn partition_descriptors(descriptors: &[RangeDescriptor]) -> Result<Vec<Vec<RangeDescriptor>>> {
    let mut groups: Vec<Vec<RangeDescriptor>> = Vec::new();
    for descriptor in descriptors {
        match groups
            .iter_mut()
            .find(|group| group[0].label == descriptor.label)
        {
            Some(group) => group.push(descriptor.clone()),
            None => groups.push(vec![descriptor.clone()]),
        }
    }
    let mut batches: Vec<Vec<RangeDescriptor>> = Vec::new();
    let mut current: Vec<RangeDescriptor> = Vec::new();
    for group in groups {
        if group.len() > MAX_SLICE_DESCRIPTORS {
            return Err(Error::InvalidSlice(format!(
                "label {} has {} ranges; the maximum per slice is {MAX_SLICE_DESCRIPTORS}",
                group[0].label,
                group.len()
            )));
        }
        if current.len() + group.len() > MAX_SLICE_DESCRIPTORS && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(group);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    if batches.is_empty() {
        return Err(Error::InvalidSlice(
            "no slice descriptors provided".to_string(),
        ));
    }
    Ok(batches)
}

/// The global positions (origin-based) where `predicate` holds.
fn positions_of<T>(values: &[T], origin: Index, predicate: impl Fn(&T) -> bool) -> Vec<Index> {
    values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| predicate(value).then_some(origin + index as Index))
        .collect()
}

/// Group ascending positions into half-open runs; [`None`] when empty.
fn runs(positions: &[Index]) -> Option<Vec<(Index, Index)>> {
    let first = *positions.first()?;
    let mut runs = vec![(first, first + 1)];
    for &position in &positions[1..] {
        let last = runs.last_mut().expect("runs is non-empty");
        if position == last.1 {
            last.1 += 1;
        } else {
            runs.push((position, position + 1));
        }
    }
    Some(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn memory_path(tag: &str) -> String {
        format!(
            "memory://dataset-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    fn toy_spec() -> Value {
        json!({
            "metadata": {
                "name": "toy",
                "apiVersion": "1.0.0",
                "createdOn": "2024-08-31T12:00:00Z",
                "attributes": {"origin": "unit-test"}
            },
            "variables": [
                {
                    "name": "image",
                    "dataType": "float32",
                    "dimensions": [
                        {"name": "inline", "size": 32},
                        {"name": "crossline", "size": 16}
                    ],
                    "metadata": {
                        "chunkGrid": {"name": "regular", "configuration": {"chunkShape": [8, 8]}}
                    },
                    "coordinates": ["cdp-x"]
                },
                {
                    "name": "cdp-x",
                    "dataType": "float64",
                    "dimensions": ["inline", "crossline"]
                },
                {
                    "name": "inline",
                    "dataType": "uint32",
                    "dimensions": [{"name": "inline", "size": 32}]
                },
                {
                    "name": "crossline",
                    "dataType": "uint32",
                    "dimensions": [{"name": "crossline", "size": 16}]
                }
            ]
        })
    }

    async fn create_toy(tag: &str) -> (Dataset, String) {
        let path = memory_path(tag);
        let dataset = Dataset::from_json(
            &toy_spec(),
            &path,
            OpenMode::CreateClean,
            &Context::default(),
        )
        .await
        .unwrap();
        (dataset, path)
    }

    #[tokio::test]
    async fn create_and_reopen() {
        let (dataset, path) = create_toy("reopen").await;
        assert_eq!(dataset.variables().len(), 4);
        assert_eq!(
            dataset.domain().interval("inline").unwrap().exclusive_max,
            32
        );

        let reopened = Dataset::open(&path, &Context::default()).await.unwrap();
        assert_eq!(reopened.metadata(), dataset.metadata());
        assert_eq!(reopened.variables().keys(), dataset.variables().keys());
        assert_eq!(reopened.domain(), dataset.domain());
        assert_eq!(
            reopened.coordinates().get("image"),
            Some(&vec!["cdp-x".to_string()])
        );
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let (_, path) = create_toy("twice").await;
        assert!(Dataset::from_json(
            &toy_spec(),
            &path,
            OpenMode::Create,
            &Context::default()
        )
        .await
        .is_err());
        // CreateClean replaces the existing dataset.
        Dataset::from_json(
            &toy_spec(),
            &path,
            OpenMode::CreateClean,
            &Context::default(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn open_missing_fails() {
        let err = Dataset::open(&memory_path("absent"), &Context::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendError(_)));
    }

    #[tokio::test]
    async fn isel_recomputes_domain() {
        let (dataset, _) = create_toy("isel").await;
        let sliced = dataset
            .isel(&[RangeDescriptor::new("inline", 0, 5)])
            .unwrap();
        let inline = sliced.domain().interval("inline").unwrap();
        assert_eq!(inline.exclusive_max - inline.inclusive_min, 5);
        let crossline = sliced.domain().interval("crossline").unwrap();
        assert_eq!(crossline.exclusive_max, 16);
        // Every variable carrying the label was narrowed.
        let image = sliced.variables().at("image").unwrap();
        assert_eq!(image.dimensions().interval("inline").unwrap().exclusive_max, 5);
        let inline_var = sliced.variables().at("inline").unwrap();
        assert_eq!(inline_var.dimensions().interval("inline").unwrap().exclusive_max, 5);
    }

    #[tokio::test]
    async fn isel_composes_on_disjoint_labels() {
        let (dataset, _) = create_toy("compose").await;
        let once = dataset
            .isel(&[
                RangeDescriptor::new("inline", 2, 10),
                RangeDescriptor::new("crossline", 4, 8),
            ])
            .unwrap();
        let twice = dataset
            .isel(&[RangeDescriptor::new("inline", 2, 10)])
            .unwrap()
            .isel(&[RangeDescriptor::new("crossline", 4, 8)])
            .unwrap();
        assert_eq!(once.domain(), twice.domain());
    }

    #[tokio::test]
    async fn project_carries_coordinate_closure() {
        let (dataset, _) = create_toy("project").await;
        let projected = dataset.project("image").unwrap();
        let mut keys = projected.variables().keys();
        keys.sort();
        assert_eq!(keys, vec!["cdp-x", "crossline", "image", "inline"]);
        assert_eq!(
            projected.coordinates().get("image"),
            Some(&vec!["cdp-x".to_string()])
        );

        // Projecting a dimension coordinate keeps just itself.
        let inline_only = dataset.project("inline").unwrap();
        assert_eq!(inline_only.variables().keys(), vec!["inline"]);
    }

    #[tokio::test]
    async fn sel_value_selects_all_matches() {
        let (dataset, _) = create_toy("selvalue").await;
        // inline = [1, 2, 3, 4, 3, 5, 6, 7, 8, 8, 0, 0, ...]
        let inline = dataset.variables().at("inline").unwrap();
        let mut data = inline.read().await.unwrap();
        {
            let values = data.as_mut_slice::<u32>().unwrap();
            let pattern = [1u32, 2, 3, 4, 3, 5, 6, 7, 8, 8];
            values[..pattern.len()].copy_from_slice(&pattern);
        }
        inline.write(&data).await.unwrap();

        let selected = dataset
            .sel(&[SelDescriptor::Value(ValueDescriptor::new("inline", 3u32))])
            .await
            .unwrap();
        let interval = selected.domain().interval("inline").unwrap();
        assert_eq!(interval.exclusive_max - interval.inclusive_min, 2);
    }

    #[tokio::test]
    async fn sel_value_missing_fails() {
        let (dataset, _) = create_toy("selmissing").await;
        assert!(matches!(
            dataset
                .sel(&[SelDescriptor::Value(ValueDescriptor::new("inline", 999u32))])
                .await,
            Err(Error::MissingCoordinate(_))
        ));
    }

    #[tokio::test]
    async fn sel_repeated_label_fails() {
        let (dataset, _) = create_toy("selrepeat").await;
        assert!(matches!(
            dataset
                .sel(&[
                    SelDescriptor::Value(ValueDescriptor::new("inline", 0u32)),
                    SelDescriptor::Value(ValueDescriptor::new("inline", 1u32)),
                ])
                .await,
            Err(Error::RepeatedSelLabel(_))
        ));
    }

    #[tokio::test]
    async fn sel_list_rejects_repeats_and_missing() {
        let (dataset, _) = create_toy("sellist").await;
        assert!(matches!(
            dataset
                .sel(&[SelDescriptor::List(ListDescriptor::new(
                    "inline",
                    vec![0u32, 0u32]
                ))])
                .await,
            Err(Error::RepeatedSelValue(_))
        ));
        assert!(matches!(
            dataset
                .sel(&[SelDescriptor::List(ListDescriptor::new(
                    "inline",
                    vec![0u32, 777u32]
                ))])
                .await,
            Err(Error::MissingCoordinate(_))
        ));
    }

    #[tokio::test]
    async fn sel_range_selects_contiguous_values() {
        let (dataset, _) = create_toy("selrange").await;
        let inline = dataset.variables().at("inline").unwrap();
        let mut data = inline.read().await.unwrap();
        {
            let values = data.as_mut_slice::<u32>().unwrap();
            for (index, value) in values.iter_mut().enumerate() {
                *value = 100 + index as u32;
            }
        }
        inline.write(&data).await.unwrap();

        let selected = dataset
            .sel(&[SelDescriptor::Range(RangeDescriptor::new(
                "inline", 105u32, 110u32,
            ))])
            .await
            .unwrap();
        let interval = selected.domain().interval("inline").unwrap();
        assert_eq!(interval.inclusive_min, 5);
        assert_eq!(interval.exclusive_max, 10);
    }

    #[tokio::test]
    async fn sel_range_rejects_non_contiguous_matches() {
        let (dataset, _) = create_toy("selnoncontig").await;
        let inline = dataset.variables().at("inline").unwrap();
        let mut data = inline.read().await.unwrap();
        {
            let values = data.as_mut_slice::<u32>().unwrap();
            values[2] = 50;
            values[7] = 50;
        }
        inline.write(&data).await.unwrap();

        assert!(matches!(
            dataset
                .sel(&[SelDescriptor::Range(RangeDescriptor::new(
                    "inline", 50u32, 51u32,
                ))])
                .await,
            Err(Error::RepeatedCoordinate(_))
        ));
    }

    #[tokio::test]
    async fn sel_reversed_range_fails() {
        let (dataset, _) = create_toy("selreversed").await;
        assert!(matches!(
            dataset
                .sel(&[SelDescriptor::Range(RangeDescriptor::new(
                    "inline", 10u32, 5u32,
                ))])
                .await,
            Err(Error::InvalidRange(_))
        ));
    }

    #[tokio::test]
    async fn sel_dtype_mismatch_fails() {
        let (dataset, _) = create_toy("seldtype").await;
        assert!(matches!(
            dataset
                .sel(&[SelDescriptor::Value(ValueDescriptor::new("inline", 3.0f32))])
                .await,
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn commit_without_changes_fails() {
        let (dataset, _) = create_toy("nochanges").await;
        assert!(matches!(
            dataset.commit_metadata().await,
            Err(Error::NoChanges)
        ));
    }

    #[tokio::test]
    async fn commit_republishes_updated_variable() {
        let (dataset, path) = create_toy("commit").await;
        let image = dataset.variables().at("image").unwrap();
        image
            .update_attributes::<i32>(&json!({
                "statsV1": {
                    "count": 100,
                    "min": 0,
                    "max": 100,
                    "sum": 1000,
                    "sumSquares": 10000,
                    "histogram": {"binCenters": [2, 4, 6], "counts": [10, 15, 20]}
                }
            }))
            .unwrap();
        assert!(image.was_updated());
        dataset.commit_metadata().await.unwrap();
        assert!(!image.was_updated());

        let reopened = Dataset::open(&path, &Context::default()).await.unwrap();
        let image = reopened.variables().at("image").unwrap();
        let stats = image.attributes().to_json();
        assert_eq!(
            stats["statsV1"]["histogram"],
            json!({"binCenters": [2, 4, 6], "counts": [10, 15, 20]})
        );
    }

    #[tokio::test]
    async fn legacy_metadata_rejected() {
        let spec = json!({
            "metadata": {"name": "legacy", "api_version": "0.1.0"},
            "variables": toy_spec()["variables"].clone()
        });
        let err = Dataset::from_json(
            &spec,
            &memory_path("legacy"),
            OpenMode::CreateClean,
            &Context::default(),
        )
        .await
        .unwrap_err();
        // The factory rejects the spec before the legacy check is reached.
        assert!(matches!(err, Error::InvalidSchema(_)));

        let err = Dataset::open_with_specs(
            json!({"name": "legacy", "api_version": "0.1.0"}),
            &[],
            KvStoreSpec::from_path(&memory_path("legacy2")).unwrap(),
            OpenMode::Open,
            &Context::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::LegacyVersion));
    }

    #[test]
    fn partition_keeps_labels_together() {
        let mut descriptors = Vec::new();
        for index in 0..MAX_SLICE_DESCRIPTORS {
            descriptors.push(RangeDescriptor::new(format!("d{index}"), 0, 1));
        }
        descriptors.push(RangeDescriptor::new("d0", 2, 3));
        let batches = partition_descriptors(&descriptors).unwrap();
        assert!(batches.len() > 1);
        for batch in &batches {
            assert!(batch.len() <= MAX_SLICE_DESCRIPTORS);
        }
        // Both d0 ranges land in the same batch.
        let batch_with_d0: Vec<_> = batches
            .iter()
            .filter(|batch| batch.iter().any(|descriptor| descriptor.label == "d0"))
            .collect();
        assert_eq!(batch_with_d0.len(), 1);
        assert_eq!(
            batch_with_d0[0]
                .iter()
                .filter(|descriptor| descriptor.label == "d0")
                .count(),
            2
        );
    }

    #[test]
    fn runs_group_consecutive_positions() {
        assert_eq!(runs(&[]), None);
        assert_eq!(runs(&[2, 3, 4]), Some(vec![(2, 5)]));
        assert_eq!(runs(&[2, 4, 5]), Some(vec![(2, 3), (4, 6)]));
    }
}
