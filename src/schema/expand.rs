//! Expansion of validated variable declarations into backend specs.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::array::{BloscConfig, ZarrayMetadata};
use crate::dtype::{DataType, Index};
use crate::error::{Error, Result};
use crate::storage::KvStoreSpec;

use super::validate::dimension_labels;

/// The backend-specific description of one chunked-array variable: where
/// it lives, its `.zarray` metadata, an optional field projection, and the
/// attributes destined for its `.zattrs`.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    /// The store holding the variable's keys.
    pub kvstore: KvStoreSpec,
    /// The array metadata (`driver = "zarr"`, v2 layout).
    pub metadata: ZarrayMetadata,
    /// A structured-dtype field to project, by name.
    pub field: Option<String>,
    /// The variable's attribute document.
    pub attributes: VariableAttributes,
}

impl BackendSpec {
    /// The variable name: the stem of the backend path.
    #[must_use]
    pub fn name(&self) -> &str {
        self.kvstore.stem()
    }

    /// The full backend spec document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut spec = serde_json::json!({
            "driver": "zarr",
            "kvstore": serde_json::to_value(&self.kvstore).unwrap_or(Value::Null),
            "metadata": {
                "dtype": self.metadata.dtype.to_zarr_json(),
                "shape": &self.metadata.shape,
                "chunks": &self.metadata.chunks,
                "compressor": &self.metadata.compressor,
                "fill_value": self.metadata.fill_value.to_json(),
                "dimension_separator": "/",
            },
            "attributes": self.attributes.to_json(),
        });
        if let Some(field) = &self.field {
            spec["field"] = Value::String(field.clone());
        }
        spec
    }
}

/// The pre-publication attribute document of a variable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableAttributes {
    /// Optional human-readable label; empty means absent.
    pub long_name: Option<String>,
    /// The axis labels, in order.
    pub dimension_names: Vec<String>,
    /// Space-separated non-dimension coordinate names.
    pub coordinates: Option<String>,
    /// The nested `metadata` sub-document (`chunkGrid`, `statsV1`,
    /// `unitsV1`, `attributes`). `chunkGrid` is dropped at publish time.
    pub metadata: Option<Value>,
}

impl VariableAttributes {
    /// Serialise the attribute document (pre-publication shape, with
    /// `dimension_names` rather than `_ARRAY_DIMENSIONS`).
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = serde_json::Map::new();
        if let Some(long_name) = &self.long_name {
            object.insert("long_name".to_string(), Value::String(long_name.clone()));
        }
        object.insert(
            "dimension_names".to_string(),
            Value::Array(
                self.dimension_names
                    .iter()
                    .map(|label| Value::String(label.clone()))
                    .collect(),
            ),
        );
        if let Some(coordinates) = &self.coordinates {
            object.insert(
                "coordinates".to_string(),
                Value::String(coordinates.clone()),
            );
        }
        if let Some(metadata) = &self.metadata {
            object.insert("metadata".to_string(), metadata.clone());
        }
        Value::Object(object)
    }
}

/// Expand one validated variable declaration.
pub(crate) fn expand_variable(
    variable: &Value,
    dimension_sizes: &BTreeMap<String, Index>,
    root_path: &str,
) -> Result<BackendSpec> {
    let name = variable
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidSchema("variable is missing a name".to_string()))?;

    let dtype = DataType::from_schema_json(variable.get("dataType").ok_or_else(|| {
        Error::UnsupportedDtype(format!("variable {name} is missing dataType"))
    })?)?;

    let labels = dimension_labels(variable)?;
    let shape: Vec<Index> = labels
        .iter()
        .map(|label| {
            dimension_sizes
                .get(label)
                .copied()
                .ok_or_else(|| Error::UnknownDimension(label.clone()))
        })
        .collect::<Result<_>>()?;

    let chunks = variable
        .get("metadata")
        .and_then(|metadata| metadata.get("chunkGrid"))
        .and_then(|grid| grid.get("configuration"))
        .and_then(|configuration| configuration.get("chunkShape"))
        .and_then(Value::as_array)
        .map(|chunk_shape| {
            chunk_shape
                .iter()
                .map(|extent| {
                    extent.as_u64().ok_or_else(|| {
                        Error::InvalidSchema(format!(
                            "variable {name} has a non-integer chunk extent {extent}"
                        ))
                    })
                })
                .collect::<Result<Vec<Index>>>()
        })
        .transpose()?;

    let compressor = variable
        .get("compressor")
        .map(BloscConfig::from_spec_json)
        .transpose()?;

    let fill_value = dtype.default_fill_value();
    let metadata = ZarrayMetadata::new(shape, chunks, dtype, compressor, fill_value)?;

    let long_name = variable
        .get("longName")
        .and_then(Value::as_str)
        .filter(|long_name| !long_name.is_empty())
        .map(String::from);

    // Dimension coordinates are not serialised into the coordinates
    // string; only auxiliary coordinates remain.
    let coordinates = variable.get("coordinates").and_then(Value::as_array).map(|entries| {
        entries
            .iter()
            .filter_map(Value::as_str)
            .filter(|coordinate| !labels.iter().any(|label| label == coordinate))
            .collect::<Vec<_>>()
            .join(" ")
    });
    let coordinates = coordinates.filter(|coordinates| !coordinates.is_empty());

    Ok(BackendSpec {
        kvstore: KvStoreSpec::from_path(root_path)?.child(name),
        metadata,
        field: None,
        attributes: VariableAttributes {
            long_name,
            dimension_names: labels,
            coordinates,
            metadata: variable.get("metadata").cloned(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backend_spec_document_shape() {
        let mut sizes = BTreeMap::new();
        sizes.insert("x".to_string(), 16);
        let variable = json!({
            "name": "velocity",
            "dataType": "float16",
            "dimensions": ["x"],
            "longName": "Stacking velocity"
        });
        let spec = expand_variable(&variable, &sizes, "/data/ds").unwrap();
        let json = spec.to_json();
        assert_eq!(json["driver"], "zarr");
        assert_eq!(json["kvstore"]["driver"], "file");
        assert_eq!(json["kvstore"]["path"], "/data/ds/velocity");
        assert_eq!(json["metadata"]["dtype"], "<f2");
        assert_eq!(json["metadata"]["dimension_separator"], "/");
        assert_eq!(json["metadata"]["fill_value"], "NaN");
        assert_eq!(json["attributes"]["long_name"], "Stacking velocity");
        assert_eq!(json["attributes"]["dimension_names"], json!(["x"]));
    }

    #[test]
    fn empty_long_name_omitted() {
        let mut sizes = BTreeMap::new();
        sizes.insert("x".to_string(), 4);
        let variable = json!({
            "name": "v",
            "dataType": "int8",
            "dimensions": ["x"],
            "longName": ""
        });
        let spec = expand_variable(&variable, &sizes, "/d").unwrap();
        assert_eq!(spec.attributes.long_name, None);
    }

    #[test]
    fn coordinates_of_only_dimensions_omitted() {
        let mut sizes = BTreeMap::new();
        sizes.insert("x".to_string(), 4);
        let variable = json!({
            "name": "v",
            "dataType": "int8",
            "dimensions": ["x"],
            "coordinates": ["x"]
        });
        let spec = expand_variable(&variable, &sizes, "/d").unwrap();
        assert_eq!(spec.attributes.coordinates, None);
    }
}
