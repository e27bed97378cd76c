//! Cross-field validation of a dataset specification.
//!
//! The input is assumed to have passed JSON-schema conformance; this pass
//! checks what the schema cannot: every dimension has one agreed size,
//! every dimension in use has a dimension-coordinate variable, and every
//! coordinate reference names a variable.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde_json::Value;

use crate::dtype::Index;
use crate::error::{Error, Result};
use crate::schema::API_VERSION;

/// Validate `spec` and return the agreed size of every named dimension.
///
/// # Errors
/// - [`Error::InvalidSchema`] for structural problems or a wrong
///   `apiVersion`.
/// - [`Error::InconsistentDimensions`] for size conflicts or a missing
///   dimension coordinate.
/// - [`Error::UnknownCoordinate`] for coordinates that name no variable.
pub fn validate_dataset_spec(spec: &Value) -> Result<BTreeMap<String, Index>> {
    let metadata = spec
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::InvalidSchema("spec is missing the metadata object".to_string()))?;
    match metadata.get("apiVersion").and_then(Value::as_str) {
        Some(API_VERSION) => {}
        Some(other) => {
            return Err(Error::InvalidSchema(format!(
                "apiVersion must be {API_VERSION}, got {other}"
            )))
        }
        None => {
            return Err(Error::InvalidSchema(
                "spec metadata is missing apiVersion".to_string(),
            ))
        }
    }
    if metadata.get("name").and_then(Value::as_str).is_none() {
        return Err(Error::InvalidSchema(
            "spec metadata is missing name".to_string(),
        ));
    }
    match metadata.get("createdOn").and_then(Value::as_str) {
        Some(created_on) => {
            if chrono::DateTime::parse_from_rfc3339(created_on).is_err() {
                return Err(Error::InvalidSchema(format!(
                    "createdOn is not an RFC 3339 timestamp: {created_on}"
                )));
            }
        }
        None => {
            return Err(Error::InvalidSchema(
                "spec metadata is missing createdOn".to_string(),
            ))
        }
    }

    let variables = spec
        .get("variables")
        .and_then(Value::as_array)
        .filter(|variables| !variables.is_empty())
        .ok_or_else(|| {
            Error::InvalidSchema("spec must declare at least one variable".to_string())
        })?;

    let dimension_sizes = collect_dimension_sizes(variables)?;
    validate_coordinates_present(variables, &dimension_sizes)?;
    Ok(dimension_sizes)
}

fn variable_name(variable: &Value) -> Result<&str> {
    variable
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidSchema("variable is missing a name".to_string()))
}

/// The dimension labels a variable declares, by name only.
pub(crate) fn dimension_labels(variable: &Value) -> Result<Vec<String>> {
    let dimensions = variable
        .get("dimensions")
        .and_then(Value::as_array)
        .filter(|dimensions| !dimensions.is_empty())
        .ok_or_else(|| {
            Error::InvalidSchema(format!(
                "variable {} is missing dimensions",
                variable_name(variable).unwrap_or("?")
            ))
        })?;
    dimensions
        .iter()
        .map(|dimension| match dimension {
            Value::String(label) => Ok(label.clone()),
            Value::Object(object) => object
                .get("name")
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| {
                    Error::InvalidSchema("named dimension is missing its name".to_string())
                }),
            _ => Err(Error::InvalidSchema(format!(
                "malformed dimension entry {dimension}"
            ))),
        })
        .collect()
}

fn collect_dimension_sizes(variables: &[Value]) -> Result<BTreeMap<String, Index>> {
    let mut sizes = BTreeMap::new();
    for variable in variables {
        let name = variable_name(variable)?;
        for dimension in variable
            .get("dimensions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(object) = dimension.as_object() else {
                continue;
            };
            let label = object
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::InvalidSchema("named dimension is missing its name".to_string())
                })?;
            let size = object.get("size").and_then(Value::as_u64).ok_or_else(|| {
                Error::InvalidSchema(format!("dimension {label} is missing its size"))
            })?;
            if let Some(&existing) = sizes.get(label) {
                if existing != size {
                    return Err(Error::InconsistentDimensions(format!(
                        "dimension {label} of variable {name} has conflicting sizes \
                         {existing} and {size}"
                    )));
                }
            } else {
                sizes.insert(label.to_string(), size);
            }
        }
    }
    Ok(sizes)
}

fn validate_coordinates_present(
    variables: &[Value],
    dimension_sizes: &BTreeMap<String, Index>,
) -> Result<()> {
    // Names of all variables, and of the dimension coordinates: 1-D
    // variables whose single dimension carries their own name.
    let mut names = BTreeSet::new();
    let mut dimension_coordinates = BTreeSet::new();
    for variable in variables {
        let name = variable_name(variable)?;
        names.insert(name.to_string());
        let labels = dimension_labels(variable)?;
        if labels.len() == 1 && labels[0] == name {
            dimension_coordinates.insert(name.to_string());
        }
    }

    for variable in variables {
        let name = variable_name(variable)?;
        if dimension_coordinates.contains(name) {
            continue;
        }
        for label in dimension_labels(variable)? {
            if !dimension_coordinates.contains(&label) {
                return Err(Error::InconsistentDimensions(format!(
                    "variable {name} has a dimension {label} that is not a \
                     dimension coordinate"
                )));
            }
        }
        for coordinate in variable
            .get("coordinates")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let coordinate = coordinate.as_str().ok_or_else(|| {
                Error::InvalidSchema(format!("malformed coordinate entry {coordinate}"))
            })?;
            if !names.contains(coordinate) {
                return Err(Error::UnknownCoordinate(format!(
                    "variable {name} has a coordinate {coordinate} that is not a variable"
                )));
            }
        }
    }

    // Referenced-by-name dimensions must exist somewhere with a size.
    for variable in variables {
        let name = variable_name(variable)?;
        for label in dimension_labels(variable)? {
            if !dimension_sizes.contains_key(&label) {
                return Err(Error::InconsistentDimensions(format!(
                    "variable {name} references dimension {label} but no variable \
                     declares its size"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sizes_collected_from_named_dimensions() {
        let spec = json!({
            "metadata": {"name": "d", "apiVersion": "1.0.0", "createdOn": "2024-08-31T12:00:00Z"},
            "variables": [
                {"name": "x", "dataType": "uint32", "dimensions": [{"name": "x", "size": 10}]},
                {"name": "v", "dataType": "float32", "dimensions": ["x"]}
            ]
        });
        let sizes = validate_dataset_spec(&spec).unwrap();
        assert_eq!(sizes.get("x"), Some(&10));
    }

    #[test]
    fn by_name_dimension_without_size_rejected() {
        let spec = json!({
            "metadata": {"name": "d", "apiVersion": "1.0.0", "createdOn": "2024-08-31T12:00:00Z"},
            "variables": [
                {"name": "x", "dataType": "uint32", "dimensions": [{"name": "x", "size": 4}]},
                {"name": "v", "dataType": "float32", "dimensions": ["x", "y"]},
                {"name": "y", "dataType": "uint32", "dimensions": [{"name": "y", "size": 4}]}
            ]
        });
        // y is declared, so this is fine.
        validate_dataset_spec(&spec).unwrap();

        let spec = json!({
            "metadata": {"name": "d", "apiVersion": "1.0.0", "createdOn": "2024-08-31T12:00:00Z"},
            "variables": [
                {"name": "x", "dataType": "uint32", "dimensions": [{"name": "x", "size": 4}]},
                {"name": "v", "dataType": "float32", "dimensions": ["x", "z"]}
            ]
        });
        assert!(matches!(
            validate_dataset_spec(&spec),
            Err(Error::InconsistentDimensions(_))
        ));
    }

    #[test]
    fn missing_metadata_rejected() {
        assert!(matches!(
            validate_dataset_spec(&json!({"variables": []})),
            Err(Error::InvalidSchema(_))
        ));
    }

    #[test]
    fn malformed_created_on_rejected() {
        let spec = json!({
            "metadata": {"name": "d", "apiVersion": "1.0.0", "createdOn": "yesterday"},
            "variables": [
                {"name": "x", "dataType": "uint32", "dimensions": [{"name": "x", "size": 4}]}
            ]
        });
        assert!(matches!(
            validate_dataset_spec(&spec),
            Err(Error::InvalidSchema(_))
        ));
    }
}
