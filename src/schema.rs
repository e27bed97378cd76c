//! The schema-driven dataset factory.
//!
//! [`construct`] turns a v1 dataset specification document into the
//! dataset's root metadata plus one backend spec per variable. JSON-schema
//! conformance of the input is the caller's concern; this module performs
//! the cross-field checks a schema cannot express — dimension-size
//! agreement, the presence of dimension coordinates, coordinate references
//! — and the mechanical expansion: dtype encoding, fill-value derivation,
//! compressor configuration, and path/driver routing.

mod expand;
mod validate;

use serde_json::Value;

use crate::error::Result;

pub use expand::{BackendSpec, VariableAttributes};
pub use validate::validate_dataset_spec;

/// The `apiVersion` this revision reads and writes.
pub const API_VERSION: &str = "1.0.0";

/// Validate a dataset specification and expand it into the dataset root
/// metadata and one backend spec per variable, rooted at `root_path`.
///
/// # Errors
/// Returns the first validation or expansion failure, identifying the
/// offending variable and dimension.
pub fn construct(spec: &Value, root_path: &str) -> Result<(Value, Vec<BackendSpec>)> {
    let dimension_sizes = validate::validate_dataset_spec(spec)?;
    let metadata = spec
        .get("metadata")
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    let mut variables = Vec::new();
    for variable in spec
        .get("variables")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        variables.push(expand::expand_variable(variable, &dimension_sizes, root_path)?);
    }
    Ok((metadata, variables))
}
