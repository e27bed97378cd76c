//! A name-keyed collection of variables.

use std::collections::BTreeMap;

use crate::dtype::{DataType, Element, ScalarType};
use crate::error::{Error, Result};
use crate::variable::Variable;

/// The variables of a dataset, keyed by name.
///
/// Iteration is in name order, so traversal is deterministic across
/// platforms and runs.
#[derive(Debug, Clone, Default)]
pub struct VariableCollection {
    variables: BTreeMap<String, Variable>,
}

impl VariableCollection {
    /// An empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a variable under its own name, replacing any existing entry.
    pub fn add(&mut self, variable: Variable) {
        self.variables
            .insert(variable.name().to_string(), variable);
    }

    /// Look up a variable without any type check.
    ///
    /// # Errors
    /// Returns [`Error::VariableNotFound`] for unknown names.
    pub fn at(&self, name: &str) -> Result<&Variable> {
        self.variables
            .get(name)
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))
    }

    /// Look up a variable and check that its elements are of type `T`.
    ///
    /// Boolean variables are viewed through `u8`, and raw structured
    /// variables through `u8` byte records.
    ///
    /// # Errors
    /// Returns [`Error::VariableNotFound`] for unknown names and
    /// [`Error::TypeMismatch`] when the element type does not conform.
    pub fn get<T: Element>(&self, name: &str) -> Result<Variable> {
        let variable = self.at(name)?;
        let conforms = match variable.dtype() {
            DataType::Scalar(scalar) => {
                scalar == T::SCALAR
                    || (scalar == ScalarType::Bool && T::SCALAR == ScalarType::UInt8)
            }
            DataType::Structured(_) => T::SCALAR == ScalarType::UInt8,
        };
        if conforms {
            Ok(variable.clone())
        } else {
            Err(Error::TypeMismatch {
                variable: name.to_string(),
                actual: variable.dtype(),
            })
        }
    }

    /// True when a variable with `name` exists.
    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// The variable names, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.variables.keys().cloned().collect()
    }

    /// Iterate over `(name, variable)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.variables.iter()
    }

    /// The number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True when the collection holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::OpenMode;
    use crate::config::Context;
    use crate::schema::construct;
    use serde_json::json;

    async fn sample_collection(tag: &str) -> VariableCollection {
        let spec = json!({
            "metadata": {"name": "c", "apiVersion": "1.0.0", "createdOn": "2024-08-31T12:00:00Z"},
            "variables": [
                {
                    "name": "amplitude",
                    "dataType": "float32",
                    "dimensions": [{"name": "depth", "size": 16}]
                },
                {
                    "name": "depth",
                    "dataType": "uint64",
                    "dimensions": [{"name": "depth", "size": 16}]
                }
            ]
        });
        let path = format!(
            "memory://collection-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        let (_, specs) = construct(&spec, &path).unwrap();
        let mut collection = VariableCollection::new();
        for spec in &specs {
            collection.add(
                Variable::open(spec, OpenMode::Create, &Context::default())
                    .await
                    .unwrap(),
            );
        }
        collection
    }

    #[tokio::test]
    async fn keys_are_sorted() {
        let collection = sample_collection("sorted").await;
        assert_eq!(collection.keys(), vec!["amplitude", "depth"]);
        assert_eq!(collection.len(), 2);
        assert!(collection.contains_key("amplitude"));
        assert!(!collection.contains_key("velocity"));
    }

    #[tokio::test]
    async fn typed_get_enforces_dtype() {
        let collection = sample_collection("typed").await;
        assert!(collection.get::<f32>("amplitude").is_ok());
        assert!(matches!(
            collection.get::<f64>("amplitude"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(collection.get::<u64>("depth").is_ok());
        assert!(matches!(
            collection.get::<u64>("missing"),
            Err(Error::VariableNotFound(_))
        ));
    }
}
