//! Safe recursive dataset removal.

use tracing::debug;

use crate::config::Context;
use crate::dataset::Dataset;
use crate::error::Result;
use crate::storage::KvStoreSpec;

/// Delete a dataset, recursively removing every key under its root.
///
/// The path is first opened as a dataset; anything that does not parse as
/// a well-formed dataset is left untouched, so a stray path cannot be
/// wiped by accident.
///
/// # Errors
/// Fails when the path is not a valid dataset or the removal fails.
pub async fn delete_dataset(path: &str, context: &Context) -> Result<()> {
    // Validate before destroying anything.
    let dataset = Dataset::open(path, context).await?;
    debug!(path, variables = dataset.variables().len(), "deleting dataset");

    let root = KvStoreSpec::from_path(path)?.open().await?;
    root.delete_prefix("").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::OpenMode;
    use crate::storage::KeyValueStore;
    use serde_json::json;

    fn memory_path(tag: &str) -> String {
        format!(
            "memory://delete-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    fn spec() -> serde_json::Value {
        json!({
            "metadata": {"name": "d", "apiVersion": "1.0.0", "createdOn": "2024-08-31T12:00:00Z"},
            "variables": [
                {
                    "name": "inline",
                    "dataType": "uint32",
                    "dimensions": [{"name": "inline", "size": 4}]
                }
            ]
        })
    }

    #[tokio::test]
    async fn deletes_valid_dataset() {
        let path = memory_path("valid");
        Dataset::from_json(&spec(), &path, OpenMode::CreateClean, &Context::default())
            .await
            .unwrap();
        delete_dataset(&path, &Context::default()).await.unwrap();

        let root = KvStoreSpec::from_path(&path).unwrap().open().await.unwrap();
        assert!(root.list_prefix("").await.unwrap().is_empty());
        assert!(Dataset::open(&path, &Context::default()).await.is_err());
    }

    #[tokio::test]
    async fn refuses_non_dataset_path() {
        let path = memory_path("notads");
        let root = KvStoreSpec::from_path(&path).unwrap().open().await.unwrap();
        root.write("unrelated", bytes::Bytes::from_static(b"keep me"))
            .await
            .unwrap();

        assert!(delete_dataset(&path, &Context::default()).await.is_err());
        // Nothing was removed.
        assert_eq!(root.list_prefix("").await.unwrap(), vec!["unrelated"]);
    }
}
