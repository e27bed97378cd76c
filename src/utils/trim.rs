//! Trimming: resizing a dataset on disk.

use tracing::{debug, warn};

use crate::array::ResizeMode;
use crate::config::Context;
use crate::dataset::Dataset;
use crate::dtype::Index;
use crate::error::{Error, Result};
use crate::variable::RangeDescriptor;

/// Trim a dataset to the extents named by the descriptors.
///
/// DANGER: this mutates the dataset on disk. Only the `label` and `stop`
/// of each descriptor are considered: every axis named by a descriptor is
/// resized to `stop` on every variable carrying it. With
/// `delete_out_of_bounds`, chunks that fall entirely outside the new
/// bounds are deleted; otherwise they are kept but become inaccessible.
/// The dataset's metadata is republished afterwards.
///
/// An empty descriptor list is a no-op. This utility should only be run
/// against a fully written dataset; concurrent writers see undefined
/// intermediate states.
///
/// # Errors
/// Fails when the dataset cannot be opened, a descriptor has a step other
/// than 1, or any resize or metadata write fails.
pub async fn trim_dataset(
    path: &str,
    delete_out_of_bounds: bool,
    descriptors: &[RangeDescriptor],
    context: &Context,
) -> Result<()> {
    if descriptors.is_empty() {
        return Ok(());
    }
    for descriptor in descriptors {
        if descriptor.step != 1 {
            return Err(Error::InvalidSlice(format!(
                "trim step must be 1, got {} for {}",
                descriptor.step, descriptor.label
            )));
        }
    }

    let dataset = Dataset::open(path, context).await?;
    let mode = if delete_out_of_bounds {
        ResizeMode::TiedBounds
    } else {
        ResizeMode::MetadataOnly
    };

    for name in dataset.variables().keys() {
        let variable = dataset.variables().at(&name)?;
        variable.set_publish_pending(true);

        let labels: Vec<String> = variable
            .dimensions()
            .labeled()
            .iter()
            .map(|dim| dim.label.clone())
            .collect();
        let current = variable.store_shape();
        let new_shape: Vec<Index> = labels
            .iter()
            .zip(&current)
            .map(|(label, &size)| {
                descriptors
                    .iter()
                    .find(|descriptor| &descriptor.label == label)
                    .map_or(size, |descriptor| descriptor.stop)
            })
            .collect();

        if new_shape == current {
            debug!(variable = %name, "trim leaves variable unchanged");
            continue;
        }
        if new_shape.iter().zip(&current).any(|(new, old)| new > old) {
            warn!(variable = %name, "trim is growing an axis");
        }
        variable
            .store()
            .base_array()
            .resize(new_shape, mode)
            .await?;
    }

    dataset.commit_metadata().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::OpenMode;
    use serde_json::json;

    fn memory_path(tag: &str) -> String {
        format!(
            "memory://trim-{tag}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        )
    }

    fn spec() -> serde_json::Value {
        json!({
            "metadata": {"name": "t", "apiVersion": "1.0.0", "createdOn": "2024-08-31T12:00:00Z"},
            "variables": [
                {
                    "name": "image",
                    "dataType": "float32",
                    "dimensions": [
                        {"name": "inline", "size": 16},
                        {"name": "depth", "size": 8}
                    ],
                    "metadata": {
                        "chunkGrid": {"name": "regular", "configuration": {"chunkShape": [4, 4]}}
                    }
                },
                {
                    "name": "headers",
                    "dataType": {"fields": [
                        {"name": "cdp-x", "format": "int32"},
                        {"name": "cdp-y", "format": "int32"}
                    ]},
                    "dimensions": ["inline"]
                },
                {
                    "name": "inline",
                    "dataType": "uint32",
                    "dimensions": [{"name": "inline", "size": 16}]
                },
                {
                    "name": "depth",
                    "dataType": "uint32",
                    "dimensions": [{"name": "depth", "size": 8}]
                }
            ]
        })
    }

    async fn create(tag: &str) -> String {
        let path = memory_path(tag);
        Dataset::from_json(&spec(), &path, OpenMode::CreateClean, &Context::default())
            .await
            .unwrap();
        path
    }

    #[tokio::test]
    async fn trim_shrinks_every_variable_on_the_label() {
        let path = create("shrink").await;
        trim_dataset(
            &path,
            true,
            &[RangeDescriptor::new("inline", 0, 8)],
            &Context::default(),
        )
        .await
        .unwrap();

        let reopened = Dataset::open(&path, &Context::default()).await.unwrap();
        assert_eq!(reopened.domain().interval("inline").unwrap().exclusive_max, 8);
        assert_eq!(reopened.domain().interval("depth").unwrap().exclusive_max, 8);
        // The structured variable was resized through its raw view.
        let headers = reopened.variables().at("headers").unwrap();
        assert_eq!(headers.store_shape(), vec![8]);
    }

    #[tokio::test]
    async fn trim_is_idempotent_for_non_shrinking_descriptors() {
        let path = create("idempotent").await;
        trim_dataset(
            &path,
            true,
            &[RangeDescriptor::new("inline", 0, 8)],
            &Context::default(),
        )
        .await
        .unwrap();
        trim_dataset(
            &path,
            true,
            &[RangeDescriptor::new("inline", 0, 8)],
            &Context::default(),
        )
        .await
        .unwrap();
        let reopened = Dataset::open(&path, &Context::default()).await.unwrap();
        assert_eq!(reopened.domain().interval("inline").unwrap().exclusive_max, 8);
    }

    #[tokio::test]
    async fn trim_without_descriptors_is_a_no_op() {
        let path = create("noop").await;
        trim_dataset(&path, true, &[], &Context::default()).await.unwrap();
        let reopened = Dataset::open(&path, &Context::default()).await.unwrap();
        assert_eq!(reopened.domain().interval("inline").unwrap().exclusive_max, 16);
    }

    #[tokio::test]
    async fn trim_rejects_stepped_descriptors() {
        let path = create("step").await;
        let mut descriptor = RangeDescriptor::new("inline", 0, 8);
        descriptor.step = 2;
        assert!(matches!(
            trim_dataset(&path, true, &[descriptor], &Context::default()).await,
            Err(Error::InvalidSlice(_))
        ));
    }
}
