//! Property-style checks over datasets: domain containment, slicing
//! algebra, and clamping behaviour.

use serde_json::{json, Value};

use seiscube::{Context, DataType, Dataset, OpenMode, RangeDescriptor, ScalarType};

fn memory_path(tag: &str) -> String {
    format!(
        "memory://properties-{tag}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

fn survey_spec() -> Value {
    json!({
        "metadata": {
            "name": "survey",
            "apiVersion": "1.0.0",
            "createdOn": "2024-08-31T12:00:00Z"
        },
        "variables": [
            {
                "name": "image",
                "dataType": "float32",
                "dimensions": [
                    {"name": "inline", "size": 40},
                    {"name": "crossline", "size": 30},
                    {"name": "depth", "size": 20}
                ],
                "metadata": {
                    "chunkGrid": {"name": "regular", "configuration": {"chunkShape": [16, 16, 16]}}
                },
                "coordinates": ["cdp-x", "cdp-y"]
            },
            {
                "name": "velocity",
                "dataType": "float16",
                "dimensions": ["inline", "crossline", "depth"]
            },
            {
                "name": "headers",
                "dataType": {"fields": [
                    {"name": "cdp-x", "format": "int32"},
                    {"name": "offset", "format": "float32"}
                ]},
                "dimensions": ["inline", "crossline"]
            },
            {"name": "cdp-x", "dataType": "float64", "dimensions": ["inline", "crossline"]},
            {"name": "cdp-y", "dataType": "float64", "dimensions": ["inline", "crossline"]},
            {"name": "inline", "dataType": "uint32",
             "dimensions": [{"name": "inline", "size": 40}]},
            {"name": "crossline", "dataType": "uint32",
             "dimensions": [{"name": "crossline", "size": 30}]},
            {"name": "depth", "dataType": "uint32",
             "dimensions": [{"name": "depth", "size": 20}]}
        ]
    })
}

async fn create_survey(tag: &str) -> Dataset {
    Dataset::from_json(
        &survey_spec(),
        &memory_path(tag),
        OpenMode::Create,
        &Context::default(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn variable_labels_are_contained_in_the_domain() {
    let dataset = create_survey("containment").await;
    let domain_labels: Vec<&str> = dataset.domain().labels();
    for name in dataset.variables().keys() {
        let variable = dataset.variables().at(&name).unwrap();
        for dim in variable.dimensions().dims() {
            if dim.label.is_empty() {
                continue; // the raw structured byte axis is not a dataset axis
            }
            assert!(
                domain_labels.contains(&dim.label.as_str()),
                "{name} carries {} which is not in the dataset domain",
                dim.label
            );
        }
    }
}

#[tokio::test]
async fn shared_labels_agree_on_size() {
    let dataset = create_survey("agreement").await;
    for label in dataset.domain().labels() {
        let domain_interval = dataset.domain().interval(label).unwrap();
        for name in dataset.variables().keys() {
            let variable = dataset.variables().at(&name).unwrap();
            if let Some(interval) = variable.dimensions().interval(label) {
                assert_eq!(interval, domain_interval, "{name} disagrees on {label}");
            }
        }
    }
}

#[tokio::test]
async fn isel_shape_is_the_clamped_descriptor_size() {
    let dataset = create_survey("clamped").await;
    // [30, 60) clamps to [30, 40) on a size-40 axis.
    let sliced = dataset
        .isel(&[RangeDescriptor::new("inline", 30, 60)])
        .unwrap();
    let interval = sliced.domain().interval("inline").unwrap();
    assert_eq!(interval.inclusive_min, 30);
    assert_eq!(interval.exclusive_max, 40);
}

#[tokio::test]
async fn isel_composition_matches_combined_descriptors() {
    let dataset = create_survey("composition").await;
    let combined = dataset
        .isel(&[
            RangeDescriptor::new("inline", 5, 25),
            RangeDescriptor::new("depth", 0, 10),
        ])
        .unwrap();
    let sequential = dataset
        .isel(&[RangeDescriptor::new("inline", 5, 25)])
        .unwrap()
        .isel(&[RangeDescriptor::new("depth", 0, 10)])
        .unwrap();
    assert_eq!(combined.domain(), sequential.domain());
    for name in combined.variables().keys() {
        assert_eq!(
            combined.variables().at(&name).unwrap().dimensions(),
            sequential.variables().at(&name).unwrap().dimensions(),
            "{name}"
        );
    }
}

#[tokio::test]
async fn select_field_drops_exactly_the_byte_axis() {
    let mut dataset = create_survey("fieldrank").await;
    let raw = dataset.variables().at("headers").unwrap().clone();
    let raw_rank = raw.rank();
    let raw_intervals = raw.intervals(&["inline", "crossline"]).unwrap();

    let offset = dataset.select_field("headers", "offset").await.unwrap();
    assert_eq!(offset.rank(), raw_rank - 1);
    assert_eq!(offset.dtype(), DataType::Scalar(ScalarType::Float32));
    assert_eq!(
        offset.intervals(&["inline", "crossline"]).unwrap(),
        raw_intervals
    );
}

#[tokio::test]
async fn projection_domains_are_consistent() {
    let dataset = create_survey("projection").await;
    let projected = dataset.project("image").unwrap();
    // image + its dims + its coordinates (and their dims, transitively).
    let mut expected = vec![
        "cdp-x", "cdp-y", "crossline", "depth", "image", "inline",
    ];
    expected.sort_unstable();
    assert_eq!(projected.variables().keys(), expected);
    assert_eq!(
        projected.domain().interval("inline"),
        dataset.domain().interval("inline")
    );
}

#[tokio::test]
async fn num_samples_is_the_shape_product() {
    let dataset = create_survey("samples").await;
    let image = dataset.variables().at("image").unwrap();
    assert_eq!(image.num_samples(), 40 * 30 * 20);
    // The raw structured view counts its byte axis.
    let headers = dataset.variables().at("headers").unwrap();
    assert_eq!(headers.num_samples(), 40 * 30 * 8);
}

#[tokio::test]
async fn typed_variable_lookup_enforces_dtype() {
    let dataset = create_survey("typed").await;
    assert!(dataset.get_variable::<f32>("image").is_ok());
    assert!(matches!(
        dataset.get_variable::<i32>("image"),
        Err(seiscube::Error::TypeMismatch { .. })
    ));
    assert!(dataset.get_variable::<half::f16>("velocity").is_ok());
    // Raw structured variables are byte-typed.
    assert!(dataset.get_variable::<u8>("headers").is_ok());
}

#[tokio::test]
async fn dataset_intervals_filter_by_label() {
    let dataset = create_survey("intervals").await;
    let all = dataset.intervals(&[]).unwrap();
    assert_eq!(all.len(), 3);

    let some = dataset.intervals(&["depth", "bogus"]).unwrap();
    assert_eq!(some.len(), 1);
    assert_eq!(some[0].label, "depth");

    assert!(matches!(
        dataset.intervals(&["bogus"]),
        Err(seiscube::Error::UnknownDimension(_))
    ));
}

#[tokio::test]
async fn display_summarises_the_dataset() {
    let dataset = create_survey("display").await;
    let rendered = format!("{dataset}");
    assert!(rendered.contains("Metadata:"));
    assert!(rendered.contains("Variable: image"));
    assert!(rendered.contains("Domain:"));
    assert!(rendered.contains("Coordinates: cdp-x, cdp-y"));
}

#[tokio::test]
async fn backend_spec_documents_round_trip_variables() {
    let dataset = create_survey("specdoc").await;
    let image = dataset.variables().at("image").unwrap();
    let spec = image.spec();
    assert_eq!(spec["driver"], "zarr");
    assert_eq!(spec["kvstore"]["driver"], "memory");
    assert_eq!(spec["metadata"]["dtype"], "<f4");
    assert_eq!(spec["metadata"]["shape"], json!([40, 30, 20]));
    assert_eq!(spec["metadata"]["chunks"], json!([16, 16, 16]));

    let headers = dataset.variables().at("headers").unwrap();
    let spec = headers.spec();
    assert_eq!(
        spec["metadata"]["dtype"],
        json!([["cdp-x", "<i4"], ["offset", "<f4"]])
    );
}
