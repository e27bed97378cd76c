//! Structured headers: write full records, then project single fields.
//!
//! ```bash
//! cargo run --example header_fields -- /tmp/headers-seiscube
//! ```

use serde_json::json;

use seiscube::{Context, Dataset, OpenMode, RangeDescriptor};

fn spec() -> serde_json::Value {
    json!({
        "metadata": {
            "name": "headers-demo",
            "apiVersion": "1.0.0",
            "createdOn": chrono::Utc::now().to_rfc3339(),
        },
        "variables": [
            {
                "name": "headers",
                "dataType": {"fields": [
                    {"name": "cdp-x", "format": "int32"},
                    {"name": "cdp-y", "format": "int32"},
                    {"name": "elevation", "format": "float16"},
                    {"name": "some_scalar", "format": "float16"}
                ]},
                "dimensions": [
                    {"name": "inline", "size": 64},
                    {"name": "crossline", "size": 64}
                ],
                "metadata": {
                    "chunkGrid": {"name": "regular", "configuration": {"chunkShape": [32, 32]}}
                }
            },
            {"name": "inline", "dataType": "uint32",
             "dimensions": [{"name": "inline", "size": 64}]},
            {"name": "crossline", "dataType": "uint32",
             "dimensions": [{"name": "crossline", "size": 64}]}
        ]
    })
}

#[tokio::main]
async fn main() -> seiscube::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/headers-seiscube".to_string());
    let context = Context::default();

    let mut dataset = Dataset::from_json(&spec(), &path, OpenMode::CreateClean, &context).await?;

    // The raw view exposes records as bytes with a trailing byte axis.
    let headers = dataset.variables().at("headers")?;
    println!(
        "raw view: rank {} over {} ({} bytes per record)",
        headers.rank(),
        headers.dimensions(),
        headers.dimensions().dims().last().map_or(0, |dim| dim.size),
    );

    // Project one field; the byte axis drops and the dtype narrows.
    let cdp_x = dataset.select_field("headers", "cdp-x").await?;
    println!("cdp-x view: rank {}, dtype {}", cdp_x.rank(), cdp_x.dtype());

    // Populate cdp-x for the first inline.
    let row = cdp_x.slice(&[RangeDescriptor::new("inline", 0, 1)])?;
    let mut buffer = row.read().await?;
    for (offset, value) in buffer.as_mut_slice::<i32>()?.iter_mut().enumerate() {
        *value = 640_000 + 25 * offset as i32;
    }
    row.write(&buffer).await?;

    // Sibling fields are untouched by field-projected writes.
    let elevation = dataset.select_field("headers", "elevation").await?;
    let elevations = elevation
        .slice(&[RangeDescriptor::new("inline", 0, 1)])?
        .read()
        .await?;
    let first = elevations.as_slice::<half::f16>()?[0];
    println!("elevation[0, 0] = {first} (fill value)");
    Ok(())
}
