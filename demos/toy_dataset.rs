//! Create a small seismic dataset, write a coordinate pattern, and read a
//! slice back.
//!
//! ```bash
//! cargo run --example toy_dataset -- /tmp/toy-seiscube
//! ```

use serde_json::json;

use seiscube::{Context, Dataset, OpenMode, RangeDescriptor, VariableData};

fn toy_spec() -> serde_json::Value {
    json!({
        "metadata": {
            "name": "toy",
            "apiVersion": "1.0.0",
            "createdOn": chrono::Utc::now().to_rfc3339(),
        },
        "variables": [
            {
                "name": "image",
                "dataType": "float32",
                "longName": "Stacked image",
                "dimensions": [
                    {"name": "inline", "size": 128},
                    {"name": "crossline", "size": 128},
                    {"name": "depth", "size": 64}
                ],
                "compressor": {"name": "blosc", "algorithm": "zstd", "level": 3},
                "metadata": {
                    "chunkGrid": {"name": "regular", "configuration": {"chunkShape": [32, 32, 32]}}
                }
            },
            {"name": "inline", "dataType": "uint32",
             "dimensions": [{"name": "inline", "size": 128}]},
            {"name": "crossline", "dataType": "uint32",
             "dimensions": [{"name": "crossline", "size": 128}]},
            {"name": "depth", "dataType": "uint32",
             "dimensions": [{"name": "depth", "size": 64}]}
        ]
    })
}

#[tokio::main]
async fn main() -> seiscube::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/tmp/toy-seiscube".to_string());
    let context = Context::default();

    let dataset = Dataset::from_json(&toy_spec(), &path, OpenMode::CreateClean, &context).await?;
    println!("created dataset:\n{dataset}");

    // Label the inline axis 1001, 1011, 1021, ...
    let inline = dataset.variables().get::<u32>("inline")?;
    let mut labels = VariableData::from_variable(&inline);
    for (index, value) in labels.as_mut_slice::<u32>()?.iter_mut().enumerate() {
        *value = 1001 + 10 * index as u32;
    }
    inline.write(&labels).await?;

    // Write a distance field into a corner of the image.
    let image = dataset.variables().get::<f32>("image")?;
    let corner = image.slice(&[
        RangeDescriptor::new("inline", 0, 32),
        RangeDescriptor::new("crossline", 0, 32),
        RangeDescriptor::new("depth", 0, 32),
    ])?;
    let mut block = VariableData::from_variable(&corner);
    {
        let values = block.as_mut_slice::<f32>()?;
        for x in 0..32usize {
            for y in 0..32usize {
                for z in 0..32usize {
                    values[(x * 32 + y) * 32 + z] = ((x * x + y * y + z * z) as f32).sqrt();
                }
            }
        }
    }
    corner.write(&block).await?;

    // Reopen and read the written region back.
    let reopened = Dataset::open(&path, &context).await?;
    let image = reopened.variables().get::<f32>("image")?;
    let sliced = image.slice(&[
        RangeDescriptor::new("inline", 10, 11),
        RangeDescriptor::new("crossline", 10, 11),
        RangeDescriptor::new("depth", 0, 32),
    ])?;
    let column = sliced.read().await?;
    println!(
        "image[10, 10, 0..32] starts with {:?}",
        &column.as_slice::<f32>()?[..4]
    );
    Ok(())
}
