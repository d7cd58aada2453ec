use anyhow::{bail, Context, Result};
use demrisk::{risk, PipelineBuilder};
use geojson::{FeatureCollection, GeoJson};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct ScoreRow<'a> {
    index: usize,
    name: &'a str,
    risk: f64,
}

pub fn run(
    builder: PipelineBuilder,
    features: PathBuf,
    restricted: PathBuf,
    dem: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    let mut collection = read_collection(&features)?;
    let zones = read_collection(&restricted)?;

    if let Some(dir) = dem {
        let result = builder
            .build()
            .run(&dir)
            .with_context(|| format!("Failed to build DEM from {}", dir.display()))?;
        let slopes = risk::annotate_slopes(&mut collection, &result.grid, &result.slope);
        tracing::info!(features = slopes.len(), "Annotated feature slopes");
    }

    let scores = risk::score(&collection, &zones).context("Failed to score features")?;

    let Some(output_path) = out else {
        println!("{}", serde_json::to_string(&scores)?);
        return Ok(());
    };

    let extension = output_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "json" => write_json(&output_path, &scores)?,
        "csv" => write_csv(&output_path, &collection, &scores)?,
        "geojson" => write_geojson(&output_path, collection, &scores)?,
        _ => bail!(
            "Unsupported output format: {}. Use .json, .csv or .geojson",
            extension
        ),
    }

    println!("Output written to: {}", output_path.display());
    Ok(())
}

/// Read a GeoJSON file as a feature collection; a lone feature or geometry
/// becomes a collection of one.
fn read_collection(path: &Path) -> Result<FeatureCollection> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let geojson: GeoJson = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse GeoJSON in {}", path.display()))?;

    let features = match geojson {
        GeoJson::FeatureCollection(fc) => return Ok(fc),
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature::from(geometry)],
    };

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn write_json(path: &Path, scores: &[f64]) -> Result<()> {
    let file = File::create(path).context("Failed to create output file")?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, scores)?;
    writer.flush()?;
    Ok(())
}

fn write_csv(path: &Path, collection: &FeatureCollection, scores: &[f64]) -> Result<()> {
    let file = File::create(path).context("Failed to create output file")?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    for (index, (feature, &risk)) in collection.features.iter().zip(scores).enumerate() {
        writer.serialize(ScoreRow {
            index,
            name: risk::feature_name(feature),
            risk,
        })?;
    }

    writer.flush()?;
    Ok(())
}

fn write_geojson(path: &Path, mut collection: FeatureCollection, scores: &[f64]) -> Result<()> {
    for (feature, &risk) in collection.features.iter_mut().zip(scores) {
        feature.set_property("risk", risk);
    }

    let file = File::create(path).context("Failed to create output file")?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &collection)?;
    writer.flush()?;
    Ok(())
}
