use anyhow::{Context, Result};
use demrisk::{ElevationStats, PipelineBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct BuildSummary<'a> {
    dir: &'a Path,
    fingerprint: Option<&'a str>,
    merged: &'a Path,
    slope: &'a Path,
    hillshade: &'a Path,
    width: usize,
    height: usize,
    resolution: (f64, f64),
    epsg: Option<u16>,
    tiles_used: usize,
    tiles_skipped: usize,
    stats: &'a ElevationStats,
}

pub fn run(builder: PipelineBuilder, dirs: Vec<PathBuf>, json: bool) -> Result<()> {
    let pipeline = builder.build();

    for dir in &dirs {
        let result = pipeline
            .run(dir)
            .with_context(|| format!("Failed to build DEM from {}", dir.display()))?;

        let summary = BuildSummary {
            dir,
            fingerprint: result.fingerprint.as_ref().map(|f| f.as_str()),
            merged: &result.merged_path,
            slope: &result.slope_path,
            hillshade: &result.hillshade_path,
            width: result.grid.width(),
            height: result.grid.height(),
            resolution: result.grid.resolution(),
            epsg: result.grid.epsg(),
            tiles_used: result.tiles_used,
            tiles_skipped: result.tiles_skipped,
            stats: &result.stats,
        };

        if json {
            println!("{}", serde_json::to_string(&summary)?);
        } else {
            print_summary(&summary);
        }
    }

    let stats = pipeline.cache_stats();
    tracing::debug!(
        hits = stats.hit_count,
        misses = stats.miss_count,
        hit_rate = stats.hit_rate(),
        "Cache usage"
    );

    Ok(())
}

fn print_summary(summary: &BuildSummary) {
    println!("Tiles:        {}", summary.dir.display());
    if let Some(fingerprint) = summary.fingerprint {
        println!("Fingerprint:  {}", fingerprint);
    }
    println!(
        "Tiles used:   {} ({} skipped)",
        summary.tiles_used, summary.tiles_skipped
    );
    println!("Size:         {} x {}", summary.width, summary.height);
    println!(
        "Resolution:   {} x {}",
        summary.resolution.0, summary.resolution.1
    );
    match summary.epsg {
        Some(code) => println!("CRS:          EPSG:{}", code),
        None => println!("CRS:          unknown"),
    }
    println!();
    println!("Merged DEM:   {}", summary.merged.display());
    println!("Slope:        {}", summary.slope.display());
    println!("Hillshade:    {}", summary.hillshade.display());
    println!();

    let stats = summary.stats;
    println!("Min elevation:  {:.2}m", stats.min);
    println!("Max elevation:  {:.2}m", stats.max);
    println!("Mean elevation: {:.2}m", stats.mean);
    println!("Std deviation:  {:.2}m", stats.std);
    println!("2nd-98th pct:   {:.2}m .. {:.2}m", stats.p2, stats.p98);
    println!("Valid cells:    {}", stats.valid_count);
    println!();
}
