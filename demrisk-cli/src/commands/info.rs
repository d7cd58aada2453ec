use anyhow::{bail, Context, Result};
use demrisk::{geotiff, stats, ElevationStats};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct RasterInfo {
    file: String,
    file_size: u64,
    width: usize,
    height: usize,
    resolution: (f64, f64),
    origin: (f64, f64),
    bounds: [f64; 4],
    epsg: Option<u16>,
    nodata: Option<f64>,
    valid_count: usize,
    stats: Option<ElevationStats>,
}

pub fn run(raster: PathBuf, json: bool) -> Result<()> {
    if !raster.exists() {
        bail!("Raster not found: {}", raster.display());
    }

    let grid = geotiff::read_grid(&raster)
        .with_context(|| format!("Failed to read {}", raster.display()))?;
    let metadata = std::fs::metadata(&raster)?;

    let bounds = grid.bounds();
    let transform = grid.transform();
    let info = RasterInfo {
        file: raster
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| raster.display().to_string()),
        file_size: metadata.len(),
        width: grid.width(),
        height: grid.height(),
        resolution: grid.resolution(),
        origin: (transform.origin_x, transform.origin_y),
        bounds: [bounds.left, bounds.bottom, bounds.right, bounds.top],
        epsg: grid.epsg(),
        nodata: grid.nodata(),
        valid_count: grid.valid_count(),
        // An all-nodata raster is still worth describing
        stats: stats::stats(&grid).ok(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File:        {}", info.file);
    println!("File size:   {}", format_size(info.file_size));
    println!("Size:        {} x {}", info.width, info.height);
    println!(
        "Resolution:  {} x {}",
        info.resolution.0, info.resolution.1
    );
    println!("Origin:      ({}, {})", info.origin.0, info.origin.1);
    println!(
        "Bounds:      {}, {} .. {}, {}",
        info.bounds[0], info.bounds[1], info.bounds[2], info.bounds[3]
    );
    match info.epsg {
        Some(code) => println!("CRS:         EPSG:{}", code),
        None => println!("CRS:         unknown"),
    }
    match info.nodata {
        Some(nodata) => println!("Nodata:      {}", nodata),
        None => println!("Nodata:      none"),
    }
    println!();

    let total = (info.width * info.height) as f64;
    match &info.stats {
        Some(stats) => {
            println!("Min elevation:  {:.2}m", stats.min);
            println!("Max elevation:  {:.2}m", stats.max);
            println!("Mean elevation: {:.2}m", stats.mean);
            println!("Std deviation:  {:.2}m", stats.std);
            println!(
                "Valid cells:    {} ({:.1}%)",
                stats.valid_count,
                stats.valid_count as f64 / total * 100.0
            );
        }
        None => println!("No valid cells"),
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
