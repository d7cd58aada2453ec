//! Summary statistics over valid elevation cells.

use serde::Serialize;

use crate::error::{Result, TerrainError};
use crate::grid::{is_valid_sample, RasterGrid};

/// Elevation statistics over the cells that are neither nodata nor NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ElevationStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// 2nd percentile, the usual lower bound of an elevation colour ramp.
    pub p2: f64,
    /// 98th percentile, the usual upper bound of an elevation colour ramp.
    pub p98: f64,
    /// Number of cells the statistics were computed over.
    pub valid_count: usize,
}

/// Compute statistics over a grid's valid cells.
///
/// # Errors
///
/// Returns [`TerrainError::EmptyData`] if every cell is nodata or NaN.
pub fn stats(grid: &RasterGrid) -> Result<ElevationStats> {
    stats_from_values(grid.data(), grid.nodata())
}

/// Compute statistics over raw samples, skipping `nodata` and NaN.
pub fn stats_from_values(values: &[f64], nodata: Option<f64>) -> Result<ElevationStats> {
    let mut valid: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| is_valid_sample(*v, nodata))
        .collect();
    if valid.is_empty() {
        return Err(TerrainError::EmptyData);
    }

    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    valid.sort_by(f64::total_cmp);
    let min = valid[0];
    let max = valid[valid.len() - 1];

    Ok(ElevationStats {
        min,
        max,
        // Summation error can push the mean a hair outside [min, max] on constant data
        mean: mean.clamp(min, max),
        std: variance.sqrt(),
        p2: percentile_sorted(&valid, 2.0),
        p98: percentile_sorted(&valid, 98.0),
        valid_count: valid.len(),
    })
}

/// Linear-interpolated percentile (`0..=100`) of the valid samples.
///
/// Returns `None` if there are no valid samples.
pub fn percentile(values: &[f64], nodata: Option<f64>, pct: f64) -> Option<f64> {
    let mut valid: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| is_valid_sample(*v, nodata))
        .collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(f64::total_cmp);
    Some(percentile_sorted(&valid, pct))
}

fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
