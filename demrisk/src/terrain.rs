//! Slope and hillshade derived from an elevation grid.
//!
//! Gradients follow the usual finite-difference convention: central
//! differences in the interior, one-sided differences on the edges, spacing
//! equal to the pixel resolution (rows use `res_y`, columns use `res_x`).
//! Missing cells enter the computation as NaN, so every output cell whose
//! stencil touches one is undefined as well.
//!
//! # Example
//!
//! ```ignore
//! use demrisk::terrain::{hillshade, slope, SunPosition};
//!
//! let grid = demrisk::geotiff::read_grid("merged_dem.tif")?;
//! let slope = slope(&grid)?;
//! let shade = hillshade(&grid, SunPosition::default())?;
//! ```

use crate::error::{Result, TerrainError};
use crate::grid::{Field, RasterGrid};

/// Hillshade value used for every cell when the illumination has no range.
pub const FLAT_SHADE: u8 = 128;

/// Sun direction for hillshading, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunPosition {
    /// Direction of the light source; the default 315 lights north-west facing slopes.
    pub azimuth: f64,
    /// Angle of the light source above the horizon.
    pub altitude: f64,
}

impl Default for SunPosition {
    fn default() -> Self {
        Self {
            azimuth: 315.0,
            altitude: 45.0,
        }
    }
}

/// Slope in degrees for every cell of `grid`. Undefined cells are NaN.
///
/// # Errors
///
/// Returns [`TerrainError::DegenerateInput`] if the grid is narrower or
/// shorter than 2 cells, or its resolution is not positive.
pub fn slope(grid: &RasterGrid) -> Result<Field<f64>> {
    slope_from_elevation(
        &grid.to_nan_masked(),
        grid.width(),
        grid.height(),
        grid.resolution(),
    )
}

/// Slope in degrees over a raw row-major elevation field (NaN = missing).
pub fn slope_from_elevation(
    elevation: &[f64],
    width: usize,
    height: usize,
    resolution: (f64, f64),
) -> Result<Field<f64>> {
    let (d_row, d_col) = gradient(elevation, width, height, resolution)?;
    let values = d_row
        .iter()
        .zip(&d_col)
        .map(|(r, c)| (r * r + c * c).sqrt().atan().to_degrees())
        .collect();

    Ok(Field {
        values,
        width,
        height,
    })
}

/// 8-bit hillshade of `grid` lit from `sun`.
///
/// Illumination is min-max stretched to `0..=255` over the defined cells;
/// a zero range yields [`FLAT_SHADE`] everywhere. Undefined cells are 0.
pub fn hillshade(grid: &RasterGrid, sun: SunPosition) -> Result<Field<u8>> {
    hillshade_from_elevation(
        &grid.to_nan_masked(),
        grid.width(),
        grid.height(),
        grid.resolution(),
        sun,
    )
}

/// 8-bit hillshade over a raw row-major elevation field (NaN = missing).
pub fn hillshade_from_elevation(
    elevation: &[f64],
    width: usize,
    height: usize,
    resolution: (f64, f64),
    sun: SunPosition,
) -> Result<Field<u8>> {
    let (d_row, d_col) = gradient(elevation, width, height, resolution)?;

    let azimuth = sun.azimuth.to_radians();
    let altitude = sun.altitude.to_radians();

    let shade: Vec<f64> = d_row
        .iter()
        .zip(&d_col)
        .map(|(&r, &c)| {
            let slope = std::f64::consts::FRAC_PI_2 - (r * r + c * c).sqrt().atan();
            let aspect = (-r).atan2(c);
            altitude.sin() * slope.sin()
                + altitude.cos() * slope.cos() * (azimuth - aspect).cos()
        })
        .collect();

    Ok(Field {
        values: stretch_to_u8(&shade),
        width,
        height,
    })
}

/// Linear min-max stretch of the finite values to `0..=255`.
fn stretch_to_u8(values: &[f64]) -> Vec<u8> {
    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                0
            } else if range <= 0.0 {
                FLAT_SHADE
            } else {
                // Truncating cast, like a uint8 conversion
                (255.0 * (v - min) / range) as u8
            }
        })
        .collect()
}

/// Finite-difference gradient along rows and columns.
fn gradient(
    values: &[f64],
    width: usize,
    height: usize,
    resolution: (f64, f64),
) -> Result<(Vec<f64>, Vec<f64>)> {
    let (res_x, res_y) = resolution;
    if width < 2 || height < 2 {
        return Err(TerrainError::degenerate(format!(
            "gradient needs at least 2x2 cells, got {}x{}",
            width, height
        )));
    }
    if !(res_x > 0.0 && res_y > 0.0 && res_x.is_finite() && res_y.is_finite()) {
        return Err(TerrainError::degenerate(format!(
            "resolution must be positive, got ({}, {})",
            res_x, res_y
        )));
    }
    if values.len() != width * height {
        return Err(TerrainError::degenerate(format!(
            "field holds {} samples, expected {}x{}",
            values.len(),
            width,
            height
        )));
    }

    let at = |row: usize, col: usize| values[row * width + col];
    let mut d_row = vec![0.0; values.len()];
    let mut d_col = vec![0.0; values.len()];

    for row in 0..height {
        for col in 0..width {
            let i = row * width + col;

            d_row[i] = if row == 0 {
                (at(1, col) - at(0, col)) / res_y
            } else if row == height - 1 {
                (at(row, col) - at(row - 1, col)) / res_y
            } else {
                (at(row + 1, col) - at(row - 1, col)) / (2.0 * res_y)
            };

            d_col[i] = if col == 0 {
                (at(row, 1) - at(row, 0)) / res_x
            } else if col == width - 1 {
                (at(row, col) - at(row, col - 1)) / res_x
            } else {
                (at(row, col + 1) - at(row, col - 1)) / (2.0 * res_x)
            };
        }
    }

    Ok((d_row, d_col))
}
