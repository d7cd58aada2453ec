//! In-memory elevation rasters.
//!
//! This module provides [`RasterGrid`], a single-band elevation raster with an
//! axis-aligned [`GeoTransform`], and [`Field`], a derived raster-shaped array
//! (slope, hillshade) that shares its parent grid's geometry.

use crate::error::{Result, TerrainError};

/// Nodata value used when a source raster does not declare one.
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Axis-aligned affine transform from pixel to world coordinates.
///
/// `x = origin_x + col * pixel_width`, `y = origin_y + row * pixel_height`.
/// North-up rasters have a negative `pixel_height`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// World X of the top-left corner of the top-left pixel.
    pub origin_x: f64,
    /// World Y of the top-left corner of the top-left pixel.
    pub origin_y: f64,
    /// Pixel size along X (positive).
    pub pixel_width: f64,
    /// Pixel size along Y (negative for north-up).
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Create a north-up transform from a top-left corner and a positive pixel size.
    pub fn north_up(origin_x: f64, origin_y: f64, res_x: f64, res_y: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width: res_x,
            pixel_height: -res_y.abs(),
        }
    }

    /// Returns `(res_x, res_y)`, both positive.
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    /// Same origin, pixel size multiplied by `(scale_x, scale_y)`.
    pub fn scaled(&self, scale_x: f64, scale_y: f64) -> Self {
        Self {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            pixel_width: self.pixel_width * scale_x,
            pixel_height: self.pixel_height * scale_y,
        }
    }

    /// World coordinates of the centre of pixel `(row, col)`.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional `(row, col)` of a world coordinate.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.origin_y) / self.pixel_height,
            (x - self.origin_x) / self.pixel_width,
        )
    }
}

/// World-space extent of a raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    /// Smallest extent covering both `self` and `other`.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }
}

/// A single-band elevation raster.
///
/// Samples are stored row-major, row 0 being the north edge. Cells equal to
/// [`nodata`](Self::nodata) and NaN cells are treated as missing everywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    data: Vec<f64>,
    width: usize,
    height: usize,
    transform: GeoTransform,
    nodata: Option<f64>,
    epsg: Option<u16>,
}

impl RasterGrid {
    /// Create a grid, checking that the sample count matches the dimensions.
    pub fn new(
        data: Vec<f64>,
        width: usize,
        height: usize,
        transform: GeoTransform,
        nodata: Option<f64>,
    ) -> Result<Self> {
        if data.len() != width * height {
            return Err(TerrainError::degenerate(format!(
                "grid holds {} samples, expected {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            transform,
            nodata,
            epsg: None,
        })
    }

    /// Attach an EPSG code as the grid's coordinate reference.
    pub fn with_epsg(mut self, epsg: Option<u16>) -> Self {
        self.epsg = epsg;
        self
    }

    /// Returns the raw samples, row-major.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    /// EPSG code of the coordinate reference, when known.
    pub fn epsg(&self) -> Option<u16> {
        self.epsg
    }

    /// Returns `(res_x, res_y)`.
    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }

    /// Sample at `(row, col)`, or `None` when out of range or missing.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        let v = self.data[row * self.width + col];
        if self.is_valid(v) {
            Some(v)
        } else {
            None
        }
    }

    /// Whether a sample value counts as data (not nodata, not NaN).
    pub fn is_valid(&self, value: f64) -> bool {
        is_valid_sample(value, self.nodata)
    }

    /// Number of valid samples.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| self.is_valid(**v)).count()
    }

    /// Copy of the samples with every missing cell replaced by NaN.
    pub fn to_nan_masked(&self) -> Vec<f64> {
        self.data
            .iter()
            .map(|&v| if self.is_valid(v) { v } else { f64::NAN })
            .collect()
    }

    /// World extent covered by the grid.
    pub fn bounds(&self) -> Bounds {
        let t = &self.transform;
        let x0 = t.origin_x;
        let x1 = t.origin_x + self.width as f64 * t.pixel_width;
        let y0 = t.origin_y;
        let y1 = t.origin_y + self.height as f64 * t.pixel_height;
        Bounds {
            left: x0.min(x1),
            right: x0.max(x1),
            bottom: y0.min(y1),
            top: y0.max(y1),
        }
    }
}

/// Whether `value` is a usable sample given an optional nodata sentinel.
pub(crate) fn is_valid_sample(value: f64, nodata: Option<f64>) -> bool {
    !value.is_nan() && nodata.map_or(true, |nd| value != nd)
}

/// A raster-shaped array derived from a [`RasterGrid`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field<T> {
    /// Samples, row-major, same shape as the source grid.
    pub values: Vec<T>,
    pub width: usize,
    pub height: usize,
}

impl<T: Copy> Field<T> {
    /// Value at `(row, col)`, or `None` when out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row < self.height && col < self.width {
            Some(self.values[row * self.width + col])
        } else {
            None
        }
    }
}
