//! Downsample and merge a directory of elevation tiles into one grid.
//!
//! Each tile is reduced by an integer factor with nodata-aware area
//! averaging, then the survivors are merged over the union of their extents.
//! Where tiles overlap, the first tile in path order wins.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TerrainError};
use crate::geotiff;
use crate::grid::{Bounds, GeoTransform, RasterGrid, DEFAULT_NODATA};
use crate::tileset::{TileSet, HILLSHADE_FILENAME, MERGED_FILENAME, SLOPE_FILENAME};

/// Default downsampling factor applied to every tile before merging.
pub const DEFAULT_DOWNSAMPLE_FACTOR: usize = 8;

/// Why a tile did not take part in the merge.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The file could not be opened or decoded as a GeoTIFF.
    Unreadable(String),
    /// The downsampled tile has fewer than 2 rows or columns.
    TooSmall { width: usize, height: usize },
    /// Every downsampled cell is nodata or NaN.
    NoValidData,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Unreadable(message) => write!(f, "unreadable: {}", message),
            SkipReason::TooSmall { width, height } => {
                write!(f, "too small after downsampling ({}x{})", width, height)
            }
            SkipReason::NoValidData => f.write_str("no valid data"),
        }
    }
}

/// Result of preparing one tile for the merge.
#[derive(Debug, Clone)]
pub enum TileOutcome {
    Ready(RasterGrid),
    Skipped(SkipReason),
}

/// A merged elevation grid and where it was written.
#[derive(Debug, Clone)]
pub struct MosaicOutput {
    pub grid: RasterGrid,
    /// Path of the persisted merged GeoTIFF.
    pub path: PathBuf,
    /// Number of tiles that contributed to the merge.
    pub tiles_used: usize,
    /// Tiles left out, with the reason.
    pub skipped: Vec<(PathBuf, SkipReason)>,
}

/// Builds a single elevation grid from a directory of tiles.
///
/// # Example
///
/// ```ignore
/// use demrisk::MosaicBuilder;
///
/// let mosaic = MosaicBuilder::new().downsample_factor(4).build("/data/site")?;
/// println!("{} tiles -> {}", mosaic.tiles_used, mosaic.path.display());
/// ```
#[derive(Debug, Clone)]
pub struct MosaicBuilder {
    factor: usize,
    output_dir: Option<PathBuf>,
    merged_filename: String,
}

impl Default for MosaicBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MosaicBuilder {
    pub fn new() -> Self {
        Self {
            factor: DEFAULT_DOWNSAMPLE_FACTOR,
            output_dir: None,
            merged_filename: MERGED_FILENAME.to_string(),
        }
    }

    /// Set the integer downsampling factor. Default is 8; 1 keeps full resolution.
    pub fn downsample_factor(mut self, factor: usize) -> Self {
        self.factor = factor;
        self
    }

    /// Write the merged grid to `dir` instead of the tile directory.
    pub fn output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the filename of the merged grid. Default is `merged_dem.tif`.
    pub fn merged_filename(mut self, name: impl Into<String>) -> Self {
        self.merged_filename = name.into();
        self
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Filenames in the tile directory that are outputs, not inputs.
    pub fn excluded_names(&self) -> [&str; 3] {
        [self.merged_filename.as_str(), SLOPE_FILENAME, HILLSHADE_FILENAME]
    }

    /// Directory the merged grid is written to for tiles found in `tile_dir`.
    pub fn resolve_output_dir(&self, tile_dir: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| tile_dir.to_path_buf())
    }

    /// Scan `tile_dir` for tiles the way [`build`](Self::build) does.
    pub fn scan<P: AsRef<Path>>(&self, tile_dir: P) -> Result<TileSet> {
        TileSet::scan(tile_dir, &self.excluded_names())
    }

    /// Merge every tile in `tile_dir` and persist the result.
    ///
    /// # Errors
    ///
    /// - [`TerrainError::NoInput`] if the directory holds no tiles
    /// - [`TerrainError::DegenerateInput`] if no tile survives downsampling or
    ///   the merged grid holds no valid cell
    /// - I/O and encoding errors while writing outputs
    pub fn build<P: AsRef<Path>>(&self, tile_dir: P) -> Result<MosaicOutput> {
        let tile_dir = tile_dir.as_ref();
        let tiles = self.scan(tile_dir)?;
        self.build_tiles(&tiles)
    }

    /// Merge an already scanned [`TileSet`] and persist the result.
    pub fn build_tiles(&self, tiles: &TileSet) -> Result<MosaicOutput> {
        if tiles.is_empty() {
            return Err(TerrainError::NoInput {
                dir: tiles.dir().to_path_buf(),
            });
        }
        if self.factor == 0 {
            return Err(TerrainError::degenerate("downsample factor must be at least 1"));
        }

        let output_dir = self.resolve_output_dir(tiles.dir());
        std::fs::create_dir_all(&output_dir)?;

        // Private per-build directory so concurrent builds never share intermediates
        let workdir = tempfile::Builder::new()
            .prefix(".mosaic-")
            .tempdir_in(&output_dir)?;

        match self.merge_into(tiles, workdir.path(), &output_dir) {
            Ok(output) => {
                workdir.close()?;
                Ok(output)
            }
            Err(e) => {
                let kept = workdir.keep();
                tracing::warn!(
                    workdir = %kept.display(),
                    error = %e,
                    "Mosaic failed, keeping intermediates"
                );
                Err(e)
            }
        }
    }

    fn merge_into(&self, tiles: &TileSet, workdir: &Path, output_dir: &Path) -> Result<MosaicOutput> {
        let mut ready = Vec::new();
        let mut skipped = Vec::new();

        for path in tiles.paths() {
            match self.prepare_tile(path, workdir)? {
                TileOutcome::Ready(grid) => ready.push(grid),
                TileOutcome::Skipped(reason) => {
                    tracing::warn!(tile = %path.display(), %reason, "Skipping tile");
                    skipped.push((path.clone(), reason));
                }
            }
        }

        if ready.is_empty() {
            return Err(TerrainError::degenerate(format!(
                "none of the {} tiles in {} holds usable data",
                tiles.len(),
                tiles.dir().display()
            )));
        }

        let grid = merge(&ready)?;
        let path = output_dir.join(&self.merged_filename);
        geotiff::write_grid(&grid, &path)?;

        tracing::info!(
            path = %path.display(),
            width = grid.width(),
            height = grid.height(),
            tiles_used = ready.len(),
            tiles_skipped = skipped.len(),
            "Wrote merged DEM"
        );

        Ok(MosaicOutput {
            grid,
            path,
            tiles_used: ready.len(),
            skipped,
        })
    }

    /// Decode, downsample and validate one tile, leaving the downsampled copy
    /// in `workdir`.
    fn prepare_tile(&self, path: &Path, workdir: &Path) -> Result<TileOutcome> {
        let grid = match geotiff::read_grid(path) {
            Ok(grid) => grid,
            Err(e) => return Ok(TileOutcome::Skipped(SkipReason::Unreadable(e.to_string()))),
        };

        let small = downsample(&grid, self.factor)?;
        if small.width() < 2 || small.height() < 2 {
            return Ok(TileOutcome::Skipped(SkipReason::TooSmall {
                width: small.width(),
                height: small.height(),
            }));
        }
        if small.valid_count() == 0 {
            return Ok(TileOutcome::Skipped(SkipReason::NoValidData));
        }

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tile".to_string());
        geotiff::write_grid(&small, workdir.join(format!("{}_small.tif", stem)))?;

        Ok(TileOutcome::Ready(small))
    }
}

/// Reduce `grid` by `factor` along both axes with nodata-aware area averaging.
///
/// The output is `width / factor` by `height / factor` cells. Each output cell
/// is the mean of the valid source cells it covers, or nodata (NaN when the
/// grid has no nodata value) if it covers none. The origin is unchanged and
/// the pixel size grows by `width / out_width` and `height / out_height`.
pub fn downsample(grid: &RasterGrid, factor: usize) -> Result<RasterGrid> {
    if factor == 0 {
        return Err(TerrainError::degenerate("downsample factor must be at least 1"));
    }

    let (width, height) = (grid.width(), grid.height());
    let out_width = width / factor;
    let out_height = height / factor;
    let missing = grid.nodata().unwrap_or(f64::NAN);

    let scale_x = if out_width > 0 {
        width as f64 / out_width as f64
    } else {
        factor as f64
    };
    let scale_y = if out_height > 0 {
        height as f64 / out_height as f64
    } else {
        factor as f64
    };

    let mut data = Vec::with_capacity(out_width * out_height);
    for out_row in 0..out_height {
        let row_start = (out_row as f64 * scale_y) as usize;
        let row_end = (((out_row + 1) as f64 * scale_y) as usize).min(height);
        for out_col in 0..out_width {
            let col_start = (out_col as f64 * scale_x) as usize;
            let col_end = (((out_col + 1) as f64 * scale_x) as usize).min(width);

            let mut sum = 0.0;
            let mut count = 0usize;
            for row in row_start..row_end {
                for col in col_start..col_end {
                    if let Some(v) = grid.get(row, col) {
                        sum += v;
                        count += 1;
                    }
                }
            }
            data.push(if count > 0 { sum / count as f64 } else { missing });
        }
    }

    let transform = grid.transform().scaled(scale_x, scale_y);
    Ok(RasterGrid::new(data, out_width, out_height, transform, grid.nodata())?.with_epsg(grid.epsg()))
}

/// Merge grids over the union of their extents, first grid wins on overlap.
///
/// The output uses the first grid's resolution, coordinate reference and
/// nodata value (`-9999` when it has none). Cells are sampled by nearest
/// neighbour, so grids at other resolutions are not reprojected, only
/// resampled.
pub fn merge(grids: &[RasterGrid]) -> Result<RasterGrid> {
    let Some(first) = grids.first() else {
        return Err(TerrainError::degenerate("nothing to merge"));
    };

    let (res_x, res_y) = first.resolution();
    let nodata = first.nodata().unwrap_or(DEFAULT_NODATA);
    let extent = grids
        .iter()
        .skip(1)
        .fold(first.bounds(), |acc, g| acc.union(&g.bounds()));

    let width = ((extent.right - extent.left) / res_x).round() as usize;
    let height = ((extent.top - extent.bottom) / res_y).round() as usize;
    let transform = GeoTransform::north_up(extent.left, extent.top, res_x, res_y);

    let mut data = vec![nodata; width * height];
    let mut filled = vec![false; width * height];

    for grid in grids {
        let (rows, cols) = covered_cells(&grid.bounds(), &extent, res_x, res_y, width, height);
        for row in rows {
            for col in cols.clone() {
                let i = row * width + col;
                if filled[i] {
                    continue;
                }
                let (x, y) = transform.pixel_center(row, col);
                let (src_row, src_col) = grid.transform().world_to_pixel(x, y);
                if src_row < 0.0 || src_col < 0.0 {
                    continue;
                }
                if let Some(v) = grid.get(src_row.floor() as usize, src_col.floor() as usize) {
                    data[i] = v;
                    filled[i] = true;
                }
            }
        }
    }

    if !filled.iter().any(|&f| f) {
        return Err(TerrainError::degenerate(
            "merged grid holds no valid elevation",
        ));
    }

    Ok(RasterGrid::new(data, width, height, transform, Some(nodata))?.with_epsg(first.epsg()))
}

/// Output rows and columns that `bounds` overlaps within `extent`.
fn covered_cells(
    bounds: &Bounds,
    extent: &Bounds,
    res_x: f64,
    res_y: f64,
    width: usize,
    height: usize,
) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
    let col_start = ((bounds.left - extent.left) / res_x).floor().max(0.0) as usize;
    let col_end = (((bounds.right - extent.left) / res_x).ceil().max(0.0) as usize).min(width);
    let row_start = ((extent.top - bounds.top) / res_y).floor().max(0.0) as usize;
    let row_end = (((extent.top - bounds.bottom) / res_y).ceil().max(0.0) as usize).min(height);
    (row_start..row_end, col_start..col_end)
}
