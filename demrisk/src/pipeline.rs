//! End-to-end terrain pipeline with fingerprint caching.
//!
//! [`Pipeline::run`] fingerprints a tile directory, and on a cache miss merges
//! the tiles, computes elevation statistics, derives slope and hillshade and
//! persists both next to the merged grid. Runs over unchanged tiles publishing
//! to the same output directory return the cached [`PipelineResult`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;

use crate::cache::{CacheStats, FingerprintCache, DEFAULT_CACHE_SIZE};
use crate::error::{Result, TerrainError};
use crate::geotiff;
use crate::grid::{Field, RasterGrid};
use crate::mosaic::{MosaicBuilder, DEFAULT_DOWNSAMPLE_FACTOR};
use crate::stats::{self, ElevationStats};
use crate::terrain::{self, SunPosition};
use crate::tileset::{Fingerprint, TileSet, HILLSHADE_FILENAME, MERGED_FILENAME, SLOPE_FILENAME};

/// Output of one successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Fingerprint of the tiles the result was computed from.
    pub fingerprint: Option<Fingerprint>,
    pub merged_path: PathBuf,
    pub grid: RasterGrid,
    pub stats: ElevationStats,
    pub slope: Field<f64>,
    pub hillshade: Field<u8>,
    pub slope_path: PathBuf,
    pub hillshade_path: PathBuf,
    pub tiles_used: usize,
    pub tiles_skipped: usize,
}

/// Cached mosaic and terrain derivation over tile directories.
///
/// # Example
///
/// ```ignore
/// use demrisk::Pipeline;
///
/// let pipeline = Pipeline::builder().cache_size(8).build();
/// let result = pipeline.run("/data/site")?;
/// println!("mean elevation {:.1}m", result.stats.mean);
///
/// // Unchanged tiles: served from the cache
/// let again = pipeline.run("/data/site")?;
/// ```
pub struct Pipeline {
    mosaic: MosaicBuilder,
    sun: SunPosition,
    cache: FingerprintCache<PipelineResult>,
    /// Key of the result whose rasters currently sit in each output directory.
    published: Cache<PathBuf, Option<Fingerprint>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        PipelineBuilder::new().build()
    }
}

impl Pipeline {
    /// Create a builder for more configuration options.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Run the pipeline over the tiles in `tile_dir`.
    ///
    /// # Errors
    ///
    /// - [`TerrainError::NoInput`] if the directory is missing or holds no tiles
    /// - [`TerrainError::DegenerateInput`] if the tiles hold no usable data
    /// - I/O and encoding errors while writing outputs
    pub fn run<P: AsRef<Path>>(&self, tile_dir: P) -> Result<Arc<PipelineResult>> {
        let tile_dir = tile_dir.as_ref();
        let tiles = self.mosaic.scan(tile_dir).map_err(|e| match e {
            TerrainError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                TerrainError::NoInput {
                    dir: tile_dir.to_path_buf(),
                }
            }
            other => other,
        })?;

        let fingerprint = match tiles.fingerprint() {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!(dir = %tile_dir.display(), error = %e, "Could not fingerprint tiles");
                None
            }
        };

        let output_dir = self.output_dir_for(&tiles)?;
        let key = fingerprint.as_ref().map(|f| f.scoped(&output_dir));
        if let Some(key) = &key {
            self.retire_if_overwritten(&output_dir, key);
        }

        let result = self
            .cache
            .get_or_compute(key.clone(), || self.compute(&tiles, fingerprint))?;
        self.published.insert(output_dir, key);
        Ok(result)
    }

    /// Canonical output directory for `tiles`, created if needed so that
    /// equivalent spellings of one directory share cache entries.
    fn output_dir_for(&self, tiles: &TileSet) -> Result<PathBuf> {
        let dir = self.mosaic.resolve_output_dir(tiles.dir());
        if tiles.is_empty() {
            return Ok(dir);
        }
        std::fs::create_dir_all(&dir)?;
        Ok(std::fs::canonicalize(&dir).unwrap_or(dir))
    }

    /// Drop the cached result for `key` when another tile set has written its
    /// outputs to `output_dir` since, leaving the cached paths pointing at
    /// someone else's rasters.
    fn retire_if_overwritten(&self, output_dir: &Path, key: &Fingerprint) {
        let Some(current) = self.published.get(output_dir) else {
            return;
        };
        if current.as_ref() != Some(key) && self.cache.contains(key) {
            tracing::debug!(
                dir = %output_dir.display(),
                "Outputs overwritten since last cached, recomputing"
            );
            self.cache.invalidate(key);
        }
    }

    fn compute(&self, tiles: &TileSet, fingerprint: Option<Fingerprint>) -> Result<PipelineResult> {
        tracing::info!(
            dir = %tiles.dir().display(),
            tiles = tiles.len(),
            fingerprint = fingerprint.as_ref().map(Fingerprint::as_str),
            "Running terrain pipeline"
        );

        let mosaic = self.mosaic.build_tiles(tiles)?;
        let grid = mosaic.grid;

        let stats = stats::stats(&grid)?;
        let slope = terrain::slope(&grid)?;
        let hillshade = terrain::hillshade(&grid, self.sun)?;

        let output_dir = self.mosaic.resolve_output_dir(tiles.dir());
        let slope_path = output_dir.join(SLOPE_FILENAME);
        let hillshade_path = output_dir.join(HILLSHADE_FILENAME);
        geotiff::write_field(&slope, &grid, &slope_path)?;
        geotiff::write_field_u8(&hillshade, &grid, &hillshade_path)?;

        tracing::info!(
            min = stats.min,
            max = stats.max,
            mean = stats.mean,
            slope = %slope_path.display(),
            hillshade = %hillshade_path.display(),
            "Terrain derivatives written"
        );

        Ok(PipelineResult {
            fingerprint,
            merged_path: mosaic.path,
            grid,
            stats,
            slope,
            hillshade,
            slope_path,
            hillshade_path,
            tiles_used: mosaic.tiles_used,
            tiles_skipped: mosaic.skipped.len(),
        })
    }

    /// The result cache, for inspection and invalidation.
    pub fn cache(&self) -> &FingerprintCache<PipelineResult> {
        &self.cache
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sun(&self) -> SunPosition {
        self.sun
    }

    pub fn downsample_factor(&self) -> usize {
        self.mosaic.factor()
    }
}

/// Builder for creating a [`Pipeline`] with custom configuration.
///
/// # Example
///
/// ```ignore
/// use demrisk::PipelineBuilder;
///
/// let pipeline = PipelineBuilder::from_env()
///     .output_dir("/data/out")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    cache_size: u64,
    downsample_factor: usize,
    output_dir: Option<PathBuf>,
    merged_filename: String,
    sun: SunPosition,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            downsample_factor: DEFAULT_DOWNSAMPLE_FACTOR,
            output_dir: None,
            merged_filename: MERGED_FILENAME.to_string(),
            sun: SunPosition::default(),
        }
    }

    /// Create a builder configured from environment variables.
    ///
    /// # Environment Variables
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `DEMRISK_CACHE_SIZE` | Maximum results in cache | 32 |
    /// | `DEMRISK_DOWNSAMPLE` | Tile downsampling factor | 8 |
    /// | `DEMRISK_OUTPUT_DIR` | Directory for merged grid and derivatives | tile directory |
    /// | `DEMRISK_AZIMUTH` | Hillshade sun azimuth (degrees) | 315 |
    /// | `DEMRISK_ALTITUDE` | Hillshade sun altitude (degrees) | 45 |
    ///
    /// Unset or unparsable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::new();

        Self {
            cache_size: env_or("DEMRISK_CACHE_SIZE", defaults.cache_size),
            downsample_factor: env_or("DEMRISK_DOWNSAMPLE", defaults.downsample_factor),
            output_dir: std::env::var_os("DEMRISK_OUTPUT_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            merged_filename: defaults.merged_filename,
            sun: SunPosition {
                azimuth: env_or("DEMRISK_AZIMUTH", defaults.sun.azimuth),
                altitude: env_or("DEMRISK_ALTITUDE", defaults.sun.altitude),
            },
        }
    }

    /// Set the maximum number of results to keep in cache.
    ///
    /// Default is 32.
    pub fn cache_size(mut self, size: u64) -> Self {
        self.cache_size = size;
        self
    }

    /// Set the integer factor tiles are downsampled by before merging.
    ///
    /// Default is 8.
    pub fn downsample_factor(mut self, factor: usize) -> Self {
        self.downsample_factor = factor;
        self
    }

    /// Write outputs to `dir` instead of the tile directory.
    pub fn output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the filename of the merged grid.
    pub fn merged_filename(mut self, name: impl Into<String>) -> Self {
        self.merged_filename = name.into();
        self
    }

    /// Set the hillshade sun azimuth in degrees.
    pub fn azimuth(mut self, degrees: f64) -> Self {
        self.sun.azimuth = degrees;
        self
    }

    /// Set the hillshade sun altitude in degrees.
    pub fn altitude(mut self, degrees: f64) -> Self {
        self.sun.altitude = degrees;
        self
    }

    /// Build the [`Pipeline`].
    pub fn build(self) -> Pipeline {
        let mut mosaic = MosaicBuilder::new()
            .downsample_factor(self.downsample_factor)
            .merged_filename(self.merged_filename);
        if let Some(dir) = self.output_dir {
            mosaic = mosaic.output_dir(dir);
        }

        Pipeline {
            mosaic,
            sun: self.sun,
            cache: FingerprintCache::new(self.cache_size),
            published: Cache::builder().build(),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
