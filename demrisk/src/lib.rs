//! # demrisk - DEM Mosaics, Terrain Derivatives and Risk Scoring
//!
//! Library for turning a directory of elevation tiles into one digital
//! elevation model, deriving slope and hillshade from it, and scoring vector
//! features by their proximity to restricted areas and the steepness of the
//! terrain they sit on.
//!
//! ## Features
//!
//! - **Mosaics**: Downsamples GeoTIFF tiles and merges them over their joint extent
//! - **Cached**: Results are keyed by a SHA-256 fingerprint of the tile bytes
//! - **Nodata aware**: Missing cells never leak into averages, gradients or statistics
//! - **Offline**: Works with local files only
//!
//! ## Quick Start
//!
//! ```ignore
//! use demrisk::{risk, Pipeline};
//!
//! let pipeline = Pipeline::builder().downsample_factor(8).build();
//! let result = pipeline.run("/data/site/tiles")?;
//! println!(
//!     "{} tiles, elevation {:.0}..{:.0}m",
//!     result.tiles_used, result.stats.min, result.stats.max
//! );
//!
//! let mut parcels: geojson::FeatureCollection = serde_json::from_str(&parcels_json)?;
//! let zones: geojson::FeatureCollection = serde_json::from_str(&zones_json)?;
//! risk::annotate_slopes(&mut parcels, &result.grid, &result.slope);
//! let scores = risk::score(&parcels, &zones)?;
//! ```
//!
//! ## Tile Format
//!
//! Tiles are single-band GeoTIFFs of any integer or floating-point sample
//! type. Georeferencing comes from the ModelTiepoint and ModelPixelScale tags,
//! the nodata value from `GDAL_NODATA`. Tiles are expected to share a
//! coordinate reference; nothing is reprojected.

pub mod cache;
pub mod error;
pub mod geometry;
pub mod geotiff;
pub mod grid;
pub mod mosaic;
pub mod pipeline;
pub mod risk;
pub mod stats;
pub mod terrain;
pub mod tileset;

// Re-export main types at crate root for convenience
pub use cache::{CacheStats, FingerprintCache};
pub use error::{Result, TerrainError};
pub use grid::{Field, GeoTransform, RasterGrid};
pub use mosaic::{MosaicBuilder, MosaicOutput, SkipReason, TileOutcome};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineResult};
pub use risk::RiskModel;
pub use stats::ElevationStats;
pub use terrain::SunPosition;
pub use tileset::{Fingerprint, TileSet};
