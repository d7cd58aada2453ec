//! Error types for the demrisk library.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while building mosaics, deriving terrain or scoring risk.
#[derive(Error, Debug)]
pub enum TerrainError {
    /// IO error when reading or writing files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// A raster is structurally unusable (missing georeferencing, bad dimensions).
    #[error("Invalid raster {path}: {message}")]
    InvalidRaster { path: PathBuf, message: String },

    /// No qualifying raster tiles were found.
    #[error("No raster tiles found in {dir}")]
    NoInput { dir: PathBuf },

    /// Input exists but holds no usable data (all nodata/NaN, or too small).
    #[error("Degenerate input: {message}")]
    DegenerateInput { message: String },

    /// A single feature geometry could not be interpreted.
    #[error("Invalid geometry: {message}")]
    InvalidGeometry { message: String },

    /// Statistics were requested over a grid with no valid cells.
    #[error("No valid cells to compute statistics over")]
    EmptyData,

    /// The restricted-area layer contains no usable geometry.
    #[error("Restricted-area layer contains no valid geometry")]
    NoRestrictedGeometry,

    /// Failure of a computation that another caller was already running.
    #[error(transparent)]
    Shared(Arc<TerrainError>),
}

impl TerrainError {
    /// Whether the caller has to supply different input to get a result.
    ///
    /// `false` means the failure happened while producing output (I/O, encoding).
    pub fn is_input_error(&self) -> bool {
        match self {
            TerrainError::InvalidRaster { .. }
            | TerrainError::NoInput { .. }
            | TerrainError::DegenerateInput { .. }
            | TerrainError::InvalidGeometry { .. }
            | TerrainError::EmptyData
            | TerrainError::NoRestrictedGeometry => true,
            TerrainError::Io(_) | TerrainError::Tiff(_) => false,
            TerrainError::Shared(inner) => inner.is_input_error(),
        }
    }

    /// Recover an owned error from one shared between callers of a cached
    /// computation.
    ///
    /// The cache keeps its own reference to a failed computation's error, so
    /// the shared value is rebuilt variant by variant. Only TIFF errors, which
    /// cannot be rebuilt, stay wrapped in [`TerrainError::Shared`].
    pub fn from_shared(shared: Arc<TerrainError>) -> Self {
        let shared = match Arc::try_unwrap(shared) {
            Ok(owned) => return owned,
            Err(shared) => shared,
        };
        match &*shared {
            TerrainError::Io(e) => TerrainError::Io(std::io::Error::new(e.kind(), e.to_string())),
            TerrainError::Tiff(_) => TerrainError::Shared(Arc::clone(&shared)),
            TerrainError::InvalidRaster { path, message } => TerrainError::InvalidRaster {
                path: path.clone(),
                message: message.clone(),
            },
            TerrainError::NoInput { dir } => TerrainError::NoInput { dir: dir.clone() },
            TerrainError::DegenerateInput { message } => TerrainError::degenerate(message.clone()),
            TerrainError::InvalidGeometry { message } => {
                TerrainError::invalid_geometry(message.clone())
            }
            TerrainError::EmptyData => TerrainError::EmptyData,
            TerrainError::NoRestrictedGeometry => TerrainError::NoRestrictedGeometry,
            TerrainError::Shared(inner) => TerrainError::from_shared(Arc::clone(inner)),
        }
    }

    pub(crate) fn degenerate(message: impl Into<String>) -> Self {
        TerrainError::DegenerateInput {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_geometry(message: impl Into<String>) -> Self {
        TerrainError::InvalidGeometry {
            message: message.into(),
        }
    }
}

/// Result type alias using [`TerrainError`].
pub type Result<T> = std::result::Result<T, TerrainError>;
