//! Raster tile discovery and content fingerprints.
//!
//! A [`TileSet`] is the sorted list of `.tif`/`.tiff` files in a directory,
//! minus the files the pipeline itself writes there. Sorting by path makes
//! both the [`Fingerprint`] and the mosaic's first-wins overlap policy
//! independent of filesystem enumeration order.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Default filename of the merged elevation raster.
pub const MERGED_FILENAME: &str = "merged_dem.tif";

/// Default filename of the persisted slope raster.
pub const SLOPE_FILENAME: &str = "slope.tif";

/// Default filename of the persisted hillshade raster.
pub const HILLSHADE_FILENAME: &str = "hillshade.tif";

/// SHA-256 digest over the content of every tile in a [`TileSet`], lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already computed digest.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Combine this fingerprint with the directory results are written to.
    ///
    /// Identical tiles published to two directories get two keys, so a
    /// cached result always names artifacts in its own directory.
    pub fn scoped(&self, output_dir: &Path) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        hasher.update([0u8]);
        hasher.update(output_dir.to_string_lossy().as_bytes());
        Fingerprint(format!("{:x}", hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raster tiles found in one directory, sorted by path.
#[derive(Debug, Clone)]
pub struct TileSet {
    dir: PathBuf,
    paths: Vec<PathBuf>,
}

impl TileSet {
    /// Scan `dir` for `.tif`/`.tiff` files, skipping hidden files and any file
    /// whose name appears in `excluded`. Both matches ignore ASCII case.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn scan<P: AsRef<Path>>(dir: P, excluded: &[&str]) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || excluded.iter().any(|e| e.eq_ignore_ascii_case(&name)) {
                continue;
            }
            if is_tiff_name(&name) {
                paths.push(path);
            }
        }

        paths.sort();
        Ok(Self { dir, paths })
    }

    /// Directory the tiles were found in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Tile paths in merge order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Hash the tiles' bytes in path order.
    ///
    /// Returns `Ok(None)` for an empty set.
    pub fn fingerprint(&self) -> Result<Option<Fingerprint>> {
        if self.paths.is_empty() {
            return Ok(None);
        }

        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        for path in &self.paths {
            let mut reader = BufReader::new(File::open(path)?);
            loop {
                let bytes_read = reader.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
        }

        Ok(Some(Fingerprint(format!("{:x}", hasher.finalize()))))
    }
}

/// Fingerprint the tiles in `dir`, or `None` when the directory is missing,
/// unreadable or holds no tiles.
pub fn fingerprint_dir<P: AsRef<Path>>(dir: P, excluded: &[&str]) -> Option<Fingerprint> {
    let dir = dir.as_ref();
    let result = TileSet::scan(dir, excluded).and_then(|set| set.fingerprint());
    match result {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Could not fingerprint tile directory");
            None
        }
    }
}

fn is_tiff_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tif") || lower.ends_with(".tiff")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scan_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.tif"), b"b").unwrap();
        fs::write(dir.path().join("a.TIFF"), b"a").unwrap();
        fs::write(dir.path().join(MERGED_FILENAME), b"merged").unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a tile").unwrap();
        fs::write(dir.path().join(".tmp123.tif"), b"in flight").unwrap();
        fs::create_dir(dir.path().join("sub.tif")).unwrap();

        let set = TileSet::scan(dir.path(), &[MERGED_FILENAME]).unwrap();
        let names: Vec<_> = set
            .paths()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["a.TIFF", "b.tif"]);
    }

    #[test]
    fn test_excluded_names_ignore_case() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("n01.tif"), b"tile one").unwrap();
        fs::write(dir.path().join("MERGED_DEM.TIF"), b"foreign output").unwrap();
        fs::write(dir.path().join("Slope.tif"), b"foreign slope").unwrap();

        let set = TileSet::scan(dir.path(), &[MERGED_FILENAME, SLOPE_FILENAME]).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.paths()[0].ends_with("n01.tif"));
    }

    #[test]
    fn test_scoped_fingerprint_depends_on_directory() {
        let fingerprint = Fingerprint::new("abc");
        let a = fingerprint.scoped(Path::new("/data/a"));
        let b = fingerprint.scoped(Path::new("/data/b"));

        assert_ne!(a, b);
        assert_ne!(a, fingerprint);
        assert_eq!(a, fingerprint.scoped(Path::new("/data/a")));
    }

    #[test]
    fn test_fingerprint_independent_of_creation_order() {
        let first = TempDir::new().unwrap();
        fs::write(first.path().join("n01.tif"), b"tile one").unwrap();
        fs::write(first.path().join("n02.tif"), b"tile two").unwrap();

        let second = TempDir::new().unwrap();
        fs::write(second.path().join("n02.tif"), b"tile two").unwrap();
        fs::write(second.path().join("n01.tif"), b"tile one").unwrap();

        let a = fingerprint_dir(first.path(), &[]).unwrap();
        let b = fingerprint_dir(second.path(), &[]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("n01.tif"), b"tile one").unwrap();
        let before = fingerprint_dir(dir.path(), &[]).unwrap();

        fs::write(dir.path().join("n01.tif"), b"tile one, edited").unwrap();
        let after = fingerprint_dir(dir.path(), &[]).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_ignores_excluded_output() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("n01.tif"), b"tile one").unwrap();
        let before = fingerprint_dir(dir.path(), &[MERGED_FILENAME]).unwrap();

        fs::write(dir.path().join(MERGED_FILENAME), b"output").unwrap();
        let after = fingerprint_dir(dir.path(), &[MERGED_FILENAME]).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_or_missing_directory_has_no_fingerprint() {
        let dir = TempDir::new().unwrap();
        assert_eq!(fingerprint_dir(dir.path(), &[]), None);
        assert_eq!(fingerprint_dir(dir.path().join("missing"), &[]), None);
    }
}
