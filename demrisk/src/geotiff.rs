//! Single-band GeoTIFF reading and writing.
//!
//! Georeferencing is carried by the ModelTiepoint and ModelPixelScale tags,
//! the nodata value by the `GDAL_NODATA` ASCII tag and the coordinate
//! reference by an EPSG code in the GeoKeyDirectory. Rotated transforms
//! (ModelTransformation) are not supported.
//!
//! Every function here opens its file, does its work and closes it before
//! returning, so no handle outlives the call.

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{ColorType as EncodeColorType, Gray64Float, Gray8};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{Result, TerrainError};
use crate::grid::{Field, GeoTransform, RasterGrid};

// GeoTIFF tag IDs
const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

/// Georeferencing written alongside every image.
struct GeoTags {
    transform: GeoTransform,
    epsg: Option<u16>,
    nodata: Option<f64>,
}

/// Read a single-band GeoTIFF into a [`RasterGrid`].
///
/// Any integer or floating-point sample type is accepted and widened to `f64`.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be opened or decoded
/// - The image has more than one sample per pixel
/// - The ModelTiepoint or ModelPixelScale tag is missing or malformed
pub fn read_grid<P: AsRef<Path>>(path: P) -> Result<RasterGrid> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    let mut limits = Limits::default();
    limits.decoding_buffer_size = 1024 * 1024 * 1024; // 1 GB
    limits.intermediate_buffer_size = 1024 * 1024 * 1024;
    limits.ifd_value_size = 1024 * 1024 * 1024;
    decoder = decoder.with_limits(limits);

    if !matches!(decoder.colortype()?, ColorType::Gray(_)) {
        return Err(invalid(path, "expected a single-band (grayscale) image"));
    }

    let (width, height) = decoder.dimensions()?;
    let transform = read_transform(&mut decoder, path)?;
    let nodata = read_nodata(&mut decoder);
    let epsg = read_epsg(&mut decoder);
    let data = decode_samples(&mut decoder)?;

    RasterGrid::new(data, width as usize, height as usize, transform, nodata)
        .map(|grid| grid.with_epsg(epsg))
        .map_err(|e| invalid(path, &e.to_string()))
}

/// Write a grid as a float64 GeoTIFF, replacing any existing file atomically.
pub fn write_grid<P: AsRef<Path>>(grid: &RasterGrid, path: P) -> Result<()> {
    let tags = GeoTags {
        transform: *grid.transform(),
        epsg: grid.epsg(),
        nodata: grid.nodata(),
    };
    write_atomic(path.as_ref(), |writer| {
        write_image::<Gray64Float, _>(writer, grid.width(), grid.height(), grid.data(), &tags)
    })
}

/// Write a float field (e.g. slope) georeferenced like `grid`. NaN marks nodata.
pub fn write_field<P: AsRef<Path>>(field: &Field<f64>, grid: &RasterGrid, path: P) -> Result<()> {
    let tags = GeoTags {
        transform: *grid.transform(),
        epsg: grid.epsg(),
        nodata: Some(f64::NAN),
    };
    write_atomic(path.as_ref(), |writer| {
        write_image::<Gray64Float, _>(writer, field.width, field.height, &field.values, &tags)
    })
}

/// Write an 8-bit field (e.g. hillshade) georeferenced like `grid`.
pub fn write_field_u8<P: AsRef<Path>>(field: &Field<u8>, grid: &RasterGrid, path: P) -> Result<()> {
    let tags = GeoTags {
        transform: *grid.transform(),
        epsg: grid.epsg(),
        nodata: None,
    };
    write_atomic(path.as_ref(), |writer| {
        write_image::<Gray8, _>(writer, field.width, field.height, &field.values, &tags)
    })
}

/// Write through a temporary file in the destination directory, then rename
/// it over the destination.
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    // Rename replaces an existing file, so concurrent writers never observe
    // a missing output
    tmp.persist(path).map_err(|e| TerrainError::Io(e.error))?;
    Ok(())
}

fn write_image<C, W>(
    writer: W,
    width: usize,
    height: usize,
    data: &[C::Inner],
    tags: &GeoTags,
) -> Result<()>
where
    C: EncodeColorType,
    [C::Inner]: TiffValue,
    W: Write + Seek,
{
    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<C>(width as u32, height as u32)?;
    write_geo_tags(image.encoder(), tags)?;
    image.write_data(data)?;
    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<W, K>,
    tags: &GeoTags,
) -> Result<()> {
    let t = &tags.transform;
    let (res_x, res_y) = t.resolution();

    // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    let pixel_scale = [res_x, res_y, 0.0];
    dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), pixel_scale.as_slice())?;

    // ModelTiepoint: pixel (0, 0) -> top-left corner
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    dir.write_tag(geo_tag(MODEL_TIEPOINT), tiepoint.as_slice())?;

    let geokeys = geokey_directory(tags.epsg);
    dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), geokeys.as_slice())?;

    if let Some(nodata) = tags.nodata {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            nodata.to_string()
        };
        dir.write_tag(geo_tag(GDAL_NODATA), text.as_str())?;
    }

    Ok(())
}

/// Build a GeoKeyDirectory: header followed by `[key, location, count, value]` entries.
fn geokey_directory(epsg: Option<u16>) -> Vec<u16> {
    // EPSG 4000-4999 are geographic 2D systems, everything else is treated as projected
    let geographic = epsg.map_or(true, |code| (4000..5000).contains(&code));
    let mut keys = vec![1, 1, 0, 0];

    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    if let Some(code) = epsg {
        let key = if geographic {
            GEOGRAPHIC_TYPE_GEO_KEY
        } else {
            PROJECTED_CS_TYPE_GEO_KEY
        };
        keys.extend_from_slice(&[key, 0, 1, code]);
    }

    keys[3] = ((keys.len() - 4) / 4) as u16;
    keys
}

/// Resolve a GeoTIFF tag ID the way the decoder keys it: by its named variant
/// when `tiff` knows the tag, never as `Tag::Unknown`.
fn geo_tag(id: u16) -> Tag {
    Tag::from_u16_exhaustive(id)
}

fn read_transform<R: std::io::Read + Seek>(
    decoder: &mut Decoder<R>,
    path: &Path,
) -> Result<GeoTransform> {
    let tiepoint = decoder
        .get_tag_f64_vec(geo_tag(MODEL_TIEPOINT))
        .map_err(|_| invalid(path, "missing ModelTiepoint tag"))?;
    let scale = decoder
        .get_tag_f64_vec(geo_tag(MODEL_PIXEL_SCALE))
        .map_err(|_| invalid(path, "missing ModelPixelScale tag"))?;

    if tiepoint.len() < 6 || scale.len() < 2 {
        return Err(invalid(path, "malformed georeferencing tags"));
    }
    if scale[0] <= 0.0 || scale[1] <= 0.0 {
        return Err(invalid(path, "pixel scale must be positive"));
    }

    // Tiepoint format: [i, j, k, x, y, z]; shift back to pixel (0, 0)
    let (i, j) = (tiepoint[0], tiepoint[1]);
    let origin_x = tiepoint[3] - i * scale[0];
    let origin_y = tiepoint[4] + j * scale[1];

    Ok(GeoTransform::north_up(origin_x, origin_y, scale[0], scale[1]))
}

fn read_nodata<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(geo_tag(GDAL_NODATA))
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse().ok())
}

fn read_epsg<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<u16> {
    let keys = decoder
        .get_tag_u16_vec(geo_tag(GEO_KEY_DIRECTORY))
        .ok()?;
    keys.get(4..)?
        .chunks_exact(4)
        .find(|entry| {
            (entry[0] == PROJECTED_CS_TYPE_GEO_KEY || entry[0] == GEOGRAPHIC_TYPE_GEO_KEY)
                && entry[1] == 0
                && entry[3] != USER_DEFINED
        })
        .map(|entry| entry[3])
}

fn decode_samples<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f64>> {
    let samples = match decoder.read_image()? {
        DecodingResult::F64(data) => data,
        DecodingResult::F32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U16(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U32(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::I8(data) => data.into_iter().map(f64::from).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f64).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f64).collect(),
    };
    Ok(samples)
}

fn invalid(path: &Path, message: &str) -> TerrainError {
    TerrainError::InvalidRaster {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;
    use tiff::encoder::colortype::{Gray16, Gray32Float};

    fn sample_grid() -> RasterGrid {
        let data = vec![
            100.0, 101.5, 103.0, //
            -9999.0, 104.0, 105.0,
        ];
        RasterGrid::new(
            data,
            3,
            2,
            GeoTransform::north_up(7.25, 46.5, 0.001, 0.002),
            Some(-9999.0),
        )
        .unwrap()
        .with_epsg(Some(4326))
    }

    #[test]
    fn test_write_then_read_grid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dem.tif");
        let grid = sample_grid();

        write_grid(&grid, &path).unwrap();
        let read = read_grid(&path).unwrap();

        assert_eq!(read.width(), 3);
        assert_eq!(read.height(), 2);
        assert_eq!(read.data(), grid.data());
        assert_eq!(read.nodata(), Some(-9999.0));
        assert_eq!(read.epsg(), Some(4326));
        assert_eq!(read.transform(), grid.transform());
    }

    #[test]
    fn test_projected_epsg_survives() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("utm.tif");
        let grid = sample_grid().with_epsg(Some(32632));

        write_grid(&grid, &path).unwrap();
        assert_eq!(read_grid(&path).unwrap().epsg(), Some(32632));
        assert_eq!(geokey_directory(Some(32632))[3], 3);
        assert_eq!(geokey_directory(None)[3], 2);
    }

    #[test]
    fn test_overwrite_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dem.tif");
        std::fs::write(&path, b"stale contents").unwrap();

        write_grid(&sample_grid(), &path).unwrap();
        assert_eq!(read_grid(&path).unwrap().width(), 3);

        // Only the output remains, no temporary files
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_georeferencing_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.tif");
        let file = File::create(&path).unwrap();
        let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
        encoder
            .write_image::<Gray16>(2, 2, &[1u16, 2, 3, 4])
            .unwrap();
        drop(encoder);

        let result = read_grid(&path);
        assert!(matches!(result, Err(TerrainError::InvalidRaster { .. })));
    }

    #[test]
    fn test_integer_samples_widen_to_f64() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("u16.tif");
        let tags = GeoTags {
            transform: GeoTransform::north_up(0.0, 2.0, 1.0, 1.0),
            epsg: None,
            nodata: Some(0.0),
        };
        let file = File::create(&path).unwrap();
        write_image::<Gray16, _>(BufWriter::new(file), 2, 2, &[0u16, 10, 20, 30], &tags).unwrap();

        let grid = read_grid(&path).unwrap();
        assert_eq!(grid.data(), &[0.0, 10.0, 20.0, 30.0]);
        assert_eq!(grid.get(0, 0), None); // nodata
        assert_eq!(grid.epsg(), None);
    }

    /// Write a float32 tile tagged the way GDAL tags an EPSG:4326 raster.
    fn write_gdal_style_tile(path: &Path) {
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
        let mut image = encoder.new_image::<Gray32Float>(3, 2).unwrap();
        {
            let dir = image.encoder();
            dir.write_tag(Tag::ModelPixelScaleTag, &[0.5f64, 0.25, 0.0][..])
                .unwrap();
            dir.write_tag(
                Tag::ModelTiepointTag,
                &[0.0f64, 0.0, 0.0, 10.0, 50.0, 0.0][..],
            )
            .unwrap();
            dir.write_tag(
                Tag::GeoKeyDirectoryTag,
                &[
                    1u16, 1, 0, 4, //
                    1024, 0, 1, 2, //
                    1025, 0, 1, 1, //
                    1026, 34737, 7, 0, //
                    2048, 0, 1, 4326,
                ][..],
            )
            .unwrap();
            dir.write_tag(Tag::from_u16_exhaustive(34737), "WGS 84|")
                .unwrap();
            dir.write_tag(Tag::GdalNodata, "-32768").unwrap();
        }
        image
            .write_data(&[-32768.0f32, 10.5, 11.0, 12.0, -32768.0, 13.0])
            .unwrap();
    }

    #[test]
    fn test_read_gdal_style_tile() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gdal.tif");
        write_gdal_style_tile(&path);

        let grid = read_grid(&path).unwrap();
        assert_eq!((grid.width(), grid.height()), (3, 2));
        assert_eq!(grid.nodata(), Some(-32768.0));
        assert_eq!(grid.valid_count(), 4);
        assert_eq!(grid.get(0, 0), None);
        assert_eq!(grid.get(0, 1), Some(10.5));
        assert_eq!(grid.epsg(), Some(4326));
        assert_eq!(grid.transform(), &GeoTransform::north_up(10.0, 50.0, 0.5, 0.25));
    }

    #[test]
    fn test_named_tags_match_written_ids() {
        assert_eq!(geo_tag(MODEL_TIEPOINT), Tag::ModelTiepointTag);
        assert_eq!(geo_tag(MODEL_PIXEL_SCALE), Tag::ModelPixelScaleTag);
        assert_eq!(geo_tag(GEO_KEY_DIRECTORY), Tag::GeoKeyDirectoryTag);
        assert_eq!(geo_tag(GDAL_NODATA), Tag::GdalNodata);
    }

    #[test]
    fn test_concurrent_writers_all_succeed() {
        let dir = TempDir::new().unwrap();
        let path = Arc::new(dir.path().join("dem.tif"));
        write_grid(&sample_grid(), path.as_path()).unwrap();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = Arc::clone(&path);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    write_grid(&sample_grid(), path.as_path())
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(read_grid(path.as_path()).unwrap().width(), 3);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_field_nodata_is_nan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("slope.tif");
        let grid = sample_grid();
        let field = Field {
            values: vec![0.0, 1.0, 2.0, f64::NAN, 4.0, 5.0],
            width: 3,
            height: 2,
        };

        write_field(&field, &grid, &path).unwrap();
        let read = read_grid(&path).unwrap();
        assert!(read.nodata().unwrap().is_nan());
        assert_eq!(read.valid_count(), 5);
    }
}
