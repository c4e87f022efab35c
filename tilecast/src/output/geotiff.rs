//! Single-band GeoTIFF mask encoding.

use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use ndarray::ArrayView2;
use tiff::encoder::colortype::Gray8;
use tiff::encoder::{Compression, DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tiff::TiffError;

use super::{OutputError, OutputResult};
use crate::geo::{Crs, GeoTransform};

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const MODEL_TRANSFORMATION_TAG: u16 = 34264;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GEO_DOUBLE_PARAMS_TAG: u16 = 34736;
const GEO_ASCII_PARAMS_TAG: u16 = 34737;
const GDAL_NODATA_TAG: u16 = 42113;

/// Write `mask` as an LZW-compressed 8-bit GeoTIFF with nodata `0`.
pub fn write_mask(
    path: &Path,
    mask: ArrayView2<'_, u8>,
    transform: &GeoTransform,
    crs: &Crs,
) -> OutputResult<()> {
    let file = File::create(path).map_err(|source| OutputError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    let encode_err = |e: TiffError| OutputError::Encode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let (rows, cols) = mask.dim();
    let pixels: Vec<u8> = mask.iter().copied().collect();

    let mut writer = BufWriter::new(file);
    {
        let mut encoder = TiffEncoder::new(&mut writer)
            .map_err(encode_err)?
            .with_compression(Compression::Lzw);
        let mut image = encoder
            .new_image::<Gray8>(cols as u32, rows as u32)
            .map_err(encode_err)?;
        write_geo_tags(image.encoder(), transform, crs).map_err(encode_err)?;
        image.write_data(&pixels).map_err(encode_err)?;
    }
    writer.flush().map_err(|source| OutputError::Create {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    transform: &GeoTransform,
    crs: &Crs,
) -> Result<(), TiffError> {
    if transform.is_north_up() {
        let scale = [transform.a, -transform.e, 0.0];
        dir.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE_TAG), &scale[..])?;
        let tiepoint = [0.0, 0.0, 0.0, transform.c, transform.f, 0.0];
        dir.write_tag(Tag::Unknown(MODEL_TIEPOINT_TAG), &tiepoint[..])?;
    } else {
        let t = transform;
        let matrix = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::Unknown(MODEL_TRANSFORMATION_TAG), &matrix[..])?;
    }

    if crs.is_known() {
        dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), &crs.geo_keys[..])?;
        if let Some(doubles) = &crs.double_params {
            dir.write_tag(Tag::Unknown(GEO_DOUBLE_PARAMS_TAG), &doubles[..])?;
        }
        if let Some(ascii) = &crs.ascii_params {
            dir.write_tag(Tag::Unknown(GEO_ASCII_PARAMS_TAG), ascii.as_str())?;
        }
    }

    dir.write_tag(Tag::Unknown(GDAL_NODATA_TAG), "0")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GeoTiffSource, RasterSource, Window};
    use ndarray::Array2;
    use tempfile::TempDir;

    #[test]
    fn test_mask_round_trip_keeps_georeferencing() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pred_10-20.tif");
        let mask = Array2::from_shape_fn((6, 8), |(r, c)| if r < 3 && c < 4 { 255u8 } else { 0 });
        let transform = GeoTransform::new(10.0, 0.0, 500_200.0, 0.0, -10.0, 3_999_900.0);
        let crs = Crs::from_epsg(32633, true);

        write_mask(&path, mask.view(), &transform, &crs).unwrap();

        let source = GeoTiffSource::open(&path).unwrap();
        assert_eq!(source.dims().rows, 6);
        assert_eq!(source.dims().cols, 8);
        assert_eq!(source.transform(), transform);
        assert_eq!(source.crs().epsg(), Some(32633));
        assert_eq!(source.nodata(), Some(0.0));

        let pixels = source.read_window(Window::new(0, 0, 6, 8)).unwrap();
        assert_eq!(pixels[[0, 0, 0]], 255.0);
        assert_eq!(pixels[[0, 5, 7]], 0.0);
    }

    #[test]
    fn test_rotated_transform_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rotated.tif");
        let mask = Array2::<u8>::zeros((4, 4));
        let transform = GeoTransform::new(10.0, 1.0, 100.0, 2.0, -10.0, 200.0);

        write_mask(&path, mask.view(), &transform, &Crs::unknown()).unwrap();

        let source = GeoTiffSource::open(&path).unwrap();
        assert_eq!(source.transform(), transform);
        assert!(!source.crs().is_known());
    }
}
