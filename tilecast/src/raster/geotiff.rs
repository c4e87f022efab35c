//! GeoTIFF raster source.
//!
//! Reads strip- or tile-organised GeoTIFFs chunk by chunk. Decoded chunks are
//! kept in a byte-weighted cache because overlapping tiles read most chunks
//! more than once:
//!
//! ```text
//! read_window(w)
//!   └─ for each chunk intersecting w
//!        ├─ cache hit  → copy overlap
//!        └─ cache miss → lock decoder → read_chunk → convert to f32 → insert
//! ```
//!
//! Georeferencing comes from ModelTransformation, or from ModelPixelScale
//! plus ModelTiepoint. The GeoKey directory is carried verbatim. Samples are
//! returned as stored; a GDAL_NODATA tag is exposed as metadata only.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;
use ndarray::Array3;
use parking_lot::Mutex;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::TiffError;
use tracing::{debug, warn};

use super::{RasterDims, RasterError, RasterResult, RasterSource, Window};
use crate::geo::{Crs, GeoTransform};

/// Default budget for decoded chunks per source (256 MiB).
pub const DEFAULT_CHUNK_CACHE_BYTES: u64 = 256 * 1024 * 1024;

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const MODEL_TRANSFORMATION_TAG: u16 = 34264;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GEO_DOUBLE_PARAMS_TAG: u16 = 34736;
const GEO_ASCII_PARAMS_TAG: u16 = 34737;
const GDAL_NODATA_TAG: u16 = 42113;

/// One decoded chunk, samples interleaved per pixel.
#[derive(Debug)]
struct DecodedChunk {
    /// Pixels per stored row (may exceed the valid width for padded tiles).
    stride: usize,
    rows: usize,
    samples: usize,
    data: Vec<f32>,
}

impl DecodedChunk {
    fn weight(&self) -> u32 {
        (self.data.len() * std::mem::size_of::<f32>()).min(u32::MAX as usize) as u32
    }
}

/// Chunk geometry of an opened file.
#[derive(Debug, Clone, Copy)]
struct ChunkLayout {
    chunk_cols: usize,
    chunk_rows: usize,
    across: usize,
    down: usize,
    /// Separate planes per band (PlanarConfiguration = 2).
    planar: bool,
}

impl ChunkLayout {
    fn index(&self, plane: usize, chunk_row: usize, chunk_col: usize) -> u32 {
        (plane * self.across * self.down + chunk_row * self.across + chunk_col) as u32
    }
}

/// Read-only GeoTIFF opened once and shared across batches.
pub struct GeoTiffSource {
    name: String,
    path: PathBuf,
    dims: RasterDims,
    bands: usize,
    transform: GeoTransform,
    crs: Crs,
    nodata: Option<f64>,
    layout: ChunkLayout,
    decoder: Mutex<Decoder<BufReader<File>>>,
    chunks: Cache<u32, Arc<DecodedChunk>>,
}

impl GeoTiffSource {
    /// Open a GeoTIFF with the default chunk cache budget.
    pub fn open(path: impl AsRef<Path>) -> RasterResult<Self> {
        Self::open_with_cache(path, DEFAULT_CHUNK_CACHE_BYTES)
    }

    /// Open a GeoTIFF, keeping at most `cache_bytes` of decoded chunks.
    ///
    /// # Errors
    ///
    /// - [`RasterError::Open`] if the file cannot be opened
    /// - [`RasterError::Decode`] if the TIFF header or tags are unreadable
    /// - [`RasterError::Unsupported`] for zero-sized images
    pub fn open_with_cache(path: impl AsRef<Path>, cache_bytes: u64) -> RasterResult<Self> {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();

        let file = File::open(&path).map_err(|source| RasterError::Open {
            path: path.clone(),
            source,
        })?;
        let decode_err = |e: TiffError| RasterError::Decode {
            name: name.clone(),
            reason: e.to_string(),
        };

        let mut decoder = Decoder::new(BufReader::new(file)).map_err(decode_err)?;

        let (width, height) = decoder.dimensions().map_err(decode_err)?;
        if width == 0 || height == 0 {
            return Err(RasterError::Unsupported {
                name: name.clone(),
                reason: "zero-sized image".to_string(),
            });
        }

        let bands = tag_u32(&mut decoder, Tag::SamplesPerPixel)
            .map_err(decode_err)?
            .unwrap_or(1) as usize;
        let planar = tag_u32(&mut decoder, Tag::PlanarConfiguration)
            .map_err(decode_err)?
            .unwrap_or(1)
            == 2;

        let (chunk_cols, chunk_rows) = decoder.chunk_dimensions();
        let (chunk_cols, chunk_rows) = (chunk_cols.max(1) as usize, chunk_rows.max(1) as usize);
        let layout = ChunkLayout {
            chunk_cols,
            chunk_rows,
            across: (width as usize).div_ceil(chunk_cols),
            down: (height as usize).div_ceil(chunk_rows),
            planar,
        };

        let transform = read_transform(&mut decoder).map_err(decode_err)?;
        let transform = transform.unwrap_or_else(|| {
            warn!(source = %name, "No georeferencing tags, using identity transform");
            GeoTransform::identity()
        });
        let crs = read_crs(&mut decoder).map_err(decode_err)?;
        let nodata = read_nodata(&mut decoder).map_err(decode_err)?;

        let chunks = Cache::builder()
            .weigher(|_key: &u32, chunk: &Arc<DecodedChunk>| chunk.weight())
            .max_capacity(cache_bytes)
            .build();

        debug!(
            source = %name,
            width,
            height,
            bands,
            chunk_cols,
            chunk_rows,
            planar,
            epsg = ?crs.epsg(),
            "Opened GeoTIFF source"
        );

        Ok(Self {
            name,
            path,
            dims: RasterDims::new(height as usize, width as usize),
            bands,
            transform,
            crs,
            nodata,
            layout,
            decoder: Mutex::new(decoder),
            chunks,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// GDAL_NODATA value declared by the file, if any.
    pub fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn chunk(&self, index: u32) -> RasterResult<Arc<DecodedChunk>> {
        if let Some(chunk) = self.chunks.get(&index) {
            return Ok(chunk);
        }

        let decoded = {
            let mut decoder = self.decoder.lock();
            let (valid_cols, _) = decoder.chunk_data_dimensions(index);
            let result = decoder
                .read_chunk(index)
                .map_err(|e| RasterError::Decode {
                    name: self.name.clone(),
                    reason: format!("chunk {index}: {e}"),
                })?;
            (valid_cols as usize, result)
        };
        let (valid_cols, result) = decoded;

        let data = self.to_f32(result)?;
        let samples = if self.layout.planar { 1 } else { self.bands };

        // Tiles may come back padded to the full tile width.
        let full = self.layout.chunk_cols * self.layout.chunk_rows * samples;
        let stride = if data.len() == full {
            self.layout.chunk_cols
        } else {
            valid_cols.max(1)
        };
        let rows = data.len() / (stride * samples).max(1);

        let chunk = Arc::new(DecodedChunk {
            stride,
            rows,
            samples,
            data,
        });
        self.chunks.insert(index, Arc::clone(&chunk));
        Ok(chunk)
    }

    fn to_f32(&self, result: DecodingResult) -> RasterResult<Vec<f32>> {
        let data: Vec<f32> = match result {
            DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::F32(v) => v,
            DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
            #[allow(unreachable_patterns)]
            _ => {
                return Err(RasterError::Unsupported {
                    name: self.name.clone(),
                    reason: "unsupported sample format".to_string(),
                })
            }
        };

        Ok(data)
    }
}

impl RasterSource for GeoTiffSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> RasterDims {
        self.dims
    }

    fn band_count(&self) -> usize {
        self.bands
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn crs(&self) -> &Crs {
        &self.crs
    }

    fn read_window(&self, window: Window) -> RasterResult<Array3<f32>> {
        let mut out = Array3::<f32>::zeros((self.bands, window.rows, window.cols));

        let row_end = window.row_end().min(self.dims.rows);
        let col_end = window.col_end().min(self.dims.cols);
        if window.row >= row_end || window.col >= col_end {
            return Ok(out);
        }

        let layout = self.layout;
        let planes = if layout.planar { self.bands } else { 1 };
        let first_chunk_row = window.row / layout.chunk_rows;
        let last_chunk_row = (row_end - 1) / layout.chunk_rows;
        let first_chunk_col = window.col / layout.chunk_cols;
        let last_chunk_col = (col_end - 1) / layout.chunk_cols;

        for plane in 0..planes {
            for chunk_row in first_chunk_row..=last_chunk_row {
                for chunk_col in first_chunk_col..=last_chunk_col {
                    let chunk = self.chunk(layout.index(plane, chunk_row, chunk_col))?;

                    let chunk_top = chunk_row * layout.chunk_rows;
                    let chunk_left = chunk_col * layout.chunk_cols;
                    let r0 = window.row.max(chunk_top);
                    let r1 = row_end.min(chunk_top + chunk.rows);
                    let c0 = window.col.max(chunk_left);
                    let c1 = col_end.min(chunk_left + chunk.stride);

                    for r in r0..r1 {
                        let src_row = (r - chunk_top) * chunk.stride;
                        for c in c0..c1 {
                            let src = (src_row + (c - chunk_left)) * chunk.samples;
                            let (dr, dc) = (r - window.row, c - window.col);
                            if layout.planar {
                                out[[plane, dr, dc]] = chunk.data[src];
                            } else {
                                for band in 0..chunk.samples {
                                    out[[band, dr, dc]] = chunk.data[src + band];
                                }
                            }
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

fn tag_u32<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: Tag,
) -> Result<Option<u32>, TiffError> {
    decoder.find_tag(tag)?.map(|v| v.into_u32()).transpose()
}

fn tag_f64_vec<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: u16,
) -> Result<Option<Vec<f64>>, TiffError> {
    decoder
        .find_tag(Tag::Unknown(tag))?
        .map(|v| v.into_f64_vec())
        .transpose()
}

fn read_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>, TiffError> {
    if let Some(m) = tag_f64_vec(decoder, MODEL_TRANSFORMATION_TAG)? {
        if m.len() >= 8 {
            return Ok(Some(GeoTransform::new(m[0], m[1], m[3], m[4], m[5], m[7])));
        }
    }

    let scale = tag_f64_vec(decoder, MODEL_PIXEL_SCALE_TAG)?;
    let tiepoint = tag_f64_vec(decoder, MODEL_TIEPOINT_TAG)?;
    match (scale, tiepoint) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            let (sx, sy) = (scale[0], scale[1]);
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            Ok(Some(GeoTransform::new(
                sx,
                0.0,
                x - i * sx,
                0.0,
                -sy,
                y + j * sy,
            )))
        }
        _ => Ok(None),
    }
}

fn read_crs<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Crs, TiffError> {
    let geo_keys = match decoder.find_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG))? {
        Some(value) => value
            .into_u32_vec()?
            .into_iter()
            .map(|k| k as u16)
            .collect(),
        None => return Ok(Crs::unknown()),
    };
    let double_params = tag_f64_vec(decoder, GEO_DOUBLE_PARAMS_TAG)?;
    let ascii_params = decoder
        .find_tag(Tag::Unknown(GEO_ASCII_PARAMS_TAG))?
        .map(|v| v.into_string())
        .transpose()?;

    Ok(Crs {
        geo_keys,
        double_params,
        ascii_params,
    })
}

fn read_nodata<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<f64>, TiffError> {
    let text = decoder
        .find_tag(Tag::Unknown(GDAL_NODATA_TAG))?
        .map(|v| v.into_string())
        .transpose()?;
    Ok(text.and_then(|t| t.trim_matches(char::from(0)).trim().parse::<f64>().ok()))
}
