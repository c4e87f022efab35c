//! Read-only raster sources.
//!
//! A [`RasterSource`] exposes windowed reads and georeferencing for one
//! physical dataset. Several sources that share one pixel grid form a
//! [`SourceSet`]: the primary source drives tiling and the validity check,
//! the secondaries only contribute extra bands.
//!
//! # Implementors
//!
//! - [`GeoTiffSource`] - strip or tile organised GeoTIFF on local disk
//! - [`MemorySource`] - in-memory array, used for tests and synthetic inputs

mod geotiff;
mod memory;

pub use geotiff::{GeoTiffSource, DEFAULT_CHUNK_CACHE_BYTES};
pub use memory::MemorySource;

use std::io;
use std::path::{Path, PathBuf};

use ndarray::Array3;
use thiserror::Error;

use crate::geo::{Crs, GeoTransform};
use crate::grid::{GridSpec, TileOrigin};

/// Result type for raster operations.
pub type RasterResult<T> = Result<T, RasterError>;

/// Errors raised while opening or reading raster sources.
#[derive(Debug, Error)]
pub enum RasterError {
    /// The dataset could not be opened.
    #[error("failed to open raster {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    /// The dataset could not be decoded.
    #[error("failed to decode raster {name}: {reason}")]
    Decode { name: String, reason: String },

    /// The dataset uses a layout this reader does not handle.
    #[error("unsupported raster {name}: {reason}")]
    Unsupported { name: String, reason: String },

    /// A secondary source does not share the primary pixel grid.
    #[error(
        "source {name} is {actual_rows}x{actual_cols} pixels, primary grid is {expected_rows}x{expected_cols}"
    )]
    Alignment {
        name: String,
        expected_rows: usize,
        expected_cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    /// A secondary path could not be derived from the primary path.
    #[error("cannot derive secondary source from {}: it does not contain {pattern:?}", .primary.display())]
    SecondaryPath { primary: PathBuf, pattern: String },

    /// Total band count differs from the configured expectation.
    #[error("sources provide {actual} bands, expected {expected}")]
    BandCount { expected: usize, actual: usize },
}

/// Pixel extent of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterDims {
    pub rows: usize,
    pub cols: usize,
}

impl RasterDims {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}

/// Rectangular pixel window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Window {
    pub const fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self {
            row,
            col,
            rows,
            cols,
        }
    }

    /// Window covered by the tile at `origin`.
    pub fn for_tile(origin: TileOrigin, spec: &GridSpec) -> Self {
        Self::new(origin.row, origin.col, spec.tile_rows(), spec.tile_cols())
    }

    pub fn row_end(&self) -> usize {
        self.row + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col + self.cols
    }
}

/// Read-only, georeferenced multi-band raster.
///
/// Reads take `&self` so one opened handle is shared by every batch.
/// Implementations must be `Send + Sync`.
pub trait RasterSource: Send + Sync {
    /// Human-readable identifier used in logs and errors.
    fn name(&self) -> &str;

    fn dims(&self) -> RasterDims;

    fn band_count(&self) -> usize;

    fn transform(&self) -> GeoTransform;

    fn crs(&self) -> &Crs;

    /// Read all bands of `window` as `(bands, rows, cols)`.
    ///
    /// Pixels outside the raster extent are returned as `0`, the nodata
    /// sentinel, so a window hanging off the edge never passes the validity
    /// check.
    fn read_window(&self, window: Window) -> RasterResult<Array3<f32>>;
}

/// A primary source plus pixel-aligned secondaries.
pub struct SourceSet {
    primary: Box<dyn RasterSource>,
    secondaries: Vec<Box<dyn RasterSource>>,
}

impl SourceSet {
    /// Combine sources, checking that every secondary shares the primary
    /// pixel grid.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Alignment`] for the first mismatching secondary.
    pub fn new(
        primary: Box<dyn RasterSource>,
        secondaries: Vec<Box<dyn RasterSource>>,
    ) -> RasterResult<Self> {
        let expected = primary.dims();
        for secondary in &secondaries {
            let actual = secondary.dims();
            if actual != expected {
                return Err(RasterError::Alignment {
                    name: secondary.name().to_string(),
                    expected_rows: expected.rows,
                    expected_cols: expected.cols,
                    actual_rows: actual.rows,
                    actual_cols: actual.cols,
                });
            }
        }
        Ok(Self {
            primary,
            secondaries,
        })
    }

    pub fn primary(&self) -> &dyn RasterSource {
        self.primary.as_ref()
    }

    pub fn secondaries(&self) -> impl Iterator<Item = &dyn RasterSource> + '_ {
        self.secondaries.iter().map(|s| s.as_ref())
    }

    pub fn dims(&self) -> RasterDims {
        self.primary.dims()
    }

    /// Band count of the stacked tensor (primary first).
    pub fn total_bands(&self) -> usize {
        self.primary.band_count() + self.secondaries.iter().map(|s| s.band_count()).sum::<usize>()
    }

    /// Fail unless the stacked band count equals `expected`.
    pub fn expect_bands(&self, expected: usize) -> RasterResult<()> {
        let actual = self.total_bands();
        if actual != expected {
            return Err(RasterError::BandCount { expected, actual });
        }
        Ok(())
    }
}

/// Substring replacement deriving a secondary dataset path from the primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSubstitution {
    pub pattern: String,
    pub replacement: String,
}

impl PathSubstitution {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// Apply to `primary`, failing if the pattern does not occur.
    pub fn apply(&self, primary: &Path) -> RasterResult<PathBuf> {
        let text = primary.to_string_lossy();
        if self.pattern.is_empty() || !text.contains(&self.pattern) {
            return Err(RasterError::SecondaryPath {
                primary: primary.to_path_buf(),
                pattern: self.pattern.clone(),
            });
        }
        Ok(PathBuf::from(text.replace(&self.pattern, &self.replacement)))
    }
}

/// Derive secondary paths in rule order.
pub fn derive_secondary_paths(
    primary: &Path,
    rules: &[PathSubstitution],
) -> RasterResult<Vec<PathBuf>> {
    rules.iter().map(|rule| rule.apply(primary)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn source(name: &str, bands: usize, rows: usize, cols: usize) -> Box<dyn RasterSource> {
        Box::new(MemorySource::new(
            name,
            Array3::from_elem((bands, rows, cols), 1.0),
            GeoTransform::identity(),
            Crs::unknown(),
        ))
    }

    #[test]
    fn test_source_set_counts_bands() {
        let set = SourceSet::new(
            source("s2_10m", 4, 100, 100),
            vec![source("s1_10m", 2, 100, 100), source("s2_20m", 6, 100, 100)],
        )
        .unwrap();

        assert_eq!(set.total_bands(), 12);
        assert!(set.expect_bands(12).is_ok());
        assert!(matches!(
            set.expect_bands(10),
            Err(RasterError::BandCount {
                expected: 10,
                actual: 12
            })
        ));
        assert_eq!(set.primary().name(), "s2_10m");
        assert_eq!(set.secondaries().count(), 2);
    }

    #[test]
    fn test_source_set_rejects_misaligned_secondary() {
        let result = SourceSet::new(
            source("s2_10m", 4, 100, 100),
            vec![source("s2_20m", 6, 50, 50)],
        );

        match result {
            Err(RasterError::Alignment {
                name,
                actual_rows,
                expected_rows,
                ..
            }) => {
                assert_eq!(name, "s2_20m");
                assert_eq!(actual_rows, 50);
                assert_eq!(expected_rows, 100);
            }
            _ => panic!("expected alignment error"),
        }
    }

    #[test]
    fn test_derive_secondary_paths() {
        let rules = vec![
            PathSubstitution::new("s2_10m", "s1_10m"),
            PathSubstitution::new("s2_10m", "s2_20m"),
        ];
        let paths = derive_secondary_paths(Path::new("/data/tile_s2_10m.tif"), &rules).unwrap();

        assert_eq!(
            paths,
            vec![
                PathBuf::from("/data/tile_s1_10m.tif"),
                PathBuf::from("/data/tile_s2_20m.tif"),
            ]
        );
    }

    #[test]
    fn test_derive_fails_without_pattern() {
        let rules = vec![PathSubstitution::new("s2_10m", "s1_10m")];
        let err = derive_secondary_paths(Path::new("/data/scene.tif"), &rules).unwrap_err();
        assert!(err.to_string().contains("s2_10m"));
    }

    #[test]
    fn test_window_for_tile() {
        let spec = GridSpec::new(500, 400, 100).unwrap();
        let window = Window::for_tile(TileOrigin::new(300, 600), &spec);

        assert_eq!(window, Window::new(300, 600, 500, 400));
        assert_eq!(window.row_end(), 800);
        assert_eq!(window.col_end(), 1000);
    }
}
