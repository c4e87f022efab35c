//! Tile grid generation.
//!
//! Computes the set of tile origins that covers a raster with fixed-size,
//! overlapping windows. Adjacent tiles along an axis are spaced by
//! `stride = tile - overlap`, and the last tile on each axis is pinned to the
//! trailing edge (`total - tile`) so that every pixel is covered without a
//! smaller remainder tile.
//!
//! # Example
//!
//! ```
//! use tilecast::grid::{GridSpec, TileGrid};
//!
//! let spec = GridSpec::new(500, 500, 200).unwrap();
//! let grid = TileGrid::generate(1000, 1000, &spec);
//!
//! assert_eq!(grid.len(), 9);
//! ```
//!
//! Near the trailing edge the effective overlap is irregular:
//!
//! ```text
//! rows 0..1000, tile 500, overlap 200 -> stride 300
//!
//! 0        300      500             1000
//! ├────────┼────────┼────────────────┤
//! [ tile 0 ──────────]
//!          [ tile 1 ──────────]
//!                   [ tile 2 ───────]   forced to 1000 - 500
//! ```

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

use crate::progress::ProgressSnapshot;

/// Upper-left pixel of a tile in the primary source's pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileOrigin {
    /// Pixel row of the upper-left corner.
    pub row: usize,
    /// Pixel column of the upper-left corner.
    pub col: usize,
}

impl TileOrigin {
    /// Create a tile origin.
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for TileOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.row, self.col)
    }
}

/// Errors raised for an unusable tile geometry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GridError {
    /// Tile dimensions must be non-zero.
    #[error("tile size must be non-zero (got {rows}x{cols})")]
    ZeroTileSize { rows: usize, cols: usize },

    /// Overlap must leave a positive stride on both axes.
    #[error("overlap {overlap} must be smaller than the tile size {tile}")]
    OverlapTooLarge { overlap: usize, tile: usize },
}

/// Tile geometry: window size and overlap margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    tile_rows: usize,
    tile_cols: usize,
    overlap: usize,
}

impl GridSpec {
    /// Create a validated grid spec.
    ///
    /// # Errors
    ///
    /// Returns [`GridError`] if a tile dimension is zero or the overlap is not
    /// strictly smaller than both tile dimensions.
    pub fn new(tile_rows: usize, tile_cols: usize, overlap: usize) -> Result<Self, GridError> {
        if tile_rows == 0 || tile_cols == 0 {
            return Err(GridError::ZeroTileSize {
                rows: tile_rows,
                cols: tile_cols,
            });
        }
        let smallest = tile_rows.min(tile_cols);
        if overlap >= smallest {
            return Err(GridError::OverlapTooLarge {
                overlap,
                tile: smallest,
            });
        }
        Ok(Self {
            tile_rows,
            tile_cols,
            overlap,
        })
    }

    pub fn tile_rows(&self) -> usize {
        self.tile_rows
    }

    pub fn tile_cols(&self) -> usize {
        self.tile_cols
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive row starts.
    pub fn row_stride(&self) -> usize {
        self.tile_rows - self.overlap
    }

    /// Distance between consecutive column starts.
    pub fn col_stride(&self) -> usize {
        self.tile_cols - self.overlap
    }
}

/// Start offsets along one axis.
///
/// Regular starts `0, stride, 2*stride, ...` strictly below `total - tile`,
/// followed by `total - tile` itself (clamped at 0 for images smaller than a
/// tile). The result is strictly increasing, so it never contains duplicates.
pub fn axis_starts(total: usize, tile: usize, overlap: usize) -> Vec<usize> {
    let last = total.saturating_sub(tile);
    let stride = tile.saturating_sub(overlap).max(1);
    let mut starts: Vec<usize> = (0..last).step_by(stride).collect();
    starts.push(last);
    starts
}

/// Ordered set of tile origins.
///
/// Origins are stored row-major (all columns of the first row start, then the
/// next row start). The order is the scan order used by the batch loader; it
/// carries no other meaning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TileGrid {
    origins: Vec<TileOrigin>,
}

impl TileGrid {
    /// Generate the covering grid for an image of `height` x `width` pixels.
    pub fn generate(height: usize, width: usize, spec: &GridSpec) -> Self {
        let row_starts = axis_starts(height, spec.tile_rows, spec.overlap);
        let col_starts = axis_starts(width, spec.tile_cols, spec.overlap);

        let mut origins = Vec::with_capacity(row_starts.len() * col_starts.len());
        for &row in &row_starts {
            for &col in &col_starts {
                origins.push(TileOrigin::new(row, col));
            }
        }

        Self { origins }
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<TileOrigin> {
        self.origins.get(index).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TileOrigin> + '_ {
        self.origins.iter()
    }

    pub fn origins(&self) -> &[TileOrigin] {
        &self.origins
    }

    pub fn contains(&self, origin: &TileOrigin) -> bool {
        self.origins.contains(origin)
    }

    /// Origins that are neither done nor known to be invalid, in scan order.
    pub fn pending(&self, snapshot: &ProgressSnapshot) -> TileGrid {
        self.without(&snapshot.done, &snapshot.invalid)
    }

    fn without(&self, done: &HashSet<TileOrigin>, invalid: &HashSet<TileOrigin>) -> TileGrid {
        let origins = self
            .origins
            .iter()
            .filter(|origin| !done.contains(origin) && !invalid.contains(origin))
            .copied()
            .collect();
        TileGrid { origins }
    }
}
