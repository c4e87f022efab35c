//! Per-tile prediction output.
//!
//! For each predicted tile the writer:
//!
//! 1. resizes the probability plane back to the tile size
//! 2. thresholds it into a `0`/`255` mask
//! 3. writes `.pred_<row>-<col>.tif.partial` with the tile's own transform
//! 4. renames it to `pred_<row>-<col>.tif`, which marks the tile done
//! 5. optionally writes `pred_<row>-<col>_results.png`
//!
//! The rename is the commit point. A crash before it leaves only a partial
//! file, which the progress scan ignores, so the tile is predicted again on
//! the next run.

mod comparison;
mod geotiff;

pub use comparison::{scale_to_byte, write_comparison, PANEL_GAP};
pub use geotiff::write_mask;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ndarray::{s, Array2, ArrayView2, ArrayView4};
use thiserror::Error;
use tracing::{debug, warn};

use crate::geo::{Crs, GeoTransform};
use crate::grid::{GridSpec, TileOrigin};
use crate::imaging::resize_plane;
use crate::naming::{comparison_filename, mask_filename, partial_mask_filename};

/// Result type for output operations.
pub type OutputResult<T> = Result<T, OutputError>;

/// Errors raised while writing tile outputs.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to create {}: {source}", .path.display())]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to encode {}: {reason}", .path.display())]
    Encode { path: PathBuf, reason: String },

    #[error("failed to move {} into place: {source}", .path.display())]
    Commit { path: PathBuf, source: io::Error },

    #[error("failed to write comparison image {}: {reason}", .path.display())]
    Comparison { path: PathBuf, reason: String },

    #[error("batch has {probabilities} probability planes for {origins} tiles")]
    BatchMismatch { origins: usize, probabilities: usize },
}

/// `p >= threshold` becomes `255`, everything else `0`.
pub fn threshold_mask(probabilities: ArrayView2<'_, f32>, threshold: f32) -> Array2<u8> {
    probabilities.mapv(|p| if p >= threshold { 255 } else { 0 })
}

/// Writes georeferenced masks for predicted tiles.
#[derive(Debug, Clone)]
pub struct TileWriter {
    out_dir: PathBuf,
    spec: GridSpec,
    threshold: f32,
    transform: GeoTransform,
    crs: Crs,
    /// Model-input channel rendered in comparison images.
    comparison_channel: Option<usize>,
}

impl TileWriter {
    /// Writer for tiles of the primary raster described by `transform` and `crs`.
    pub fn new(
        out_dir: impl Into<PathBuf>,
        spec: GridSpec,
        threshold: f32,
        transform: GeoTransform,
        crs: Crs,
    ) -> Self {
        Self {
            out_dir: out_dir.into(),
            spec,
            threshold,
            transform,
            crs,
            comparison_channel: None,
        }
    }

    /// Also write comparison images using model-input `channel`.
    pub fn with_comparison(mut self, channel: usize) -> Self {
        self.comparison_channel = Some(channel);
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Write every tile of a batch.
    ///
    /// `probabilities` is `(n, model_rows, model_cols, 1)`; `model_input` is
    /// the tensor the model saw and only feeds comparison images.
    ///
    /// # Errors
    ///
    /// Stops at the first tile that cannot be written. Tiles before it are
    /// already committed.
    pub fn write_batch(
        &self,
        origins: &[TileOrigin],
        probabilities: ArrayView4<'_, f32>,
        model_input: ArrayView4<'_, f32>,
    ) -> OutputResult<usize> {
        let count = probabilities.dim().0;
        if count != origins.len() {
            return Err(OutputError::BatchMismatch {
                origins: origins.len(),
                probabilities: count,
            });
        }

        for (i, &origin) in origins.iter().enumerate() {
            let plane = probabilities.slice(s![i, .., .., 0]);
            let channel = self
                .comparison_channel
                .filter(|&c| c < model_input.dim().3 && i < model_input.dim().0)
                .map(|c| model_input.slice(s![i, .., .., c]));
            self.write_tile(origin, plane, channel)?;
        }

        Ok(origins.len())
    }

    /// Resize, threshold, and commit one tile.
    pub fn write_tile(
        &self,
        origin: TileOrigin,
        probabilities: ArrayView2<'_, f32>,
        comparison_input: Option<ArrayView2<'_, f32>>,
    ) -> OutputResult<()> {
        let (rows, cols) = (self.spec.tile_rows(), self.spec.tile_cols());
        let resized = resize_plane(probabilities, rows, cols);
        let mask = threshold_mask(resized.view(), self.threshold);
        let transform = self.transform.for_tile(origin);

        let partial = self.out_dir.join(partial_mask_filename(origin));
        let final_path = self.out_dir.join(mask_filename(origin));

        if let Err(e) = write_mask(&partial, mask.view(), &transform, &self.crs) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        if let Err(source) = fs::rename(&partial, &final_path) {
            let _ = fs::remove_file(&partial);
            return Err(OutputError::Commit {
                path: final_path,
                source,
            });
        }

        debug!(
            tile_row = origin.row,
            tile_col = origin.col,
            foreground = mask.iter().filter(|&&v| v == 255).count(),
            "Wrote prediction tile"
        );

        if let Some(input) = comparison_input {
            let panel = scale_to_byte(resize_plane(input, rows, cols).view());
            let path = self.out_dir.join(comparison_filename(origin));
            if let Err(e) = write_comparison(&path, panel.view(), mask.view()) {
                warn!(tile_row = origin.row, tile_col = origin.col, error = %e, "Comparison image skipped");
            }
        }

        Ok(())
    }
}
