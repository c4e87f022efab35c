//! Pipeline types and errors

use std::fmt;

use crate::config::ConfigError;
use crate::grid::{GridError, TileGrid};
use crate::loader::{Cursor, LoadError};
use crate::mosaic::MosaicError;
use crate::output::OutputError;
use crate::predict::PredictError;
use crate::preprocess::PreprocessError;
use crate::progress::ProgressError;
use crate::raster::RasterError;

/// Errors that abort a run.
///
/// Invalid tiles are not errors; they are recorded in the progress log and
/// skipped.
#[derive(Debug)]
pub enum PipelineError {
    /// Configuration rejected before any work started
    Config(ConfigError),
    /// Tile geometry is unusable
    Grid(GridError),
    /// Source could not be opened, read, or aligned
    Raster(RasterError),
    /// Progress could not be loaded or recorded
    Progress(ProgressError),
    /// Batch could not be filled
    Load(LoadError),
    /// Batch could not be turned into model input
    Preprocess(PreprocessError),
    /// Model failed or returned an unexpected shape
    Predict(PredictError),
    /// Tile output could not be written
    Output(OutputError),
    /// Mosaic could not be built
    Mosaic(MosaicError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Config(e) => write!(f, "Configuration error: {}", e),
            PipelineError::Grid(e) => write!(f, "Tiling error: {}", e),
            PipelineError::Raster(e) => write!(f, "Source error: {}", e),
            PipelineError::Progress(e) => write!(f, "Progress error: {}", e),
            PipelineError::Load(e) => write!(f, "Batch loading error: {}", e),
            PipelineError::Preprocess(e) => write!(f, "Preprocessing error: {}", e),
            PipelineError::Predict(e) => write!(f, "Inference error: {}", e),
            PipelineError::Output(e) => write!(f, "Output error: {}", e),
            PipelineError::Mosaic(e) => write!(f, "Mosaic error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Config(e) => Some(e),
            PipelineError::Grid(e) => Some(e),
            PipelineError::Raster(e) => Some(e),
            PipelineError::Progress(e) => Some(e),
            PipelineError::Load(e) => Some(e),
            PipelineError::Preprocess(e) => Some(e),
            PipelineError::Predict(e) => Some(e),
            PipelineError::Output(e) => Some(e),
            PipelineError::Mosaic(e) => Some(e),
        }
    }
}

macro_rules! impl_from {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for PipelineError {
                fn from(e: $source) -> Self {
                    PipelineError::$variant(e)
                }
            }
        )*
    };
}

impl_from! {
    ConfigError => Config,
    GridError => Grid,
    RasterError => Raster,
    ProgressError => Progress,
    LoadError => Load,
    PreprocessError => Preprocess,
    PredictError => Predict,
    OutputError => Output,
    MosaicError => Mosaic,
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Where a batch is in its lifecycle.
///
/// ```text
/// Scanning → Loading ─┬─ empty ─────────────────────────────┐
///                     └─ Preprocessing → Predicting → Writing ─┴→ Advancing → Scanning | Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Scanning,
    Loading,
    Preprocessing,
    Predicting,
    Writing,
    Advancing,
    Finished,
}

impl fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchPhase::Scanning => "scanning",
            BatchPhase::Loading => "loading",
            BatchPhase::Preprocessing => "preprocessing",
            BatchPhase::Predicting => "predicting",
            BatchPhase::Writing => "writing",
            BatchPhase::Advancing => "advancing",
            BatchPhase::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Work remaining at the start of a run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Tiles in the full covering grid.
    pub grid_tiles: usize,
    /// Grid tiles with a finished output file.
    pub already_done: usize,
    /// Grid tiles recorded as invalid by earlier runs.
    pub known_invalid: usize,
    /// Remaining origins in scan order.
    pub pending: TileGrid,
}

/// Outcome of one batch step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Zero-based batch number within this run.
    pub index: usize,
    /// Cursor the batch started from.
    pub start: Cursor,
    /// Cursor the next batch starts from.
    pub next: Cursor,
    /// Tiles predicted and written.
    pub predicted: usize,
    /// Tiles rejected by the validity check.
    pub skipped_invalid: usize,
    /// Pending tiles in this run.
    pub pending_total: usize,
    /// No pending tiles remain after this batch.
    pub finished: bool,
}

/// Totals for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub grid_tiles: usize,
    pub already_done: usize,
    pub known_invalid: usize,
    pub pending: usize,
    pub batches: usize,
    pub predicted: usize,
    pub skipped_invalid: usize,
    /// False when the run was stopped before the grid was exhausted.
    pub finished: bool,
}

impl RunSummary {
    /// Fold one batch into the totals.
    pub fn record(&mut self, report: &BatchReport) {
        self.batches += 1;
        self.predicted += report.predicted;
        self.skipped_invalid += report.skipped_invalid;
        self.finished = report.finished;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_source() {
        let err: PipelineError = PredictError::Inference("device lost".into()).into();
        assert_eq!(err.to_string(), "Inference error: inference failed: device lost");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_summary_accumulates() {
        let mut summary = RunSummary::default();
        let report = BatchReport {
            index: 0,
            start: Cursor::at(0),
            next: Cursor::at(7),
            predicted: 5,
            skipped_invalid: 2,
            pending_total: 9,
            finished: false,
        };
        summary.record(&report);
        summary.record(&BatchReport {
            index: 1,
            start: Cursor::at(7),
            next: Cursor::at(9),
            predicted: 1,
            skipped_invalid: 1,
            finished: true,
            ..report
        });

        assert_eq!(summary.batches, 2);
        assert_eq!(summary.predicted, 6);
        assert_eq!(summary.skipped_invalid, 3);
        assert!(summary.finished);
    }

    #[test]
    fn test_phase_names() {
        assert_eq!(BatchPhase::Preprocessing.to_string(), "preprocessing");
        assert_eq!(BatchPhase::Finished.to_string(), "finished");
    }
}
