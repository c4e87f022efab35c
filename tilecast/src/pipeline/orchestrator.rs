//! Batch-sequential orchestration.

use std::ops::ControlFlow;

use tracing::{debug, info, trace};

use super::types::{BatchPhase, BatchReport, PipelineResult, RunPlan, RunSummary};
use crate::grid::{GridSpec, TileGrid};
use crate::loader::{BatchLoader, Cursor};
use crate::output::TileWriter;
use crate::predict::{predict_checked, Predictor};
use crate::preprocess::Preprocessor;
use crate::progress::{ProgressStore, TileStatus};
use crate::raster::SourceSet;

/// Composition root of a prediction run.
///
/// Owns the opened sources and every collaborator. Nothing is shared between
/// batches except the sources and what the writer and progress store persist,
/// so a run can be stopped after any batch and resumed by a new process.
pub struct BatchOrchestrator {
    sources: SourceSet,
    spec: GridSpec,
    batch_size: usize,
    preprocessor: Box<dyn Preprocessor>,
    predictor: Box<dyn Predictor>,
    writer: TileWriter,
    progress: Box<dyn ProgressStore>,
}

impl BatchOrchestrator {
    /// # Arguments
    ///
    /// * `sources` - Primary plus aligned secondary rasters
    /// * `spec` - Tile size and overlap
    /// * `batch_size` - Maximum valid tiles per batch (clamped to 1)
    /// * `preprocessor` - Raw batch to model input
    /// * `predictor` - Model input to probabilities
    /// * `writer` - Commits masks to the output directory
    /// * `progress` - Done/invalid bookkeeping
    pub fn new(
        sources: SourceSet,
        spec: GridSpec,
        batch_size: usize,
        preprocessor: Box<dyn Preprocessor>,
        predictor: Box<dyn Predictor>,
        writer: TileWriter,
        progress: Box<dyn ProgressStore>,
    ) -> Self {
        Self {
            sources,
            spec,
            batch_size: batch_size.max(1),
            preprocessor,
            predictor,
            writer,
            progress,
        }
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Full covering grid of the primary source.
    pub fn grid(&self) -> TileGrid {
        let dims = self.sources.dims();
        TileGrid::generate(dims.rows, dims.cols, &self.spec)
    }

    /// Load progress and compute the pending grid.
    pub fn plan(&self) -> PipelineResult<RunPlan> {
        trace!(phase = %BatchPhase::Scanning, "Loading progress");
        let grid = self.grid();
        let snapshot = self.progress.load()?;
        let pending = grid.pending(&snapshot);

        let mut already_done = 0;
        let mut known_invalid = 0;
        for origin in grid.iter() {
            match snapshot.status(origin) {
                TileStatus::Done => already_done += 1,
                TileStatus::Invalid => known_invalid += 1,
                TileStatus::Pending => {}
            }
        }

        info!(
            grid_tiles = grid.len(),
            already_done,
            known_invalid,
            pending = pending.len(),
            "Planned run"
        );

        Ok(RunPlan {
            grid_tiles: grid.len(),
            already_done,
            known_invalid,
            pending,
        })
    }

    /// Process one batch starting at `cursor`.
    ///
    /// An empty batch (every scanned tile invalid) skips preprocessing,
    /// inference, and writing but still advances the cursor.
    ///
    /// # Errors
    ///
    /// Any failure aborts the batch. Invalid tiles found before the failure
    /// are already logged; tiles already written stay done.
    pub fn step(&self, pending: &TileGrid, cursor: Cursor, index: usize) -> PipelineResult<BatchReport> {
        trace!(batch = index, phase = %BatchPhase::Loading, start = cursor.next_index);
        let loader = BatchLoader::new(&self.sources, self.spec, self.batch_size, self.progress.as_ref());
        let batch = loader.fill(pending, cursor)?;

        let mut predicted = 0;
        if !batch.is_empty() {
            trace!(batch = index, phase = %BatchPhase::Preprocessing, tiles = batch.len());
            let input = self.preprocessor.prepare(batch.pixels.view())?;

            trace!(batch = index, phase = %BatchPhase::Predicting);
            let probabilities = predict_checked(self.predictor.as_ref(), input.view())?;

            trace!(batch = index, phase = %BatchPhase::Writing);
            predicted = self
                .writer
                .write_batch(&batch.origins, probabilities.view(), input.view())?;
        }

        let finished = batch.end.is_finished(pending);
        let phase = if finished {
            BatchPhase::Finished
        } else {
            BatchPhase::Advancing
        };

        info!(
            batch = index,
            predicted,
            skipped_invalid = batch.invalid.len(),
            next = batch.end.next_index,
            pending = pending.len(),
            phase = %phase,
            "Batch complete"
        );

        Ok(BatchReport {
            index,
            start: cursor,
            next: batch.end,
            predicted,
            skipped_invalid: batch.invalid.len(),
            pending_total: pending.len(),
            finished,
        })
    }

    /// Run until the pending grid is exhausted.
    pub fn run(&self) -> PipelineResult<RunSummary> {
        self.run_until(|_| ControlFlow::Continue(()))
    }

    /// Run batch by batch, calling `on_batch` after each one.
    ///
    /// Returning [`ControlFlow::Break`] stops after the current batch; the
    /// summary then reports `finished = false` unless the grid happened to be
    /// exhausted.
    pub fn run_until<F>(&self, mut on_batch: F) -> PipelineResult<RunSummary>
    where
        F: FnMut(&BatchReport) -> ControlFlow<()>,
    {
        let plan = self.plan()?;
        let mut summary = RunSummary {
            grid_tiles: plan.grid_tiles,
            already_done: plan.already_done,
            known_invalid: plan.known_invalid,
            pending: plan.pending.len(),
            finished: plan.pending.is_empty(),
            ..RunSummary::default()
        };

        let mut cursor = Cursor::start();
        let mut index = 0;
        while !cursor.is_finished(&plan.pending) {
            let report = self.step(&plan.pending, cursor, index)?;
            summary.record(&report);
            cursor = report.next;
            index += 1;

            if on_batch(&report).is_break() {
                debug!(batch = report.index, "Run stopped by caller");
                break;
            }
        }

        info!(
            batches = summary.batches,
            predicted = summary.predicted,
            skipped_invalid = summary.skipped_invalid,
            finished = summary.finished,
            "Run complete"
        );
        Ok(summary)
    }
}
