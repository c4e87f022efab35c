//! Prediction run orchestration
//!
//! Ties the components together into a resumable, batch-sequential loop:
//!
//! ```text
//! plan():  grid ─► ProgressStore::load ─► pending grid
//!
//! step():  cursor ─► BatchLoader::fill ─┬─ empty ──────────────────────────────┐
//!                                       └─ Preprocessor ─► Predictor ─► TileWriter ┴─► next cursor
//! ```
//!
//! Only one batch is in flight at a time. Everything that must survive a
//! restart is persisted by the writer (finished masks) and the progress store
//! (invalid log) before a step returns.

mod orchestrator;
mod types;

pub use orchestrator::BatchOrchestrator;
pub use types::{BatchPhase, BatchReport, PipelineError, PipelineResult, RunPlan, RunSummary};
