//! Persisted tile progress.
//!
//! Progress is derived from two on-disk sources so that an interrupted run can
//! resume where it stopped:
//!
//! - **done**: every `pred_<row>-<col>.tif` in the output directory
//! - **invalid**: the `invalid_indices.txt` log, one `row,col` per line
//!
//! The invalid log is append-only. It is never rewritten or compacted, and an
//! origin recorded there is never validated again.
//!
//! ```text
//! grid ──► load() ──► pending = grid − done − invalid
//!                       │
//!       loader ─────────┴──► append_invalid(origins)
//!       writer ────────────► pred_<row>-<col>.tif   (done)
//! ```

mod file;

pub use file::FileProgressStore;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::grid::TileOrigin;

/// Result type for progress operations.
pub type ProgressResult<T> = Result<T, ProgressError>;

/// Errors raised while reading or writing progress records.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// Failed to list the output directory.
    #[error("failed to scan {}: {source}", .path.display())]
    Scan { path: PathBuf, source: io::Error },

    /// Failed to read the invalid-tile log.
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    /// Failed to append to the invalid-tile log.
    #[error("failed to append to {}: {source}", .path.display())]
    Append { path: PathBuf, source: io::Error },

    /// A log line is not a `row,col` pair.
    #[error("{}:{line}: expected `row,col`, found {content:?}", .path.display())]
    MalformedEntry {
        path: PathBuf,
        line: usize,
        content: String,
    },
}

/// Lifecycle of a tile. Transitions out of `Pending` are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
    Pending,
    Invalid,
    Done,
}

/// Point-in-time view of persisted progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Origins with a finished output file.
    pub done: HashSet<TileOrigin>,
    /// Origins that failed the validity check in any earlier batch or run.
    pub invalid: HashSet<TileOrigin>,
}

impl ProgressSnapshot {
    /// Status of an origin. `Done` wins if an origin is somehow in both sets.
    pub fn status(&self, origin: &TileOrigin) -> TileStatus {
        if self.done.contains(origin) {
            TileStatus::Done
        } else if self.invalid.contains(origin) {
            TileStatus::Invalid
        } else {
            TileStatus::Pending
        }
    }
}

/// Persistent store of tile progress.
///
/// Injected into the orchestrator so resume behaviour can be tested without
/// touching the filesystem.
pub trait ProgressStore {
    /// Load done and invalid origins.
    fn load(&self) -> ProgressResult<ProgressSnapshot>;

    /// Record origins that failed the validity check.
    ///
    /// Called once per batch with every invalid origin found while filling
    /// it; an empty slice is a no-op.
    fn append_invalid(&self, origins: &[TileOrigin]) -> ProgressResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lookup() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.done.insert(TileOrigin::new(0, 0));
        snapshot.invalid.insert(TileOrigin::new(0, 300));

        assert_eq!(snapshot.status(&TileOrigin::new(0, 0)), TileStatus::Done);
        assert_eq!(snapshot.status(&TileOrigin::new(0, 300)), TileStatus::Invalid);
        assert_eq!(snapshot.status(&TileOrigin::new(300, 0)), TileStatus::Pending);
    }

    #[test]
    fn test_malformed_entry_message() {
        let err = ProgressError::MalformedEntry {
            path: PathBuf::from("/out/invalid_indices.txt"),
            line: 3,
            content: "12;4".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "/out/invalid_indices.txt:3: expected `row,col`, found \"12;4\""
        );
    }
}
