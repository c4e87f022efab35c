//! Filesystem-backed progress store.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{ProgressError, ProgressResult, ProgressSnapshot, ProgressStore};
use crate::grid::TileOrigin;
use crate::naming::{parse_mask_filename, INVALID_LOG_NAME};

/// Progress store reading finished tiles and the invalid log from the
/// output directory.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    out_dir: PathBuf,
    invalid_log: PathBuf,
}

impl FileProgressStore {
    /// Store rooted at `out_dir`, with the invalid log inside it.
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        let out_dir = out_dir.into();
        let invalid_log = out_dir.join(INVALID_LOG_NAME);
        Self {
            out_dir,
            invalid_log,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn invalid_log(&self) -> &Path {
        &self.invalid_log
    }

    /// Origins with a finished `pred_<row>-<col>.tif`.
    pub fn scan_done(&self) -> ProgressResult<HashSet<TileOrigin>> {
        let entries = match fs::read_dir(&self.out_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(source) => {
                return Err(ProgressError::Scan {
                    path: self.out_dir.clone(),
                    source,
                })
            }
        };

        let mut done = HashSet::new();
        for entry in entries {
            let entry = entry.map_err(|source| ProgressError::Scan {
                path: self.out_dir.clone(),
                source,
            })?;
            let filename = entry.file_name();
            if let Some(origin) = filename.to_str().and_then(parse_mask_filename) {
                done.insert(origin);
            }
        }

        Ok(done)
    }

    /// Origins recorded in the invalid log.
    pub fn read_invalid(&self) -> ProgressResult<HashSet<TileOrigin>> {
        let content = match fs::read_to_string(&self.invalid_log) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(source) => {
                return Err(ProgressError::Read {
                    path: self.invalid_log.clone(),
                    source,
                })
            }
        };

        let mut invalid = HashSet::new();
        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let origin = parse_log_line(trimmed).ok_or_else(|| ProgressError::MalformedEntry {
                path: self.invalid_log.clone(),
                line: index + 1,
                content: trimmed.to_string(),
            })?;
            invalid.insert(origin);
        }

        Ok(invalid)
    }
}

impl ProgressStore for FileProgressStore {
    fn load(&self) -> ProgressResult<ProgressSnapshot> {
        let done = self.scan_done()?;
        let invalid = self.read_invalid()?;

        debug!(
            out_dir = %self.out_dir.display(),
            done = done.len(),
            invalid = invalid.len(),
            "Loaded tile progress"
        );

        Ok(ProgressSnapshot { done, invalid })
    }

    fn append_invalid(&self, origins: &[TileOrigin]) -> ProgressResult<()> {
        if origins.is_empty() {
            return Ok(());
        }

        let append_err = |source| ProgressError::Append {
            path: self.invalid_log.clone(),
            source,
        };

        let mut lines = String::with_capacity(origins.len() * 12);
        for origin in origins {
            lines.push_str(&format!("{},{}\n", origin.row, origin.col));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.invalid_log)
            .map_err(append_err)?;
        file.write_all(lines.as_bytes()).map_err(append_err)?;
        file.flush().map_err(append_err)?;

        Ok(())
    }
}

fn parse_log_line(line: &str) -> Option<TileOrigin> {
    let (row, col) = line.split_once(',')?;
    let row = row.trim().parse::<usize>().ok()?;
    let col = col.trim().parse::<usize>().ok()?;
    Some(TileOrigin::new(row, col))
}
