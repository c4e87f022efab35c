//! Mosaic tile outputs into one raster.
//!
//! Uses the GDAL command line tools, which must be on `PATH`:
//!
//! ```text
//! *.tif ─► gdalbuildvrt -input_file_list tiles.txt mosaic.vrt   (temp dir)
//!        ─► gdal_translate -co COMPRESS=LZW mosaic.vrt <output>
//! ```
//!
//! The VRT and file list live in a temporary directory that is removed when
//! the build returns, whether it succeeded or not. Where tiles overlap, the
//! tile listed last wins, as `gdalbuildvrt` does.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

/// Result type for mosaic operations.
pub type MosaicResult<T> = Result<T, MosaicError>;

/// Errors raised while building a mosaic.
#[derive(Debug, Error)]
pub enum MosaicError {
    #[error("no .tif tiles found in {}", .dir.display())]
    NoTiles { dir: PathBuf },

    #[error("'{tool}' is not available: {reason}. Install GDAL (e.g. 'apt install gdal-bin')")]
    ToolNotFound { tool: String, reason: String },

    #[error("'{tool}' failed ({status}): {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("invalid tile pattern for {}: {reason}", .dir.display())]
    Pattern { dir: PathBuf, reason: String },

    #[error("mosaic I/O error at {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Builds a mosaic with `gdalbuildvrt` and `gdal_translate`.
#[derive(Debug, Clone)]
pub struct MosaicBuilder {
    vrt_tool: String,
    translate_tool: String,
    creation_options: Vec<String>,
    temp_root: Option<PathBuf>,
}

impl Default for MosaicBuilder {
    fn default() -> Self {
        Self {
            vrt_tool: "gdalbuildvrt".to_string(),
            translate_tool: "gdal_translate".to_string(),
            creation_options: vec!["COMPRESS=LZW".to_string()],
            temp_root: None,
        }
    }
}

impl MosaicBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use different executables (absolute paths or names on `PATH`).
    pub fn with_tools(mut self, vrt_tool: impl Into<String>, translate_tool: impl Into<String>) -> Self {
        self.vrt_tool = vrt_tool.into();
        self.translate_tool = translate_tool.into();
        self
    }

    /// Create the temporary directory under `root` instead of the system default.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Check both tools respond to `--version`.
    pub fn check_tools(&self) -> MosaicResult<()> {
        check_tool_available(&self.vrt_tool)?;
        check_tool_available(&self.translate_tool)?;
        Ok(())
    }

    /// Mosaic every tile in `tile_dir` into `output`.
    ///
    /// Returns the number of tiles mosaicked.
    pub fn build_from_dir(&self, tile_dir: &Path, output: &Path) -> MosaicResult<usize> {
        let tiles = collect_tiles(tile_dir, Some(output))?;
        self.build(&tiles, output)?;
        Ok(tiles.len())
    }

    /// Mosaic `tiles` into `output`.
    pub fn build(&self, tiles: &[PathBuf], output: &Path) -> MosaicResult<()> {
        if tiles.is_empty() {
            return Err(MosaicError::NoTiles {
                dir: output.parent().unwrap_or(Path::new(".")).to_path_buf(),
            });
        }
        self.check_tools()?;

        let temp = match &self.temp_root {
            Some(root) => tempfile::Builder::new().prefix("tilecast-mosaic").tempdir_in(root),
            None => tempfile::Builder::new().prefix("tilecast-mosaic").tempdir(),
        }
        .map_err(|source| MosaicError::Io {
            path: self.temp_root.clone().unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        let list_path = temp.path().join("tiles.txt");
        let vrt_path = temp.path().join("mosaic.vrt");

        let mut list = String::new();
        for tile in tiles {
            list.push_str(&tile.to_string_lossy());
            list.push('\n');
        }
        fs::write(&list_path, list).map_err(|source| MosaicError::Io {
            path: list_path.clone(),
            source,
        })?;

        debug!(tiles = tiles.len(), vrt = %vrt_path.display(), "Building VRT");
        let mut vrt = Command::new(&self.vrt_tool);
        vrt.arg("-input_file_list").arg(&list_path).arg(&vrt_path);
        run_tool(&self.vrt_tool, &mut vrt)?;

        let mut translate = Command::new(&self.translate_tool);
        for option in &self.creation_options {
            translate.arg("-co").arg(option);
        }
        translate.arg(&vrt_path).arg(output);
        run_tool(&self.translate_tool, &mut translate)?;

        info!(tiles = tiles.len(), output = %output.display(), "Mosaic written");
        Ok(())
    }
}

/// Sorted `*.tif` files in `dir`, excluding `exclude` if it lives there.
pub fn collect_tiles(dir: &Path, exclude: Option<&Path>) -> MosaicResult<Vec<PathBuf>> {
    let pattern = dir.join("*.tif");
    let pattern = pattern.to_str().ok_or_else(|| MosaicError::Pattern {
        dir: dir.to_path_buf(),
        reason: "path is not valid UTF-8".to_string(),
    })?;
    let entries = glob::glob(pattern).map_err(|e| MosaicError::Pattern {
        dir: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let excluded = exclude.and_then(|p| fs::canonicalize(p).ok());
    let mut tiles: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|path| match &excluded {
            Some(excluded) => fs::canonicalize(path).ok().as_ref() != Some(excluded),
            None => true,
        })
        .collect();
    tiles.sort();

    if tiles.is_empty() {
        return Err(MosaicError::NoTiles {
            dir: dir.to_path_buf(),
        });
    }
    Ok(tiles)
}

fn check_tool_available(tool: &str) -> MosaicResult<()> {
    match Command::new(tool).arg("--version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(output) => Err(MosaicError::ToolNotFound {
            tool: tool.to_string(),
            reason: format!("'--version' exited with {}", output.status),
        }),
        Err(e) => Err(MosaicError::ToolNotFound {
            tool: tool.to_string(),
            reason: e.to_string(),
        }),
    }
}

fn run_tool(tool: &str, command: &mut Command) -> MosaicResult<()> {
    let output = command.output().map_err(|e| MosaicError::ToolNotFound {
        tool: tool.to_string(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MosaicError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        });
    }
    Ok(())
}
