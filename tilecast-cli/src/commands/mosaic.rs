//! Mosaic command - merge existing prediction tiles into one raster.

use std::path::{Path, PathBuf};

use tilecast::logging::{self, LogOptions};
use tilecast::mosaic::MosaicBuilder;

use crate::error::CliError;

/// Arguments for the mosaic command.
pub struct MosaicArgs {
    pub out_dir: PathBuf,
    pub output: PathBuf,
    pub verbose: bool,
}

/// Run the mosaic command.
pub fn run(args: MosaicArgs) -> Result<(), CliError> {
    let _log_guard = logging::init(&LogOptions::new(args.verbose))?;
    let count = build(&args.out_dir, &args.output)?;
    println!("Mosaicked {} tiles into {}", count, args.output.display());
    Ok(())
}

/// Mosaic every tile in `out_dir`; shared with the predict command.
pub fn build(out_dir: &Path, output: &Path) -> Result<usize, CliError> {
    if !out_dir.is_dir() {
        return Err(CliError::Io {
            path: out_dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        });
    }
    Ok(MosaicBuilder::new().build_from_dir(out_dir, output)?)
}
