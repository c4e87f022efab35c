//! Tilecast CLI - Command-line interface
//!
//! ```text
//! tilecast <source> <model> <out_dir> [--mosaic <path>] [options]
//! tilecast mosaic <out_dir> <output>
//! ```
//!
//! Rerunning the first form with the same output directory resumes.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use commands::{mosaic, predict};
use error::CliError;

#[derive(Parser)]
#[command(name = "tilecast")]
#[command(version = tilecast::VERSION)]
#[command(about = "Tile a large raster, predict every tile, and mosaic the masks", long_about = None)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    predict: PredictCli,
}

#[derive(Subcommand)]
enum Commands {
    /// Mosaic existing prediction tiles without predicting
    Mosaic {
        /// Directory holding pred_<row>-<col>.tif tiles
        out_dir: PathBuf,

        /// Mosaic GeoTIFF to write
        output: PathBuf,

        /// Enable debug logging
        #[arg(long, short)]
        verbose: bool,
    },
}

#[derive(Args)]
struct PredictCli {
    /// Primary multi-band GeoTIFF
    #[arg(required = true)]
    source: Option<PathBuf>,

    /// ONNX segmentation model
    #[arg(required = true)]
    model: Option<PathBuf>,

    /// Output directory for tiles, progress log, and run log
    #[arg(required = true)]
    out_dir: Option<PathBuf>,

    /// Mosaic all tiles into this GeoTIFF after the run
    #[arg(long)]
    mosaic: Option<PathBuf>,

    /// INI configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Band statistics (.npy, shape 2 x selected bands)
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Secondary source aligned with the primary (repeatable; replaces path derivation)
    #[arg(long = "secondary")]
    secondary: Vec<PathBuf>,

    /// Maximum valid tiles per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Do not write comparison images
    #[arg(long)]
    no_comparison: bool,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl PredictCli {
    fn into_args(self) -> Result<predict::PredictArgs, CliError> {
        let missing = |name: &str| CliError::Config(format!("missing required argument <{}>", name));
        Ok(predict::PredictArgs {
            source: self.source.ok_or_else(|| missing("source"))?,
            model: self.model.ok_or_else(|| missing("model"))?,
            out_dir: self.out_dir.ok_or_else(|| missing("out_dir"))?,
            mosaic: self.mosaic,
            config: self.config,
            stats: self.stats,
            secondary: self.secondary,
            batch_size: self.batch_size,
            no_comparison: self.no_comparison,
            verbose: self.verbose,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Mosaic {
            out_dir,
            output,
            verbose,
        }) => mosaic::run(mosaic::MosaicArgs {
            out_dir,
            output,
            verbose,
        }),
        None => cli.predict.into_args().and_then(predict::run),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

/// Print the error and its causes.
fn report(error: &CliError) {
    eprintln!("{} {}", console::style("Error:").red().bold(), error);
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  caused by: {}", cause);
        source = cause.source();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_predict_form() {
        let cli = Cli::try_parse_from([
            "tilecast",
            "scene.tif",
            "model.onnx",
            "out",
            "--batch-size",
            "16",
            "--secondary",
            "a.tif",
            "--secondary",
            "b.tif",
            "--no-comparison",
        ])
        .unwrap();

        assert!(cli.command.is_none());
        let args = cli.predict.into_args().unwrap();
        assert_eq!(args.source, PathBuf::from("scene.tif"));
        assert_eq!(args.batch_size, Some(16));
        assert_eq!(args.secondary.len(), 2);
        assert!(args.no_comparison);
    }

    #[test]
    fn test_parses_mosaic_subcommand() {
        let cli = Cli::try_parse_from(["tilecast", "mosaic", "out", "mosaic.tif"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Mosaic { .. })));
    }

    #[test]
    fn test_predict_requires_positionals() {
        assert!(Cli::try_parse_from(["tilecast", "scene.tif"]).is_err());
    }
}
