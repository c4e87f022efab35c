//! Predict command - tile a raster, predict every valid tile, write masks.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use tilecast::config::TilecastConfig;
use tilecast::logging::{self, LogOptions};
use tilecast::output::TileWriter;
use tilecast::pipeline::{BatchOrchestrator, BatchReport};
use tilecast::predict::Predictor;
use tilecast::preprocess::SpectralPreprocessor;
use tilecast::progress::FileProgressStore;
use tilecast::raster::{derive_secondary_paths, GeoTiffSource, RasterSource, SourceSet};

use super::mosaic;
use crate::error::CliError;

/// Arguments for the predict command.
pub struct PredictArgs {
    pub source: PathBuf,
    pub model: PathBuf,
    pub out_dir: PathBuf,
    pub mosaic: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub stats: Option<PathBuf>,
    pub secondary: Vec<PathBuf>,
    pub batch_size: Option<usize>,
    pub no_comparison: bool,
    pub verbose: bool,
}

/// Run the predict command.
pub fn run(args: PredictArgs) -> Result<(), CliError> {
    let config = resolve_config(&args)?;

    std::fs::create_dir_all(&args.out_dir).map_err(|source| CliError::Io {
        path: args.out_dir.clone(),
        source,
    })?;

    let mut log_options = LogOptions::new(args.verbose);
    if config.output.log_to_file {
        log_options = log_options.with_log_dir(&args.out_dir);
    }
    let _log_guard = logging::init(&log_options)?;

    let sources = open_sources(&args.source, &args.secondary, &config)?;
    if let Some(expected) = config.preprocess.expected_bands {
        sources.expect_bands(expected)?;
    }
    let spec = config.grid_spec().map_err(|e| CliError::Config(e.to_string()))?;

    let preprocessor = SpectralPreprocessor::from_config(&config.preprocess, &config.model)?;
    let predictor = build_predictor(&args.model, config.model.inference_chunk)?;

    let primary = sources.primary();
    let mut writer = TileWriter::new(
        &args.out_dir,
        spec,
        config.model.threshold,
        primary.transform(),
        primary.crs().clone(),
    );
    if config.output.write_comparison {
        writer = writer.with_comparison(config.preprocess.comparison_band_index());
    }

    let orchestrator = BatchOrchestrator::new(
        sources,
        spec,
        config.tiling.batch_size,
        Box::new(preprocessor),
        predictor,
        writer,
        Box::new(FileProgressStore::new(&args.out_dir)),
    );

    println!(
        "{} v{}",
        style("Tilecast Prediction").bold(),
        tilecast::VERSION
    );
    println!("Source:  {}", args.source.display());
    for secondary in orchestrator.sources().secondaries() {
        println!("         + {}", secondary.name());
    }
    println!("Model:   {}", args.model.display());
    println!("Output:  {}", args.out_dir.display());
    println!(
        "Tiles:   {}x{} px, overlap {}, batch {}",
        orchestrator.spec().tile_rows(),
        orchestrator.spec().tile_cols(),
        orchestrator.spec().overlap(),
        config.tiling.batch_size
    );
    println!();

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .map_err(|e| CliError::Config(format!("Invalid progress template: {}", e)))?
            .progress_chars("#>-"),
    );

    let summary = orchestrator.run_until(|report: &BatchReport| {
        bar.set_length(report.pending_total as u64);
        bar.set_position(report.next.next_index as u64);
        bar.set_message(format!(
            "batch {}: {} predicted, {} invalid",
            report.index, report.predicted, report.skipped_invalid
        ));
        ControlFlow::Continue(())
    })?;
    bar.finish_and_clear();

    println!("Run Summary");
    println!("───────────");
    println!("  Grid tiles:      {}", summary.grid_tiles);
    println!("  Already done:    {}", summary.already_done);
    println!("  Known invalid:   {}", summary.known_invalid);
    println!("  Predicted:       {}", summary.predicted);
    println!("  Skipped invalid: {}", summary.skipped_invalid);
    println!("  Batches:         {}", summary.batches);

    if let Some(output) = &args.mosaic {
        info!(output = %output.display(), "Building mosaic");
        let count = mosaic::build(&args.out_dir, output)?;
        println!();
        println!("Mosaicked {} tiles into {}", count, output.display());
    }

    Ok(())
}

/// Config file (or defaults) with CLI flags applied on top.
fn resolve_config(args: &PredictArgs) -> Result<TilecastConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => TilecastConfig::from_file(path)?,
        None => TilecastConfig::default(),
    };

    if let Some(stats) = &args.stats {
        config.preprocess.stats_path = stats.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.tiling.batch_size = batch_size;
    }
    if args.no_comparison {
        config.output.write_comparison = false;
    }

    config.validate()?;
    Ok(config)
}

/// Open the primary and its secondaries.
///
/// Explicit secondaries win; otherwise they are derived from the primary
/// path with the configured substitutions.
fn open_sources(
    primary: &Path,
    explicit: &[PathBuf],
    config: &TilecastConfig,
) -> Result<SourceSet, CliError> {
    let secondary_paths = if explicit.is_empty() {
        derive_secondary_paths(primary, &config.sources.substitutions)?
    } else {
        explicit.to_vec()
    };

    let primary: Box<dyn RasterSource> = Box::new(GeoTiffSource::open(primary)?);
    let secondaries = secondary_paths
        .iter()
        .map(|path| GeoTiffSource::open(path).map(|s| Box::new(s) as Box<dyn RasterSource>))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SourceSet::new(primary, secondaries)?)
}

#[cfg(feature = "onnx")]
fn build_predictor(model: &Path, chunk: usize) -> Result<Box<dyn Predictor>, CliError> {
    let predictor = tilecast::predict::OnnxPredictor::new(model, chunk)?;
    Ok(Box::new(predictor))
}

#[cfg(not(feature = "onnx"))]
fn build_predictor(_model: &Path, _chunk: usize) -> Result<Box<dyn Predictor>, CliError> {
    Err(tilecast::predict::PredictError::BackendUnavailable.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args() -> PredictArgs {
        PredictArgs {
            source: PathBuf::from("/data/scene_s2_10m.tif"),
            model: PathBuf::from("model.onnx"),
            out_dir: PathBuf::from("/tmp/out"),
            mosaic: None,
            config: None,
            stats: None,
            secondary: Vec::new(),
            batch_size: None,
            no_comparison: false,
            verbose: false,
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        let mut args = args();
        args.batch_size = Some(8);
        args.stats = Some(PathBuf::from("stats.npy"));
        args.no_comparison = true;

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.tiling.batch_size, 8);
        assert_eq!(config.preprocess.stats_path, PathBuf::from("stats.npy"));
        assert!(!config.output.write_comparison);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tiling]\nbatch_size = 64\n[output]\nwrite_comparison = true").unwrap();

        let mut args = args();
        args.config = Some(file.path().to_path_buf());
        args.batch_size = Some(4);

        let config = resolve_config(&args).unwrap();
        assert_eq!(config.tiling.batch_size, 4);
        assert!(config.output.write_comparison);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut args = args();
        args.batch_size = Some(0);
        assert!(matches!(resolve_config(&args), Err(CliError::Config(_))));
    }

    #[test]
    fn test_missing_primary_is_source_error() {
        let config = TilecastConfig::default();
        let result = open_sources(Path::new("/nonexistent/scene_s2_10m.tif"), &[], &config);
        assert!(matches!(result, Err(CliError::Raster(_))));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_no_backend_without_onnx() {
        assert!(matches!(
            build_predictor(Path::new("model.onnx"), 32),
            Err(CliError::Predict(_))
        ));
    }
}
