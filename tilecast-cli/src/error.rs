//! CLI error type.

use std::fmt;
use std::path::PathBuf;

use tilecast::config::ConfigError;
use tilecast::logging::LoggingError;
use tilecast::mosaic::MosaicError;
use tilecast::pipeline::PipelineError;
use tilecast::predict::PredictError;
use tilecast::preprocess::PreprocessError;
use tilecast::raster::RasterError;

/// Errors surfaced to the user. Every variant exits with status 1.
#[derive(Debug)]
pub enum CliError {
    /// Configuration file or flag values rejected
    Config(String),
    /// Filesystem error outside the library
    Io { path: PathBuf, source: std::io::Error },
    /// Logging could not be set up
    Logging(LoggingError),
    /// Sources could not be opened or aligned
    Raster(RasterError),
    /// Statistics or band layout rejected
    Preprocess(PreprocessError),
    /// Model could not be loaded
    Predict(PredictError),
    /// Prediction run failed
    Pipeline(PipelineError),
    /// Mosaic failed
    Mosaic(MosaicError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            CliError::Logging(e) => write!(f, "Logging error: {}", e),
            CliError::Raster(e) => write!(f, "Source error: {}", e),
            CliError::Preprocess(e) => write!(f, "Preprocessing error: {}", e),
            CliError::Predict(e) => write!(f, "Model error: {}", e),
            CliError::Pipeline(e) => write!(f, "{}", e),
            CliError::Mosaic(e) => write!(f, "Mosaic error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::Io { source, .. } => Some(source),
            CliError::Logging(e) => Some(e),
            CliError::Raster(e) => Some(e),
            CliError::Preprocess(e) => Some(e),
            CliError::Predict(e) => Some(e),
            CliError::Pipeline(e) => std::error::Error::source(e),
            CliError::Mosaic(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<RasterError> for CliError {
    fn from(e: RasterError) -> Self {
        CliError::Raster(e)
    }
}

impl From<PreprocessError> for CliError {
    fn from(e: PreprocessError) -> Self {
        CliError::Preprocess(e)
    }
}

impl From<PredictError> for CliError {
    fn from(e: PredictError) -> Self {
        CliError::Predict(e)
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        CliError::Pipeline(e)
    }
}

impl From<MosaicError> for CliError {
    fn from(e: MosaicError) -> Self {
        CliError::Mosaic(e)
    }
}
