//! Run configuration.
//!
//! [`TilecastConfig::default`] reproduces the reference model's settings. Any
//! value can be overridden from an INI file:
//!
//! ```ini
//! [tiling]
//! tile_rows = 500
//! tile_cols = 500
//! overlap = 200
//! batch_size = 500
//!
//! [model]
//! rows = 512
//! cols = 512
//! inference_chunk = 32
//! threshold = 0.5
//!
//! [preprocess]
//! expected_bands = 12
//! nd_pairs = 3:11, 1:11, 1:3, 3:2
//! band_selection = 0, 1, 2, 3, 4, 5, 12, 13, 14, 15
//! stats_path = ./model_data/v2/mean_std.npy
//! comparison_band = 8
//!
//! [sources]
//! substitutions = s2_10m=s1_10m, s2_10m=s2_20m
//!
//! [output]
//! write_comparison = true
//! log_to_file = true
//! ```
//!
//! Unknown keys are ignored; missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;

use crate::grid::{GridError, GridSpec};
use crate::raster::PathSubstitution;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config {}: {reason}", .path.display())]
    Load { path: PathBuf, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value for [{section}] {key} = {value:?}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid tiling: {0}")]
    Grid(#[from] GridError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Tile grid and batching.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingConfig {
    pub tile_rows: usize,
    pub tile_cols: usize,
    pub overlap: usize,
    /// Maximum valid tiles per batch.
    pub batch_size: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_rows: 500,
            tile_cols: 500,
            overlap: 200,
            batch_size: 500,
        }
    }
}

/// Model input geometry and decision threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub rows: usize,
    pub cols: usize,
    /// Tiles per inference call within a batch.
    pub inference_chunk: usize,
    /// Probabilities at or above this value become foreground.
    pub threshold: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            rows: 512,
            cols: 512,
            inference_chunk: 32,
            threshold: 0.5,
        }
    }
}

/// Band engineering applied before inference.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    /// Total stacked band count the model was trained on. `None` skips the check.
    pub expected_bands: Option<usize>,
    /// Normalized-difference pairs `(a, b)` appended as `(a - b) / (a + b)`.
    pub nd_pairs: Vec<(usize, usize)>,
    /// Bands kept after the normalized differences are appended.
    pub band_selection: Vec<usize>,
    /// `.npy` of shape `(2, band_selection.len())`: means then std devs.
    pub stats_path: PathBuf,
    /// Selected band shown in comparison images. Defaults to the second-to-last.
    pub comparison_band: Option<usize>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            expected_bands: Some(12),
            nd_pairs: vec![(3, 11), (1, 11), (1, 3), (3, 2)],
            band_selection: vec![0, 1, 2, 3, 4, 5, 12, 13, 14, 15],
            stats_path: PathBuf::from("./model_data/v2/mean_std.npy"),
            comparison_band: None,
        }
    }
}

impl PreprocessConfig {
    /// Index into the selected bands used for comparison images.
    pub fn comparison_band_index(&self) -> usize {
        self.comparison_band
            .unwrap_or_else(|| self.band_selection.len().saturating_sub(2))
    }
}

/// Secondary source discovery.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcesConfig {
    /// Applied in order to the primary path; one secondary per rule.
    pub substitutions: Vec<PathSubstitution>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            substitutions: vec![
                PathSubstitution::new("s2_10m", "s1_10m"),
                PathSubstitution::new("s2_10m", "s2_20m"),
            ],
        }
    }
}

/// Output artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfig {
    pub write_comparison: bool,
    /// Also write `tilecast.log` into the output directory.
    pub log_to_file: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            write_comparison: true,
            log_to_file: true,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TilecastConfig {
    pub tiling: TilingConfig,
    pub model: ModelConfig,
    pub preprocess: PreprocessConfig,
    pub sources: SourcesConfig,
    pub output: OutputConfig,
}

impl TilecastConfig {
    /// Defaults overlaid with values from an INI file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config = Self::default();
        config.apply_ini(&ini)?;
        Ok(config)
    }

    /// Defaults overlaid with values from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();
        config.apply_ini(&ini)?;
        Ok(config)
    }

    /// Overlay every key present in `ini`.
    pub fn apply_ini(&mut self, ini: &Ini) -> Result<(), ConfigError> {
        let reader = IniReader { ini };

        let t = &mut self.tiling;
        reader.parse_into("tiling", "tile_rows", &mut t.tile_rows)?;
        reader.parse_into("tiling", "tile_cols", &mut t.tile_cols)?;
        reader.parse_into("tiling", "overlap", &mut t.overlap)?;
        reader.parse_into("tiling", "batch_size", &mut t.batch_size)?;

        let m = &mut self.model;
        reader.parse_into("model", "rows", &mut m.rows)?;
        reader.parse_into("model", "cols", &mut m.cols)?;
        reader.parse_into("model", "inference_chunk", &mut m.inference_chunk)?;
        reader.parse_into("model", "threshold", &mut m.threshold)?;

        let p = &mut self.preprocess;
        if let Some(value) = reader.get("preprocess", "expected_bands") {
            p.expected_bands = match value.trim() {
                "" | "none" => None,
                v => Some(parse_value("preprocess", "expected_bands", v)?),
            };
        }
        if let Some(value) = reader.get("preprocess", "nd_pairs") {
            p.nd_pairs = parse_pairs(value)?;
        }
        if let Some(value) = reader.get("preprocess", "band_selection") {
            p.band_selection = parse_list("preprocess", "band_selection", value)?;
        }
        if let Some(value) = reader.get("preprocess", "stats_path") {
            p.stats_path = PathBuf::from(value.trim());
        }
        if let Some(value) = reader.get("preprocess", "comparison_band") {
            p.comparison_band = Some(parse_value("preprocess", "comparison_band", value)?);
        }

        if let Some(value) = reader.get("sources", "substitutions") {
            self.sources.substitutions = parse_substitutions(value)?;
        }

        let o = &mut self.output;
        reader.parse_bool_into("output", "write_comparison", &mut o.write_comparison)?;
        reader.parse_bool_into("output", "log_to_file", &mut o.log_to_file)?;

        Ok(())
    }

    /// Grid geometry from the tiling section.
    pub fn grid_spec(&self) -> Result<GridSpec, GridError> {
        GridSpec::new(
            self.tiling.tile_rows,
            self.tiling.tile_cols,
            self.tiling.overlap,
        )
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid_spec()?;

        if self.tiling.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.model.rows == 0 || self.model.cols == 0 {
            return Err(ConfigError::Invalid("model input size must be non-zero".into()));
        }
        if self.model.inference_chunk == 0 {
            return Err(ConfigError::Invalid(
                "inference_chunk must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.model.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold {} is outside 0..=1",
                self.model.threshold
            )));
        }

        let p = &self.preprocess;
        if p.band_selection.is_empty() {
            return Err(ConfigError::Invalid("band_selection is empty".into()));
        }
        if let Some(bands) = p.expected_bands {
            if let Some(&(a, b)) = p.nd_pairs.iter().find(|(a, b)| *a >= bands || *b >= bands) {
                return Err(ConfigError::Invalid(format!(
                    "nd pair {a}:{b} references a band beyond the {bands} input bands"
                )));
            }
            let available = bands + p.nd_pairs.len();
            if let Some(&index) = p.band_selection.iter().find(|&&i| i >= available) {
                return Err(ConfigError::Invalid(format!(
                    "band_selection index {index} exceeds the {available} available bands"
                )));
            }
        }
        if p.comparison_band_index() >= p.band_selection.len() {
            return Err(ConfigError::Invalid(format!(
                "comparison_band {} exceeds the {} selected bands",
                p.comparison_band_index(),
                p.band_selection.len()
            )));
        }

        Ok(())
    }
}

struct IniReader<'a> {
    ini: &'a Ini,
}

impl IniReader<'_> {
    fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.ini.section(Some(section)).and_then(|s| s.get(key))
    }

    fn parse_into<T: FromStr>(
        &self,
        section: &str,
        key: &str,
        target: &mut T,
    ) -> Result<(), ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.get(section, key) {
            *target = parse_value(section, key, value)?;
        }
        Ok(())
    }

    fn parse_bool_into(&self, section: &str, key: &str, target: &mut bool) -> Result<(), ConfigError> {
        if let Some(value) = self.get(section, key) {
            *target = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => {
                    return Err(invalid(section, key, value, "expected true or false"));
                }
            };
        }
        Ok(())
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_value<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| invalid(section, key, value, e.to_string()))
}

fn parse_list(section: &str, key: &str, value: &str) -> Result<Vec<usize>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse_value(section, key, item))
        .collect()
}

/// `3:11, 1:11` → `[(3, 11), (1, 11)]`
fn parse_pairs(value: &str) -> Result<Vec<(usize, usize)>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (a, b) = item
                .split_once(':')
                .ok_or_else(|| invalid("preprocess", "nd_pairs", item, "expected a:b"))?;
            Ok((
                parse_value("preprocess", "nd_pairs", a)?,
                parse_value("preprocess", "nd_pairs", b)?,
            ))
        })
        .collect()
}

/// `s2_10m=s1_10m, s2_10m=s2_20m`
fn parse_substitutions(value: &str) -> Result<Vec<PathSubstitution>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (pattern, replacement) = item.split_once('=').ok_or_else(|| {
                invalid("sources", "substitutions", item, "expected pattern=replacement")
            })?;
            let pattern = pattern.trim();
            if pattern.is_empty() {
                return Err(invalid("sources", "substitutions", item, "empty pattern"));
            }
            Ok(PathSubstitution::new(pattern, replacement.trim()))
        })
        .collect()
}
