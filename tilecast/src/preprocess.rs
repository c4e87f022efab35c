//! Raw tile batch to model input.
//!
//! The [`Preprocessor`] trait is the seam between band stacking and the
//! model. [`SpectralPreprocessor`] implements the reference pipeline:
//!
//! ```text
//! (n, bands, tr, tc)
//!   │ channel-last
//!   ▼
//! (n, tr, tc, bands)
//!   │ + normalized differences, rescaled per batch to 0..=65535
//!   ▼
//! (n, tr, tc, bands + pairs)
//!   │ band selection, (v - mean) / std
//!   ▼
//! (n, tr, tc, k)
//!   │ bilinear resize per tile (rayon)
//!   ▼
//! (n, model_rows, model_cols, k)
//! ```

use std::path::{Path, PathBuf};

use ndarray::{s, Array2, Array3, Array4, ArrayView4, Axis, Zip};
use ndarray_npy::read_npy;
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::config::{ModelConfig, PreprocessConfig};
use crate::imaging::resize_plane;

/// Result type for preprocessing.
pub type PreprocessResult<T> = Result<T, PreprocessError>;

/// Errors raised while loading statistics or transforming a batch.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("failed to read band statistics {}: {reason}", .path.display())]
    Statistics { path: PathBuf, reason: String },

    #[error("band statistics have shape {rows}x{cols}, expected 2x{expected}")]
    StatisticsShape {
        rows: usize,
        cols: usize,
        expected: usize,
    },

    #[error("standard deviation of selected band {band} is {value}")]
    DegenerateStd { band: usize, value: f32 },

    #[error("normalized difference {a}:{b} references a band beyond the {bands} input bands")]
    PairOutOfRange { a: usize, b: usize, bands: usize },

    #[error("band selection index {index} exceeds the {available} available bands")]
    SelectionOutOfRange { index: usize, available: usize },
}

/// Converts raw stacked tiles into model input.
pub trait Preprocessor: Send + Sync {
    /// `raw` is `(n, bands, tile_rows, tile_cols)`; the result is
    /// `(n, model_rows, model_cols, channels)`.
    fn prepare(&self, raw: ArrayView4<'_, f32>) -> PreprocessResult<Array4<f32>>;
}

/// Per-band mean and standard deviation for the selected bands.
#[derive(Debug, Clone, PartialEq)]
pub struct BandStatistics {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl BandStatistics {
    /// # Errors
    ///
    /// Fails when the lengths differ or a standard deviation is zero or
    /// non-finite.
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> PreprocessResult<Self> {
        if mean.len() != std.len() {
            return Err(PreprocessError::StatisticsShape {
                rows: 2,
                cols: std.len(),
                expected: mean.len(),
            });
        }
        if let Some((band, &value)) = std
            .iter()
            .enumerate()
            .find(|(_, v)| **v == 0.0 || !v.is_finite())
        {
            return Err(PreprocessError::DegenerateStd { band, value });
        }
        Ok(Self { mean, std })
    }

    /// Load a `(2, bands)` `.npy` array, row 0 means and row 1 std devs.
    ///
    /// Both `f64` and `f32` arrays are accepted.
    pub fn load(path: impl AsRef<Path>) -> PreprocessResult<Self> {
        let path = path.as_ref();
        let array: Array2<f32> = match read_npy::<_, Array2<f64>>(path) {
            Ok(array) => array.mapv(|v| v as f32),
            Err(f64_err) => read_npy::<_, Array2<f32>>(path).map_err(|_| {
                PreprocessError::Statistics {
                    path: path.to_path_buf(),
                    reason: f64_err.to_string(),
                }
            })?,
        };

        let (rows, cols) = array.dim();
        if rows != 2 {
            return Err(PreprocessError::StatisticsShape {
                rows,
                cols,
                expected: cols,
            });
        }

        debug!(path = %path.display(), bands = cols, "Loaded band statistics");
        Self::new(array.row(0).to_vec(), array.row(1).to_vec())
    }

    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn std(&self) -> &[f32] {
        &self.std
    }
}

/// Normalized difference `(a - b) / (a + b)`, `0` where `a + b == 0`.
pub fn normalized_difference(a: f32, b: f32) -> f32 {
    let sum = a + b;
    if sum == 0.0 {
        0.0
    } else {
        (a - b) / sum
    }
}

/// Rescale in place to `0..=65535` using the finite min/max, truncating to
/// whole numbers. Constant input and non-finite values become `0`.
pub fn rescale_to_u16_range(values: &mut [f32]) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in values.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }

    if max <= min {
        values.iter_mut().for_each(|v| *v = 0.0);
        return;
    }

    let span = max - min;
    for v in values.iter_mut() {
        *v = if v.is_finite() {
            (65535.0 * (*v - min) / span).trunc()
        } else {
            0.0
        };
    }
}

/// Reference spectral pipeline.
#[derive(Debug, Clone)]
pub struct SpectralPreprocessor {
    nd_pairs: Vec<(usize, usize)>,
    selection: Vec<usize>,
    statistics: BandStatistics,
    model_rows: usize,
    model_cols: usize,
}

impl SpectralPreprocessor {
    /// # Errors
    ///
    /// Fails when the statistics do not cover exactly the selected bands.
    pub fn new(
        nd_pairs: Vec<(usize, usize)>,
        selection: Vec<usize>,
        statistics: BandStatistics,
        model_rows: usize,
        model_cols: usize,
    ) -> PreprocessResult<Self> {
        if statistics.len() != selection.len() {
            return Err(PreprocessError::StatisticsShape {
                rows: 2,
                cols: statistics.len(),
                expected: selection.len(),
            });
        }
        Ok(Self {
            nd_pairs,
            selection,
            statistics,
            model_rows,
            model_cols,
        })
    }

    /// Build from configuration, loading statistics from `stats_path`.
    pub fn from_config(preprocess: &PreprocessConfig, model: &ModelConfig) -> PreprocessResult<Self> {
        let statistics = BandStatistics::load(&preprocess.stats_path)?;
        Self::new(
            preprocess.nd_pairs.clone(),
            preprocess.band_selection.clone(),
            statistics,
            model.rows,
            model.cols,
        )
    }

    pub fn channels(&self) -> usize {
        self.selection.len()
    }

    /// One normalized-difference plane set `(n, tr, tc)` per pair.
    fn difference_bands(&self, raw: &ArrayView4<'_, f32>) -> PreprocessResult<Vec<Array3<f32>>> {
        let (n, bands, rows, cols) = raw.dim();
        self.nd_pairs
            .iter()
            .map(|&(a, b)| {
                if a >= bands || b >= bands {
                    return Err(PreprocessError::PairOutOfRange { a, b, bands });
                }
                let mut nd = Array3::<f32>::zeros((n, rows, cols));
                Zip::from(&mut nd)
                    .and(raw.index_axis(Axis(1), a))
                    .and(raw.index_axis(Axis(1), b))
                    .for_each(|out, &va, &vb| *out = normalized_difference(va, vb));
                if let Some(values) = nd.as_slice_mut() {
                    rescale_to_u16_range(values);
                }
                Ok(nd)
            })
            .collect()
    }
}

impl Preprocessor for SpectralPreprocessor {
    fn prepare(&self, raw: ArrayView4<'_, f32>) -> PreprocessResult<Array4<f32>> {
        let (n, bands, rows, cols) = raw.dim();
        let differences = self.difference_bands(&raw)?;
        let available = bands + differences.len();

        // Selected and normalized, channel-last.
        let mut selected = Array4::<f32>::zeros((n, rows, cols, self.selection.len()));
        for (channel, &index) in self.selection.iter().enumerate() {
            let source = if index < bands {
                raw.index_axis(Axis(1), index)
            } else if index < available {
                differences[index - bands].view()
            } else {
                return Err(PreprocessError::SelectionOutOfRange { index, available });
            };
            let mean = self.statistics.mean[channel];
            let std = self.statistics.std[channel];
            Zip::from(selected.index_axis_mut(Axis(3), channel))
                .and(&source)
                .for_each(|out, &v| *out = (v - mean) / std);
        }

        let (model_rows, model_cols) = (self.model_rows, self.model_cols);
        let channels = self.selection.len();
        let tiles: Vec<Array3<f32>> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut tile = Array3::<f32>::zeros((model_rows, model_cols, channels));
                for channel in 0..channels {
                    let plane = selected.slice(s![i, .., .., channel]);
                    tile.slice_mut(s![.., .., channel])
                        .assign(&resize_plane(plane, model_rows, model_cols));
                }
                tile
            })
            .collect();

        let mut input = Array4::<f32>::zeros((n, model_rows, model_cols, channels));
        for (i, tile) in tiles.into_iter().enumerate() {
            input.index_axis_mut(Axis(0), i).assign(&tile);
        }

        debug!(
            tiles = n,
            channels,
            model_rows,
            model_cols,
            "Prepared model input"
        );
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_npy::write_npy;
    use tempfile::TempDir;

    #[test]
    fn test_normalized_difference() {
        assert_eq!(normalized_difference(3.0, 1.0), 0.5);
        assert_eq!(normalized_difference(1.0, 3.0), -0.5);
        assert_eq!(normalized_difference(0.0, 0.0), 0.0);
        assert_eq!(normalized_difference(2.0, -2.0), 0.0);
    }

    #[test]
    fn test_rescale_truncates_into_u16_range() {
        let mut values = vec![-1.0, 0.0, 1.0, 0.5];
        rescale_to_u16_range(&mut values);
        assert_eq!(values, vec![0.0, 32767.0, 65535.0, 49151.0]);
    }

    #[test]
    fn test_rescale_constant_is_zero() {
        let mut values = vec![0.25; 5];
        rescale_to_u16_range(&mut values);
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_statistics_reject_zero_std() {
        assert!(matches!(
            BandStatistics::new(vec![0.0, 1.0], vec![1.0, 0.0]),
            Err(PreprocessError::DegenerateStd { band: 1, .. })
        ));
    }

    #[test]
    fn test_statistics_load_f64_and_f32() {
        let temp = TempDir::new().unwrap();

        let f64_path = temp.path().join("mean_std64.npy");
        let array = ndarray::array![[1.0f64, 2.0], [0.5, 4.0]];
        write_npy(&f64_path, &array).unwrap();
        let stats = BandStatistics::load(&f64_path).unwrap();
        assert_eq!(stats.mean(), &[1.0, 2.0]);
        assert_eq!(stats.std(), &[0.5, 4.0]);

        let f32_path = temp.path().join("mean_std32.npy");
        let array = ndarray::array![[3.0f32], [2.0]];
        write_npy(&f32_path, &array).unwrap();
        let stats = BandStatistics::load(&f32_path).unwrap();
        assert_eq!(stats.mean(), &[3.0]);
    }

    #[test]
    fn test_statistics_wrong_shape() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.npy");
        write_npy(&path, &ndarray::Array2::<f64>::ones((3, 2))).unwrap();

        assert!(matches!(
            BandStatistics::load(&path),
            Err(PreprocessError::StatisticsShape { rows: 3, .. })
        ));
    }

    #[test]
    fn test_statistics_missing_file() {
        assert!(matches!(
            BandStatistics::load("/nonexistent/mean_std.npy"),
            Err(PreprocessError::Statistics { .. })
        ));
    }

    fn raw_batch() -> Array4<f32> {
        // band 0 = 3, band 1 = 1 everywhere except tile 1 where band 1 = 3
        Array4::from_shape_fn((2, 2, 4, 4), |(i, b, _, _)| match (i, b) {
            (_, 0) => 3.0,
            (0, _) => 1.0,
            _ => 3.0,
        })
    }

    #[test]
    fn test_prepare_shape_and_channel_order() {
        let stats = BandStatistics::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let pre = SpectralPreprocessor::new(vec![(0, 1)], vec![2, 0], stats, 8, 8).unwrap();

        let input = pre.prepare(raw_batch().view()).unwrap();
        assert_eq!(input.dim(), (2, 8, 8, 2));

        // ND is 0.5 for tile 0 and 0 for tile 1; batch rescale maps them to
        // 65535 and 0.
        assert!((input[[0, 3, 3, 0]] - 65535.0).abs() < 0.5);
        assert!(input[[1, 3, 3, 0]].abs() < 0.5);
        assert!((input[[0, 0, 0, 1]] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn test_prepare_normalizes_with_statistics() {
        let stats = BandStatistics::new(vec![1.0], vec![2.0]).unwrap();
        let pre = SpectralPreprocessor::new(vec![], vec![0], stats, 4, 4).unwrap();

        let input = pre.prepare(raw_batch().view()).unwrap();
        assert_eq!(input.dim(), (2, 4, 4, 1));
        assert!(input.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_selection_out_of_range() {
        let stats = BandStatistics::new(vec![0.0], vec![1.0]).unwrap();
        let pre = SpectralPreprocessor::new(vec![(0, 1)], vec![3], stats, 4, 4).unwrap();

        assert!(matches!(
            pre.prepare(raw_batch().view()),
            Err(PreprocessError::SelectionOutOfRange {
                index: 3,
                available: 3
            })
        ));
    }

    #[test]
    fn test_pair_out_of_range() {
        let stats = BandStatistics::new(vec![0.0], vec![1.0]).unwrap();
        let pre = SpectralPreprocessor::new(vec![(0, 5)], vec![0], stats, 4, 4).unwrap();
        assert!(matches!(
            pre.prepare(raw_batch().view()),
            Err(PreprocessError::PairOutOfRange { b: 5, .. })
        ));
    }

    #[test]
    fn test_statistics_must_match_selection() {
        let stats = BandStatistics::new(vec![0.0], vec![1.0]).unwrap();
        assert!(SpectralPreprocessor::new(vec![], vec![0, 1], stats, 4, 4).is_err());
    }
}
