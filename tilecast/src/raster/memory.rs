//! In-memory raster source.

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{s, Array3};

use super::{RasterDims, RasterResult, RasterSource, Window};
use crate::geo::{Crs, GeoTransform};

/// Raster held entirely in memory as `(bands, rows, cols)`.
///
/// Counts window reads so callers can verify which sources were touched.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    data: Array3<f32>,
    transform: GeoTransform,
    crs: Crs,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new(
        name: impl Into<String>,
        data: Array3<f32>,
        transform: GeoTransform,
        crs: Crs,
    ) -> Self {
        Self {
            name: name.into(),
            data,
            transform,
            crs,
            reads: AtomicUsize::new(0),
        }
    }

    /// Number of `read_window` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl RasterSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> RasterDims {
        let (_, rows, cols) = self.data.dim();
        RasterDims::new(rows, cols)
    }

    fn band_count(&self) -> usize {
        self.data.dim().0
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn crs(&self) -> &Crs {
        &self.crs
    }

    fn read_window(&self, window: Window) -> RasterResult<Array3<f32>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let (bands, rows, cols) = self.data.dim();
        let mut out = Array3::<f32>::zeros((bands, window.rows, window.cols));

        let row_end = window.row_end().min(rows);
        let col_end = window.col_end().min(cols);
        if window.row < row_end && window.col < col_end {
            let h = row_end - window.row;
            let w = col_end - window.col;
            out.slice_mut(s![.., 0..h, 0..w]).assign(&self.data.slice(s![
                ..,
                window.row..row_end,
                window.col..col_end
            ]));
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(bands: usize, rows: usize, cols: usize) -> Array3<f32> {
        Array3::from_shape_fn((bands, rows, cols), |(b, r, c)| {
            (b * 10_000 + r * 100 + c) as f32
        })
    }

    #[test]
    fn test_read_inside_extent() {
        let source = MemorySource::new("ramp", ramp(2, 10, 10), GeoTransform::identity(), Crs::unknown());
        let window = source.read_window(Window::new(2, 3, 4, 5)).unwrap();

        assert_eq!(window.dim(), (2, 4, 5));
        assert_eq!(window[[0, 0, 0]], 203.0);
        assert_eq!(window[[1, 3, 4]], 10_507.0);
        assert_eq!(source.read_count(), 1);
    }

    #[test]
    fn test_read_past_extent_is_zero_filled() {
        let source = MemorySource::new("ramp", ramp(1, 10, 10), GeoTransform::identity(), Crs::unknown());
        let window = source.read_window(Window::new(8, 8, 4, 4)).unwrap();

        assert_eq!(window.dim(), (1, 4, 4));
        assert_eq!(window[[0, 1, 1]], 909.0);
        assert_eq!(window[[0, 2, 0]], 0.0);
        assert_eq!(window[[0, 0, 3]], 0.0);
    }

    #[test]
    fn test_read_fully_outside_is_all_zero() {
        let source = MemorySource::new("ramp", ramp(1, 4, 4), GeoTransform::identity(), Crs::unknown());
        let window = source.read_window(Window::new(10, 10, 2, 2)).unwrap();
        assert!(window.iter().all(|&v| v == 0.0));
    }
}
