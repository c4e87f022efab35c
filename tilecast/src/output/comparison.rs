//! Side-by-side comparison images.
//!
//! ```text
//! ┌──────────────┬────┬──────────────┐
//! │ input band   │gap │ mask         │  tile_rows
//! │ (8-bit)      │ 10 │ (0 / 255)    │
//! └──────────────┴────┴──────────────┘
//!     tile_cols          tile_cols
//! ```

use std::path::Path;

use image::{GrayImage, Luma};
use ndarray::{Array2, ArrayView2};

use super::{OutputError, OutputResult};

/// White columns between the two panels.
pub const PANEL_GAP: usize = 10;

/// Linearly rescale to `0..=255`, rounding. Pixels that are exactly `0`
/// stay `0`; a constant plane becomes all `0`.
pub fn scale_to_byte(plane: ArrayView2<'_, f32>) -> Array2<u8> {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in plane.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    let span = max - min;
    let scalable = span > 0.0;

    plane.mapv(|v| {
        if v == 0.0 || !v.is_finite() || !scalable {
            0
        } else {
            (255.0 * (v - min) / span).round().clamp(0.0, 255.0) as u8
        }
    })
}

/// Compose the input panel and mask into one grayscale PNG.
pub fn write_comparison(
    path: &Path,
    input: ArrayView2<'_, u8>,
    mask: ArrayView2<'_, u8>,
) -> OutputResult<()> {
    let (rows, cols) = mask.dim();
    let width = 2 * cols + PANEL_GAP;
    let mut image = GrayImage::from_pixel(width as u32, rows as u32, Luma([255]));

    for ((r, c), &v) in input.indexed_iter() {
        if r < rows && c < cols {
            image.put_pixel(c as u32, r as u32, Luma([v]));
        }
    }
    for ((r, c), &v) in mask.indexed_iter() {
        image.put_pixel((cols + PANEL_GAP + c) as u32, r as u32, Luma([v]));
    }

    image.save(path).map_err(|e| OutputError::Comparison {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_scale_to_byte() {
        let plane = array![[0.0f32, 1.0], [2.0, 3.0]];
        let bytes = scale_to_byte(plane.view());
        // min is 0, so 1 -> 85, 2 -> 170, 3 -> 255; the zero pixel stays 0
        assert_eq!(bytes, array![[0u8, 85], [170, 255]]);
    }

    #[test]
    fn test_scale_forces_exact_zero_to_zero() {
        let plane = array![[-1.0f32, 0.0], [1.0, 1.0]];
        let bytes = scale_to_byte(plane.view());
        assert_eq!(bytes[[0, 0]], 0);
        assert_eq!(bytes[[0, 1]], 0);
        assert_eq!(bytes[[1, 0]], 255);
    }

    #[test]
    fn test_scale_constant_plane() {
        let plane = Array2::from_elem((3, 3), 7.0f32);
        assert!(scale_to_byte(plane.view()).iter().all(|&v| v == 0));
    }

    #[test]
    fn test_comparison_layout() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("pred_0-0_results.png");
        let input = Array2::from_elem((4, 5), 100u8);
        let mask = Array2::from_elem((4, 5), 0u8);

        write_comparison(&path, input.view(), mask.view()).unwrap();

        let image = image::open(&path).unwrap().into_luma8();
        assert_eq!(image.dimensions(), (20, 4));
        assert_eq!(image.get_pixel(0, 0)[0], 100);
        assert_eq!(image.get_pixel(5, 0)[0], 255);
        assert_eq!(image.get_pixel(14, 3)[0], 255);
        assert_eq!(image.get_pixel(15, 3)[0], 0);
    }
}
