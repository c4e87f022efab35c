//! Plane resampling shared by preprocessing and output.
//!
//! Resizing goes through `image::imageops::resize` with a triangle
//! (bilinear) filter, which widens its support when shrinking so downscaled
//! planes are anti-aliased. The filter clamps `f32` samples to `0..=1`, so
//! planes are mapped into that range first and mapped back afterwards. The
//! filter weights sum to one, which makes the round trip exact for any
//! affine value range.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2};

/// Bilinear resize of a single `(rows, cols)` plane.
///
/// Returns a copy when the size already matches. Constant planes stay
/// constant, and an empty target yields an empty array.
pub fn resize_plane(plane: ArrayView2<'_, f32>, rows: usize, cols: usize) -> Array2<f32> {
    let (src_rows, src_cols) = plane.dim();
    if (src_rows, src_cols) == (rows, cols) {
        return plane.to_owned();
    }
    if rows == 0 || cols == 0 || src_rows == 0 || src_cols == 0 {
        return Array2::zeros((rows, cols));
    }

    let (min, max) = finite_range(plane);
    if max <= min {
        return Array2::from_elem((rows, cols), min);
    }
    let span = max - min;

    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(src_cols as u32, src_rows as u32, |x, y| {
            Luma([(plane[[y as usize, x as usize]] - min) / span])
        });
    let resized = imageops::resize(&buffer, cols as u32, rows as u32, FilterType::Triangle);

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        resized.get_pixel(c as u32, r as u32)[0] * span + min
    })
}

/// Min and max over finite values; `(0, 0)` if there are none.
fn finite_range(plane: ArrayView2<'_, f32>) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in plane.iter().filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_size_is_copy() {
        let plane = Array2::from_shape_fn((3, 4), |(r, c)| (r * 4 + c) as f32);
        assert_eq!(resize_plane(plane.view(), 3, 4), plane);
    }

    #[test]
    fn test_constant_plane_stays_constant() {
        let plane = Array2::from_elem((10, 10), -3.5f32);
        let resized = resize_plane(plane.view(), 16, 16);
        assert_eq!(resized.dim(), (16, 16));
        assert!(resized.iter().all(|&v| v == -3.5));
    }

    #[test]
    fn test_values_outside_unit_range_survive() {
        let plane = Array2::from_shape_fn((8, 8), |(_, c)| if c < 4 { -2.0 } else { 40.0 });
        let resized = resize_plane(plane.view(), 16, 16);

        assert!((resized[[0, 0]] - -2.0).abs() < 1e-3);
        assert!((resized[[15, 15]] - 40.0).abs() < 1e-3);
        assert!(resized.iter().all(|&v| (-2.0 - 1e-3..=40.0 + 1e-3).contains(&v)));
    }

    #[test]
    fn test_upscale_then_downscale_keeps_shape() {
        let plane = Array2::from_shape_fn((5, 5), |(r, c)| (r + c) as f32);
        let up = resize_plane(plane.view(), 12, 12);
        let down = resize_plane(up.view(), 5, 5);
        assert_eq!(down.dim(), (5, 5));
    }
}
