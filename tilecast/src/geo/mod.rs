//! Affine geotransforms and coordinate reference metadata.
//!
//! Coefficients follow the `(a, b, c, d, e, f)` convention:
//!
//! ```text
//! x = a * col + b * row + c
//! y = d * col + e * row + f
//! ```
//!
//! so `(c, f)` is the world coordinate of the upper-left corner of pixel
//! `(0, 0)` and `(a, e)` are the pixel sizes for a north-up raster.

use crate::grid::TileOrigin;

/// GeoKey id of the projected CRS code.
pub const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
/// GeoKey id of the geographic CRS code.
pub const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;

/// Six-coefficient affine transform from pixel space to world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl GeoTransform {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Pixel space equals world space.
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// Build from GDAL ordering `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    /// GDAL ordering `[c, a, b, f, d, e]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// True when the transform has no rotation or shear terms.
    pub fn is_north_up(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// World coordinate of the upper-left corner of pixel `(row, col)`.
    pub fn apply(&self, row: f64, col: f64) -> (f64, f64) {
        (
            self.c + col * self.a + row * self.b,
            self.f + col * self.d + row * self.e,
        )
    }

    /// Transform of a tile whose upper-left pixel sits at `origin`.
    ///
    /// Only the translation terms change: the tile keeps the parent's pixel
    /// size and rotation, and its origin moves to the world position of the
    /// tile's first pixel.
    pub fn for_tile(&self, origin: TileOrigin) -> GeoTransform {
        let (x, y) = self.apply(origin.row as f64, origin.col as f64);
        GeoTransform::new(self.a, self.b, x, self.d, self.e, y)
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Coordinate reference system as stored in GeoTIFF GeoKeys.
///
/// The key directory is carried verbatim so output tiles reproduce the
/// source CRS exactly, including user-defined projections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Crs {
    /// Raw GeoKeyDirectory (tag 34735) values.
    pub geo_keys: Vec<u16>,
    /// GeoDoubleParams (tag 34736), if present.
    pub double_params: Option<Vec<f64>>,
    /// GeoAsciiParams (tag 34737), if present.
    pub ascii_params: Option<String>,
}

impl Crs {
    /// A CRS with no GeoKeys.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Minimal key directory for an EPSG code.
    pub fn from_epsg(code: u16, projected: bool) -> Self {
        let model_type = if projected { 1 } else { 2 };
        let crs_key = if projected {
            PROJECTED_CS_TYPE_GEO_KEY
        } else {
            GEOGRAPHIC_TYPE_GEO_KEY
        };
        let geo_keys = vec![
            1, 1, 0, 3, // header: version, revision, minor, key count
            1024, 0, 1, model_type, // GTModelTypeGeoKey
            1025, 0, 1, 1, // GTRasterTypeGeoKey = PixelIsArea
            crs_key, 0, 1, code,
        ];
        Self {
            geo_keys,
            double_params: None,
            ascii_params: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.geo_keys.len() >= 4
    }

    /// EPSG code declared in the key directory, if any.
    pub fn epsg(&self) -> Option<u16> {
        if !self.is_known() {
            return None;
        }
        let count = self.geo_keys[3] as usize;
        self.geo_keys[4..]
            .chunks_exact(4)
            .take(count)
            .find(|key| {
                (key[0] == PROJECTED_CS_TYPE_GEO_KEY || key[0] == GEOGRAPHIC_TYPE_GEO_KEY)
                    && key[1] == 0
            })
            .map(|key| key[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_transform_worked_example() {
        let parent = GeoTransform::new(1.0, 0.0, 100.0, 0.0, -1.0, 200.0);
        let tile = parent.for_tile(TileOrigin::new(10, 20));

        assert_eq!(tile.c, 120.0);
        assert_eq!(tile.f, 190.0);
        assert_eq!((tile.a, tile.b, tile.d, tile.e), (1.0, 0.0, 0.0, -1.0));
    }

    #[test]
    fn test_tile_transform_keeps_rotation_terms() {
        let parent = GeoTransform::new(10.0, 2.0, 500_000.0, 3.0, -10.0, 4_000_000.0);
        let tile = parent.for_tile(TileOrigin::new(300, 500));

        assert_eq!(tile.c, 500_000.0 + 500.0 * 10.0 + 300.0 * 2.0);
        assert_eq!(tile.f, 4_000_000.0 + 500.0 * 3.0 + 300.0 * -10.0);
        assert_eq!(tile.b, 2.0);
        assert_eq!(tile.d, 3.0);
    }

    #[test]
    fn test_tile_at_origin_is_unchanged() {
        let parent = GeoTransform::new(10.0, 0.0, 499_980.0, 0.0, -10.0, 5_900_040.0);
        assert_eq!(parent.for_tile(TileOrigin::new(0, 0)), parent);
    }

    #[test]
    fn test_gdal_ordering_round_trip() {
        let gt = [499_980.0, 10.0, 0.0, 5_900_040.0, 0.0, -10.0];
        let transform = GeoTransform::from_gdal(gt);
        assert_eq!(transform.a, 10.0);
        assert_eq!(transform.c, 499_980.0);
        assert_eq!(transform.e, -10.0);
        assert_eq!(transform.to_gdal(), gt);
    }

    #[test]
    fn test_crs_epsg_lookup() {
        let crs = Crs::from_epsg(32633, true);
        assert_eq!(crs.epsg(), Some(32633));

        let crs = Crs::from_epsg(4326, false);
        assert_eq!(crs.epsg(), Some(4326));

        assert_eq!(Crs::unknown().epsg(), None);
    }
}
