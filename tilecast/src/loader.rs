//! Validity filtering and batch loading.
//!
//! The loader walks the pending grid from a [`Cursor`], reading the primary
//! window of each candidate. A tile is valid only when every primary pixel is
//! strictly positive; valid tiles get their secondary windows read and
//! stacked behind the primary bands, invalid tiles are skipped without
//! touching the secondaries.
//!
//! ```text
//! cursor ─► origin ─► primary window ─► min > 0 ? ─┬─ yes ─► + secondaries ─► batch
//!                                                   └─ no  ─► invalid list
//! ```
//!
//! Secondary windows are never validity-checked, so nodata in a secondary
//! source flows into the model unchanged.

use ndarray::{concatenate, stack, Array3, Array4, ArrayView3, Axis};
use thiserror::Error;
use tracing::{debug, trace};

use crate::grid::{GridSpec, TileGrid, TileOrigin};
use crate::progress::{ProgressError, ProgressStore};
use crate::raster::{RasterError, SourceSet, Window};

/// Result type for batch loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Errors raised while filling a batch.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Raster(#[from] RasterError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error("failed to stack bands for tile {origin}: {reason}")]
    Stack { origin: TileOrigin, reason: String },
}

/// Position in the pending grid. Advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Cursor {
    pub next_index: usize,
}

impl Cursor {
    pub const fn start() -> Self {
        Self { next_index: 0 }
    }

    pub const fn at(next_index: usize) -> Self {
        Self { next_index }
    }

    pub fn is_finished(&self, grid: &TileGrid) -> bool {
        self.next_index >= grid.len()
    }
}

/// Up to `batch_size` valid tiles read from the sources.
#[derive(Debug)]
pub struct LoadedBatch {
    /// Valid origins in scan order.
    pub origins: Vec<TileOrigin>,
    /// `(tiles, bands, tile_rows, tile_cols)`, primary bands first.
    pub pixels: Array4<f32>,
    /// Origins rejected while filling this batch, already logged.
    pub invalid: Vec<TileOrigin>,
    /// Cursor just past the last scanned origin.
    pub end: Cursor,
}

impl LoadedBatch {
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }
}

/// True when every pixel is strictly positive.
///
/// `0` is the nodata sentinel. NaN compares false and therefore also makes a
/// window invalid, as does an empty window.
pub fn is_valid_window(window: &ArrayView3<'_, f32>) -> bool {
    !window.is_empty() && window.iter().all(|&v| v > 0.0)
}

/// Fills batches from a [`SourceSet`], logging invalid tiles as it goes.
pub struct BatchLoader<'a> {
    sources: &'a SourceSet,
    spec: GridSpec,
    batch_size: usize,
    progress: &'a dyn ProgressStore,
}

impl<'a> BatchLoader<'a> {
    /// `batch_size` is clamped to at least one tile.
    pub fn new(
        sources: &'a SourceSet,
        spec: GridSpec,
        batch_size: usize,
        progress: &'a dyn ProgressStore,
    ) -> Self {
        Self {
            sources,
            spec,
            batch_size: batch_size.max(1),
            progress,
        }
    }

    /// Scan `grid` from `cursor` until `batch_size` valid tiles are found or
    /// the grid is exhausted.
    ///
    /// Invalid origins found along the way are appended to the progress
    /// store once, before the batch is returned.
    ///
    /// # Errors
    ///
    /// Read failures and progress-log failures are returned as-is; no
    /// partial batch is produced.
    pub fn fill(&self, grid: &TileGrid, cursor: Cursor) -> LoadResult<LoadedBatch> {
        let mut origins = Vec::with_capacity(self.batch_size);
        let mut tiles: Vec<Array3<f32>> = Vec::with_capacity(self.batch_size);
        let mut invalid = Vec::new();
        let mut index = cursor.next_index;

        while index < grid.len() && origins.len() < self.batch_size {
            let Some(origin) = grid.get(index) else {
                break;
            };
            index += 1;

            let window = Window::for_tile(origin, &self.spec);
            let primary = self.sources.primary().read_window(window)?;
            if !is_valid_window(&primary.view()) {
                trace!(tile_row = origin.row, tile_col = origin.col, "Tile invalid");
                invalid.push(origin);
                continue;
            }

            tiles.push(self.stack_bands(origin, window, primary)?);
            origins.push(origin);
        }

        self.progress.append_invalid(&invalid)?;

        let pixels = if tiles.is_empty() {
            Array4::zeros((
                0,
                self.sources.total_bands(),
                self.spec.tile_rows(),
                self.spec.tile_cols(),
            ))
        } else {
            let views: Vec<_> = tiles.iter().map(|t| t.view()).collect();
            stack(Axis(0), &views).map_err(|e| LoadError::Stack {
                origin: origins[0],
                reason: e.to_string(),
            })?
        };

        debug!(
            start = cursor.next_index,
            end = index,
            valid = origins.len(),
            invalid = invalid.len(),
            "Filled batch"
        );

        Ok(LoadedBatch {
            origins,
            pixels,
            invalid,
            end: Cursor::at(index),
        })
    }

    fn stack_bands(
        &self,
        origin: TileOrigin,
        window: Window,
        primary: Array3<f32>,
    ) -> LoadResult<Array3<f32>> {
        let mut parts = vec![primary];
        for secondary in self.sources.secondaries() {
            parts.push(secondary.read_window(window)?);
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }

        let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
        concatenate(Axis(0), &views).map_err(|e| LoadError::Stack {
            origin,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Crs, GeoTransform};
    use crate::progress::{ProgressResult, ProgressSnapshot};
    use crate::raster::{MemorySource, RasterSource};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Vec<TileOrigin>>>,
    }

    impl ProgressStore for RecordingStore {
        fn load(&self) -> ProgressResult<ProgressSnapshot> {
            Ok(ProgressSnapshot::default())
        }

        fn append_invalid(&self, origins: &[TileOrigin]) -> ProgressResult<()> {
            self.calls.lock().push(origins.to_vec());
            Ok(())
        }
    }

    /// Shares a MemorySource so the test can inspect its read counter.
    struct Shared(Arc<MemorySource>);

    impl RasterSource for Shared {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn dims(&self) -> crate::raster::RasterDims {
            self.0.dims()
        }
        fn band_count(&self) -> usize {
            self.0.band_count()
        }
        fn transform(&self) -> GeoTransform {
            self.0.transform()
        }
        fn crs(&self) -> &Crs {
            self.0.crs()
        }
        fn read_window(&self, window: Window) -> crate::raster::RasterResult<Array3<f32>> {
            self.0.read_window(window)
        }
    }

    fn memory(name: &str, data: Array3<f32>) -> Arc<MemorySource> {
        Arc::new(MemorySource::new(
            name,
            data,
            GeoTransform::identity(),
            Crs::unknown(),
        ))
    }

    /// 2 bands, 8x8, left half nodata in the primary.
    fn half_invalid_primary() -> Array3<f32> {
        Array3::from_shape_fn((2, 8, 8), |(_, _, c)| if c < 4 { 0.0 } else { 1.0 })
    }

    #[test]
    fn test_validity_threshold() {
        let zero = Array3::from_elem((1, 2, 2), 0.0f32);
        let one = Array3::from_elem((1, 2, 2), 1.0f32);
        let mut mixed = one.clone();
        mixed[[0, 1, 1]] = 0.0;
        let mut nan = one.clone();
        nan[[0, 0, 0]] = f32::NAN;

        assert!(!is_valid_window(&zero.view()));
        assert!(is_valid_window(&one.view()));
        assert!(!is_valid_window(&mixed.view()));
        assert!(!is_valid_window(&nan.view()));
        assert!(!is_valid_window(&Array3::<f32>::zeros((1, 0, 0)).view()));
    }

    #[test]
    fn test_secondaries_skipped_for_invalid_tiles() {
        let primary = memory("primary", half_invalid_primary());
        let secondary = memory("secondary", Array3::from_elem((3, 8, 8), 7.0));
        let sources = SourceSet::new(
            Box::new(Shared(Arc::clone(&primary))),
            vec![Box::new(Shared(Arc::clone(&secondary)))],
        )
        .unwrap();

        let spec = GridSpec::new(4, 4, 0).unwrap();
        let grid = TileGrid::generate(8, 8, &spec);
        let store = RecordingStore::default();
        let loader = BatchLoader::new(&sources, spec, 10, &store);

        let batch = loader.fill(&grid, Cursor::start()).unwrap();

        assert_eq!(
            batch.origins,
            vec![TileOrigin::new(0, 4), TileOrigin::new(4, 4)]
        );
        assert_eq!(
            batch.invalid,
            vec![TileOrigin::new(0, 0), TileOrigin::new(4, 0)]
        );
        assert_eq!(batch.pixels.dim(), (2, 5, 4, 4));
        assert_eq!(batch.pixels[[0, 0, 0, 0]], 1.0);
        assert_eq!(batch.pixels[[0, 2, 0, 0]], 7.0);
        assert_eq!(primary.read_count(), 4);
        assert_eq!(secondary.read_count(), 2);
        assert!(batch.end.is_finished(&grid));

        let calls = store.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], batch.invalid);
    }

    #[test]
    fn test_batch_stops_at_batch_size() {
        let primary = memory("primary", Array3::from_elem((1, 8, 8), 1.0));
        let sources = SourceSet::new(Box::new(Shared(primary)), vec![]).unwrap();
        let spec = GridSpec::new(4, 4, 0).unwrap();
        let grid = TileGrid::generate(8, 8, &spec);
        let store = RecordingStore::default();
        let loader = BatchLoader::new(&sources, spec, 3, &store);

        let first = loader.fill(&grid, Cursor::start()).unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first.end, Cursor::at(3));

        let second = loader.fill(&grid, first.end).unwrap();
        assert_eq!(second.origins, vec![TileOrigin::new(4, 4)]);
        assert_eq!(second.end, Cursor::at(4));
    }

    #[test]
    fn test_all_invalid_batch_is_empty_and_advances() {
        let primary = memory("primary", Array3::zeros((1, 8, 8)));
        let sources = SourceSet::new(Box::new(Shared(primary)), vec![]).unwrap();
        let spec = GridSpec::new(4, 4, 0).unwrap();
        let grid = TileGrid::generate(8, 8, &spec);
        let store = RecordingStore::default();
        let loader = BatchLoader::new(&sources, spec, 2, &store);

        let batch = loader.fill(&grid, Cursor::start()).unwrap();

        assert!(batch.is_empty());
        assert_eq!(batch.invalid.len(), 4);
        assert_eq!(batch.pixels.dim(), (0, 1, 4, 4));
        assert_eq!(batch.end, Cursor::at(4));
    }

    #[test]
    fn test_secondary_nodata_is_not_checked() {
        let primary = memory("primary", Array3::from_elem((1, 4, 4), 1.0));
        let secondary = memory("secondary", Array3::zeros((1, 4, 4)));
        let sources = SourceSet::new(Box::new(Shared(primary)), vec![Box::new(Shared(secondary))])
            .unwrap();
        let spec = GridSpec::new(4, 4, 0).unwrap();
        let grid = TileGrid::generate(4, 4, &spec);
        let store = RecordingStore::default();

        let batch = BatchLoader::new(&sources, spec, 4, &store)
            .fill(&grid, Cursor::start())
            .unwrap();

        assert_eq!(batch.len(), 1);
        assert!(batch.invalid.is_empty());
        assert_eq!(batch.pixels[[0, 1, 0, 0]], 0.0);
    }

    #[test]
    fn test_image_smaller_than_tile_is_invalid() {
        let primary = memory("primary", Array3::from_elem((1, 3, 3), 1.0));
        let sources = SourceSet::new(Box::new(Shared(primary)), vec![]).unwrap();
        let spec = GridSpec::new(4, 4, 1).unwrap();
        let grid = TileGrid::generate(3, 3, &spec);
        let store = RecordingStore::default();

        let batch = BatchLoader::new(&sources, spec, 4, &store)
            .fill(&grid, Cursor::start())
            .unwrap();

        assert_eq!(grid.len(), 1);
        assert!(batch.is_empty());
        assert_eq!(batch.invalid, vec![TileOrigin::new(0, 0)]);
    }

    #[test]
    fn test_random_nodata_partitions_grid() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(17);
        let data = Array3::from_shape_fn((1, 30, 30), |_| {
            if rng.random_bool(0.01) {
                0.0
            } else {
                rng.random_range(1.0f32..10_000.0)
            }
        });
        let expected_invalid: Vec<TileOrigin> = {
            let spec = GridSpec::new(8, 8, 3).unwrap();
            TileGrid::generate(30, 30, &spec)
                .iter()
                .copied()
                .filter(|o| {
                    data.slice(ndarray::s![.., o.row..o.row + 8, o.col..o.col + 8])
                        .iter()
                        .any(|&v| v == 0.0)
                })
                .collect()
        };

        let sources = SourceSet::new(Box::new(Shared(memory("primary", data))), vec![]).unwrap();
        let spec = GridSpec::new(8, 8, 3).unwrap();
        let grid = TileGrid::generate(30, 30, &spec);
        let store = RecordingStore::default();
        let loader = BatchLoader::new(&sources, spec, 4, &store);

        let mut cursor = Cursor::start();
        let mut valid = 0;
        let mut invalid = Vec::new();
        while !cursor.is_finished(&grid) {
            let batch = loader.fill(&grid, cursor).unwrap();
            assert!(batch.end > cursor);
            valid += batch.len();
            invalid.extend(batch.invalid);
            cursor = batch.end;
        }

        assert_eq!(invalid, expected_invalid);
        assert_eq!(valid + invalid.len(), grid.len());
    }

    #[test]
    fn test_positive_nodata_tag_does_not_invalidate_tile() {
        use crate::raster::GeoTiffSource;
        use tiff::encoder::{colortype::Gray16, TiffEncoder};
        use tiff::tags::Tag;

        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("scene_s2_10m.tif");
        let mut pixels = vec![500u16; 16];
        pixels[6] = 65535;
        {
            let file = std::fs::File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(file).unwrap();
            let mut image = encoder.new_image::<Gray16>(4, 4).unwrap();
            image
                .encoder()
                .write_tag(Tag::Unknown(42113), "65535")
                .unwrap();
            image.write_data(&pixels).unwrap();
        }

        let primary = GeoTiffSource::open(&path).unwrap();
        assert_eq!(primary.nodata(), Some(65535.0));
        let sources = SourceSet::new(Box::new(primary), vec![]).unwrap();
        let spec = GridSpec::new(4, 4, 0).unwrap();
        let grid = TileGrid::generate(4, 4, &spec);
        let store = RecordingStore::default();

        let batch = BatchLoader::new(&sources, spec, 4, &store)
            .fill(&grid, Cursor::start())
            .unwrap();

        assert_eq!(batch.origins, vec![TileOrigin::new(0, 0)]);
        assert!(batch.invalid.is_empty());
        assert_eq!(batch.pixels[[0, 0, 1, 2]], 65535.0);
        assert_eq!(batch.pixels[[0, 0, 0, 0]], 500.0);
    }
}
