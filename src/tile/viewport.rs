//! Viewport tracking: keep the visible tile set acquired as the view moves.
//!
//! Each update splits the tiles into three sets against the previous view:
//!
//! ```text
//!   previous ─┬─ not wanted ──▶ released
//!             └─ wanted ──────▶ kept (untouched)
//!   wanted ───── not previous ▶ acquired concurrently
//! ```
//!
//! Releases run first, then the acquisitions, then a single recycle pass, so a
//! tile released and re-acquired within one update is never evicted.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{GeometryError, TileError};
use crate::geo::{ProjectedInterval, TileIndex, TileRange};
use crate::provider::TileProvider;

use super::cached::CachedPyramid;
use super::entry::Tile;
use super::key::TileKey;

/// Result of one viewport update.
#[derive(Debug)]
pub struct ViewportUpdate {
    /// Every tile now visible and acquired, ordered by key
    pub tiles: Vec<Arc<Tile>>,
    pub released: usize,
    pub kept: usize,
    pub acquired: usize,
    /// Tiles that could not be acquired; they are not part of the visible set
    pub failures: Vec<(TileIndex, TileError)>,
    /// Entries evicted by the recycle pass
    pub evicted: usize,
}

/// Tracks the tiles acquired for one view of a cached pyramid.
///
/// Call [`clear`](Self::clear) before dropping the tracker, otherwise the
/// tiles it holds stay referenced in the cache.
pub struct ViewportTracker<P: ?Sized> {
    pyramid: CachedPyramid<P>,
    visible: BTreeMap<TileKey, Arc<Tile>>,
}

impl<P: TileProvider + ?Sized + 'static> ViewportTracker<P> {
    pub fn new(pyramid: CachedPyramid<P>) -> Self {
        Self {
            pyramid,
            visible: BTreeMap::new(),
        }
    }

    pub fn pyramid(&self) -> &CachedPyramid<P> {
        &self.pyramid
    }

    /// Tiles currently held, ordered by key.
    pub fn visible(&self) -> impl Iterator<Item = &Arc<Tile>> {
        self.visible.values()
    }

    /// Show the tiles overlapping a projected rectangle at `level`.
    pub async fn update_interval(
        &mut self,
        level: u32,
        interval: &ProjectedInterval,
    ) -> Result<ViewportUpdate, TileError> {
        let range = self.pyramid.pyramid().level(level)?.interval_to_tile_range(interval)?;
        self.update(level, &range).await
    }

    /// Show exactly the tiles of `range` at `level`.
    ///
    /// The range is checked against the mosaic before anything is released.
    pub async fn update(
        &mut self,
        level: u32,
        range: &TileRange,
    ) -> Result<ViewportUpdate, TileError> {
        let mosaic_size = self.pyramid.pyramid().level(level)?.mosaic_size();
        if range.row_sup >= mosaic_size || range.column_sup >= mosaic_size {
            return Err(GeometryError::OutOfRegion {
                level,
                row: range.row_sup as i64,
                column: range.column_sup as i64,
                mosaic_size,
            }
            .into());
        }

        let layer = self.pyramid.layer();
        let wanted: BTreeSet<TileKey> = range
            .iter()
            .map(|index| TileKey::new(layer, level, index.row, index.column))
            .collect();

        let released: Vec<TileKey> = self
            .visible
            .keys()
            .filter(|key| !wanted.contains(key))
            .copied()
            .collect();
        let needed: Vec<TileKey> = wanted
            .iter()
            .filter(|key| !self.visible.contains_key(key))
            .copied()
            .collect();
        let kept = wanted.len() - needed.len();

        for key in &released {
            self.visible.remove(key);
            self.pyramid.release(key.level, key.row, key.column).await?;
        }

        let (acquired, failures) = self.acquire_all(needed).await;
        let evicted = self.pyramid.recycle().await;

        debug!(
            level,
            released = released.len(),
            kept,
            acquired,
            failed = failures.len(),
            evicted,
            "Viewport updated"
        );

        Ok(ViewportUpdate {
            tiles: self.visible.values().cloned().collect(),
            released: released.len(),
            kept,
            acquired,
            failures,
            evicted,
        })
    }

    async fn acquire_all(&mut self, keys: Vec<TileKey>) -> (usize, Vec<(TileIndex, TileError)>) {
        let mut tasks = JoinSet::new();
        for key in keys {
            let pyramid = self.pyramid.clone();
            tasks.spawn(async move {
                let result = pyramid.acquire(key.level, key.row, key.column).await;
                (key, result)
            });
        }

        let mut acquired = 0;
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(tile))) => {
                    self.visible.insert(key, tile);
                    acquired += 1;
                }
                Ok((key, Err(err))) => {
                    failures.push((TileIndex::new(key.row, key.column), err));
                }
                Err(err) => {
                    warn!(error = %err, "Tile acquisition task failed");
                }
            }
        }
        (acquired, failures)
    }

    /// Release every visible tile and run one recycle pass.
    pub async fn clear(&mut self) -> Result<usize, TileError> {
        let keys: Vec<TileKey> = self.visible.keys().copied().collect();
        for key in &keys {
            self.visible.remove(key);
            self.pyramid.release(key.level, key.row, key.column).await?;
        }
        self.pyramid.recycle().await;
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::geo::Pyramid;
    use crate::provider::{Dataset, RawPayload};
    use crate::tile::cached::{shared_tile_cache, DEFAULT_FETCH_TIMEOUT};
    use async_trait::async_trait;
    use bytes::Bytes;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves 2x2 PNG tiles, except on column 7 which always fails.
    struct GridProvider {
        pyramid: Pyramid,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TileProvider for GridProvider {
        fn pyramid(&self) -> &Pyramid {
            &self.pyramid
        }

        fn dataset(&self) -> Dataset {
            Dataset::new(1, 1, 1)
        }

        async fn get_tile(
            &self,
            _level: u32,
            _row: u32,
            column: u32,
        ) -> Result<RawPayload, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if column == 7 {
                return Err(FetchError::Http { status: 404 });
            }
            let mut out = Vec::new();
            RgbImage::new(2, 2)
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;
            Ok(Bytes::from(out))
        }
    }

    fn tracker(constraint: usize) -> (Arc<GridProvider>, ViewportTracker<GridProvider>) {
        let provider = Arc::new(GridProvider {
            pyramid: Pyramid::web_mercator(2, 6).unwrap(),
            calls: AtomicUsize::new(0),
        });
        let pyramid = CachedPyramid::new(
            0,
            provider.clone(),
            shared_tile_cache(constraint),
            None,
            DEFAULT_FETCH_TIMEOUT,
        );
        (provider, ViewportTracker::new(pyramid))
    }

    fn range(row_inf: u32, row_sup: u32, column_inf: u32, column_sup: u32) -> TileRange {
        TileRange::from_corners(
            TileIndex::new(row_inf, column_inf),
            TileIndex::new(row_sup, column_sup),
        )
    }

    #[tokio::test]
    async fn test_pan_splits_released_kept_acquired() {
        let (provider, mut tracker) = tracker(1 << 20);

        let first = tracker.update(3, &range(0, 1, 0, 1)).await.unwrap();
        assert_eq!((first.released, first.kept, first.acquired), (0, 0, 4));
        assert_eq!(first.tiles.len(), 4);

        let second = tracker.update(3, &range(0, 1, 1, 2)).await.unwrap();
        assert_eq!((second.released, second.kept, second.acquired), (2, 2, 2));
        assert_eq!(second.tiles.len(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 6);

        // Panning back hits the cache: released tiles were not evicted
        let third = tracker.update(3, &range(0, 1, 0, 1)).await.unwrap();
        assert_eq!(third.acquired, 2);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_recycle_evicts_released_tiles_over_budget() {
        // Room for four 2x2 RGB tiles
        let (_provider, mut tracker) = tracker(4 * 12);

        tracker.update(3, &range(0, 1, 0, 1)).await.unwrap();
        let update = tracker.update(3, &range(2, 3, 0, 1)).await.unwrap();
        assert_eq!(update.evicted, 4);

        let cache = tracker.pyramid().cache().lock().await;
        assert_eq!(cache.len(), 4);
        assert!(cache.total_size() <= cache.constraint());
    }

    #[tokio::test]
    async fn test_failed_tiles_are_reported_not_held() {
        let (_provider, mut tracker) = tracker(1 << 20);

        let update = tracker.update(3, &range(0, 0, 6, 7)).await.unwrap();
        assert_eq!(update.acquired, 1);
        assert_eq!(update.failures.len(), 1);
        assert_eq!(update.failures[0].0, TileIndex::new(0, 7));
        assert!(matches!(
            update.failures[0].1,
            TileError::Fetch(FetchError::Http { status: 404 })
        ));
        assert_eq!(tracker.visible().count(), 1);

        // The failed tile is retried on the next update
        let retry = tracker.update(3, &range(0, 0, 6, 7)).await.unwrap();
        assert_eq!(retry.kept, 1);
        assert_eq!(retry.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_mosaic_range_is_rejected_before_release() {
        let (_provider, mut tracker) = tracker(1 << 20);
        tracker.update(2, &range(0, 1, 0, 1)).await.unwrap();

        assert!(matches!(
            tracker.update(2, &range(0, 4, 0, 1)).await,
            Err(TileError::Geometry(GeometryError::OutOfRegion { .. }))
        ));
        assert_eq!(tracker.visible().count(), 4);
    }

    #[tokio::test]
    async fn test_level_change_and_clear() {
        let (_provider, mut tracker) = tracker(1 << 20);
        tracker.update(2, &range(0, 1, 0, 1)).await.unwrap();

        let zoomed = tracker.update(3, &range(0, 3, 0, 3)).await.unwrap();
        assert_eq!((zoomed.released, zoomed.kept, zoomed.acquired), (4, 0, 16));

        assert_eq!(tracker.clear().await.unwrap(), 16);
        assert_eq!(tracker.visible().count(), 0);
        let cache = tracker.pyramid().cache().lock().await;
        assert_eq!(cache.len(), 20);
    }
}
