//! Viewport tracking integration tests.
//!
//! Tests verify:
//! - A moving view only fetches the tiles it did not already hold
//! - Zooming keeps the cache within its byte budget
//! - Failed tiles are reported without breaking the update

use std::collections::BTreeSet;

use tile_pyramid::error::{FetchError, TileError};
use tile_pyramid::geo::{GeoCoordinate, ProjectedInterval, ProjectedPoint, TileIndex};
use tile_pyramid::tile::{TileSession, ViewportTracker};

use super::test_utils::{TrackingProvider, TEST_TILE_BYTES};

fn paris() -> ProjectedPoint {
    GeoCoordinate::from_degrees(2.3522, 48.8566).to_projected()
}

fn indices<'a>(
    tiles: impl Iterator<Item = &'a std::sync::Arc<tile_pyramid::Tile>>,
) -> BTreeSet<TileIndex> {
    tiles.map(|tile| tile.index()).collect()
}

#[tokio::test]
async fn test_panning_view_fetches_only_new_tiles() {
    let provider = TrackingProvider::new().shared();
    let session = TileSession::new(1 << 20);
    let mut tracker = ViewportTracker::new(session.pyramid_for(provider.clone()));

    let level = *tracker.pyramid().pyramid().level(12).unwrap();
    let length = level.tile_length();
    let view = ProjectedInterval::around(paris(), length);

    let first = tracker.update_interval(12, &view).await.unwrap();
    let expected = level.interval_to_tile_range(&view).unwrap();
    assert_eq!(first.tiles.len() as u64, expected.len());
    assert_eq!(first.acquired as u64, expected.len());
    assert!(first.failures.is_empty());
    let before = indices(first.tiles.iter());

    // Pan east by one tile
    let moved = ProjectedInterval::around(
        ProjectedPoint::new(paris().x + length, paris().y),
        length,
    );
    let second = tracker.update_interval(12, &moved).await.unwrap();
    let after = indices(second.tiles.iter());

    let overlap = before.intersection(&after).count();
    assert!(overlap > 0);
    assert_eq!(second.kept, overlap);
    assert_eq!(second.released, before.len() - overlap);
    assert_eq!(second.acquired, after.len() - overlap);
    assert_eq!(provider.request_count(), before.len() + second.acquired);

    // Every visible tile sits in the local plane where its index says
    for tile in &second.tiles {
        let origin = level.tile_origin(tile.index());
        assert_eq!((tile.x(), tile.y()), (origin.x, origin.y));
        assert_eq!(tile.length(), length);
    }

    assert_eq!(tracker.clear().await.unwrap(), after.len());
}

#[tokio::test]
async fn test_zooming_respects_budget() {
    let provider = TrackingProvider::new().shared();
    // Room for 20 tiles; each view holds at most 9
    let budget = 20 * TEST_TILE_BYTES;
    let session = TileSession::new(budget);
    let mut tracker = ViewportTracker::new(session.pyramid_for(provider.clone()));

    for level in [10, 11, 12, 13, 12, 11] {
        let length = tracker.pyramid().pyramid().level(level).unwrap().tile_length();
        let view = ProjectedInterval::around(paris(), length * 0.9);
        let update = tracker.update_interval(level, &view).await.unwrap();
        assert!(update.tiles.len() <= 9);

        let stats = session.stats().await;
        assert!(stats.resident_bytes <= budget);
        assert!(stats.entries >= update.tiles.len());
    }

    tracker.clear().await.unwrap();
    assert!(session.stats().await.resident_bytes <= budget);
}

#[tokio::test]
async fn test_failed_tile_does_not_break_view() {
    let provider = TrackingProvider::new().shared();
    let session = TileSession::new(1 << 20);
    let mut tracker = ViewportTracker::new(session.pyramid_for(provider.clone()));

    let level = *tracker.pyramid().pyramid().level(12).unwrap();
    let view = ProjectedInterval::around(paris(), level.tile_length());
    let range = level.interval_to_tile_range(&view).unwrap();
    provider.fail_tile(12, range.row_inf, range.column_inf);

    let update = tracker.update(12, &range).await.unwrap();
    assert_eq!(update.failures.len(), 1);
    assert_eq!(
        update.failures[0].0,
        TileIndex::new(range.row_inf, range.column_inf)
    );
    assert!(matches!(
        update.failures[0].1,
        TileError::Fetch(FetchError::Http { status: 404 })
    ));
    assert_eq!(update.tiles.len() as u64, range.len() - 1);
    assert_eq!(tracker.visible().count() as u64, range.len() - 1);
}
