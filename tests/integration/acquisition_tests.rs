//! Acquisition integration tests.
//!
//! Tests verify:
//! - Concurrent acquires of one tile share a single provider fetch
//! - Failed and timed-out fetches are reported to every caller and not cached
//! - Reference counts follow acquire/release pairs
//! - Pyramids of one session share the byte budget

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use tile_pyramid::error::{FetchError, GeometryError, TileError};
use tile_pyramid::tile::TileSession;

use super::test_utils::{TrackingProvider, TEST_TILE_BYTES, TEST_TILE_SIZE};

// =============================================================================
// Single Flight
// =============================================================================

#[tokio::test]
async fn test_concurrent_acquires_share_one_fetch() {
    let provider = TrackingProvider::new()
        .with_delay(Duration::from_millis(50))
        .shared();
    let session = TileSession::new(1 << 20);
    let pyramid = session.pyramid_for(provider.clone());

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let pyramid = pyramid.clone();
        tasks.spawn(async move { pyramid.acquire(10, 355, 521).await });
    }

    let mut tiles = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        tiles.push(joined.unwrap().unwrap());
    }

    assert_eq!(provider.request_count(), 1);
    assert_eq!(provider.requests(), vec![(10, 355, 521)]);
    assert!(tiles.iter().all(|tile| Arc::ptr_eq(tile, &tiles[0])));
    assert_eq!(tiles[0].image().width(), TEST_TILE_SIZE);
    assert_eq!(pyramid.in_flight().await, 0);

    let key = pyramid.key(10, 355, 521).unwrap();
    assert_eq!(pyramid.cache().lock().await.refcount(&key), Some(16));
}

#[tokio::test]
async fn test_distinct_tiles_fetch_independently() {
    let provider = TrackingProvider::new()
        .with_delay(Duration::from_millis(20))
        .shared();
    let session = TileSession::new(1 << 20);
    let pyramid = session.pyramid_for(provider.clone());

    let (a, b) = tokio::join!(pyramid.acquire(4, 1, 2), pyramid.acquire(4, 2, 1));
    assert_ne!(a.unwrap().key(), b.unwrap().key());
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_acquire_release_balance() {
    let provider = TrackingProvider::new().shared();
    let session = TileSession::new(1 << 20);
    let pyramid = session.pyramid_for(provider.clone());

    for _ in 0..3 {
        pyramid.acquire(5, 10, 12).await.unwrap();
    }
    assert_eq!(provider.request_count(), 1);

    let key = pyramid.key(5, 10, 12).unwrap();
    for expected in [2, 1, 0] {
        pyramid.release(5, 10, 12).await.unwrap();
        assert_eq!(pyramid.cache().lock().await.refcount(&key), Some(expected));
    }

    assert!(matches!(
        pyramid.release(5, 10, 12).await,
        Err(TileError::NotAcquired { .. })
    ));
    assert!(matches!(
        pyramid.release(5, 11, 12).await,
        Err(TileError::NotAcquired { .. })
    ));
}

#[tokio::test]
async fn test_out_of_pyramid_requests_never_reach_provider() {
    let provider = TrackingProvider::new().shared();
    let session = TileSession::new(1 << 20);
    let pyramid = session.pyramid_for(provider.clone());

    assert!(matches!(
        pyramid.acquire(2, 4, 0).await,
        Err(TileError::Geometry(GeometryError::OutOfRegion { .. }))
    ));
    assert!(matches!(
        pyramid.acquire(40, 0, 0).await,
        Err(TileError::Geometry(GeometryError::LevelOutOfRange { .. }))
    ));
    assert_eq!(provider.request_count(), 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failure_reaches_every_waiter_and_is_retried() {
    let provider = TrackingProvider::new()
        .with_delay(Duration::from_millis(30))
        .shared();
    provider.fail_tile(6, 3, 3);
    let session = TileSession::new(1 << 20);
    let pyramid = session.pyramid_for(provider.clone());

    let (a, b, c) = tokio::join!(
        pyramid.acquire(6, 3, 3),
        pyramid.acquire(6, 3, 3),
        pyramid.acquire(6, 3, 3)
    );
    for result in [a, b, c] {
        assert!(matches!(
            result,
            Err(TileError::Fetch(FetchError::Http { status: 404 }))
        ));
    }
    assert_eq!(provider.request_count(), 1);
    assert_eq!(session.stats().await.entries, 0);

    // Nothing was cached, so the next acquire fetches again
    assert!(pyramid.acquire(6, 3, 3).await.is_err());
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_fetch_timeout() {
    let provider = TrackingProvider::new()
        .with_delay(Duration::from_millis(500))
        .shared();
    let session = TileSession::new(1 << 20).with_fetch_timeout(Duration::from_millis(50));
    let pyramid = session.pyramid_for(provider.clone());

    let result = pyramid.acquire(3, 1, 1).await;
    assert!(matches!(
        result,
        Err(TileError::Fetch(FetchError::Timeout { after_ms: 50 }))
    ));
    assert_eq!(pyramid.in_flight().await, 0);
    assert_eq!(session.stats().await.entries, 0);
}

// =============================================================================
// Shared Budget
// =============================================================================

#[tokio::test]
async fn test_pyramids_share_the_session_budget() {
    let maps = TrackingProvider::new().shared();
    let photos = TrackingProvider::new().shared();
    let session = TileSession::new(2 * TEST_TILE_BYTES);
    let first = session.pyramid_for(maps.clone());
    let second = session.pyramid_for(photos.clone());

    for column in 0..2 {
        first.acquire(3, 0, column).await.unwrap();
        first.release(3, 0, column).await.unwrap();
    }
    for column in 0..2 {
        second.acquire(3, 0, column).await.unwrap();
    }

    // The first pyramid's tiles are the least recent and unreferenced
    assert_eq!(session.recycle().await, 2);
    let stats = session.stats().await;
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.resident_bytes, 2 * TEST_TILE_BYTES);

    // Same coordinates, different layer: refetched for the first pyramid only
    first.acquire(3, 0, 0).await.unwrap();
    assert_eq!(maps.request_count(), 3);
    assert_eq!(photos.request_count(), 2);
}

#[tokio::test]
async fn test_referenced_tiles_survive_recycle_over_budget() {
    let provider = TrackingProvider::new().shared();
    let session = TileSession::new(TEST_TILE_BYTES);
    let pyramid = session.pyramid_for(provider.clone());

    for column in 0..4 {
        pyramid.acquire(4, 2, column).await.unwrap();
    }
    assert_eq!(session.recycle().await, 0);
    assert_eq!(session.stats().await.entries, 4);

    for column in 0..4 {
        pyramid.release(4, 2, column).await.unwrap();
    }
    assert_eq!(session.recycle().await, 3);
    assert!(session.stats().await.resident_bytes <= TEST_TILE_BYTES);
}
