//! Offline store integration tests.
//!
//! Tests verify:
//! - Overlapping regions share pinned tiles, across a reopen of the store
//! - Preloading fills pinned tiles so they are served without network
//! - Fetched payloads are kept only for pinned tiles
//! - The offline provider serves exactly what was stored

use std::path::Path;
use std::sync::Arc;

use tile_pyramid::error::{FetchError, OfflineError, TileError};
use tile_pyramid::geo::{TileIndex, TileRange};
use tile_pyramid::offline::{MapLevel, OfflineCache, OfflineTile, Region, Run};
use tile_pyramid::provider::{Dataset, OfflineProvider, TileProvider};
use tile_pyramid::tile::TileSession;

use super::test_utils::{is_valid_jpeg, TrackingProvider};

const LEVEL: u32 = 12;

fn dataset() -> Dataset {
    Dataset::new(1, 1, 1)
}

fn level() -> MapLevel {
    dataset().level(LEVEL)
}

fn tile(row: u32, column: u32) -> OfflineTile {
    OfflineTile::new(level(), row, column)
}

fn block(name: &str, row_inf: u32, row_sup: u32, column_inf: u32, column_sup: u32) -> Region {
    let range = TileRange::from_corners(
        TileIndex::new(row_inf, column_inf),
        TileIndex::new(row_sup, column_sup),
    );
    Region::from_range(name, level(), &range)
}

async fn open(path: &Path) -> Arc<OfflineCache> {
    let path = path.to_path_buf();
    let store = tokio::task::spawn_blocking(move || OfflineCache::open(path))
        .await
        .unwrap()
        .unwrap();
    Arc::new(store)
}

// =============================================================================
// Regions
// =============================================================================

#[tokio::test]
async fn test_overlapping_regions_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.sqlite");

    {
        let store = open(&path).await;
        store
            .run_blocking(|s| {
                s.insert_region(&Region::new("R1", level(), vec![Run::new(1, 1, 3)]))?;
                s.insert_region(&Region::new("R2", level(), vec![Run::new(1, 2, 4)]))
            })
            .await
            .unwrap();
        store.run_blocking(|s| s.delete_region("R1")).await.unwrap();
    }

    let store = open(&path).await;
    let counts = store
        .run_blocking(|s| {
            (1..=4)
                .map(|column| s.has_tile(&tile(1, column)))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .unwrap();
    assert_eq!(counts, vec![0, 1, 1, 1]);

    let names = store.run_blocking(|s| s.region_names()).await.unwrap();
    assert_eq!(names, vec!["R2".to_string()]);

    let err = store
        .run_blocking(|s| s.insert_region(&Region::new("R2", level(), vec![Run::new(9, 9, 9)])))
        .await
        .unwrap_err();
    assert_eq!(err, OfflineError::DuplicateName("R2".to_string()));
}

// =============================================================================
// Preload
// =============================================================================

#[tokio::test]
async fn test_preloaded_region_is_served_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("offline.sqlite")).await;
    let region = block("paris", 1400, 1401, 2070, 2072);
    store
        .run_blocking(move |s| s.insert_region(&region))
        .await
        .unwrap();

    let provider = TrackingProvider::new().with_dataset(dataset()).shared();
    let session = TileSession::new(1 << 20).with_offline_store(Arc::clone(&store));
    let pyramid = session.pyramid_for(provider.clone());

    let report = pyramid.preload_region("paris").await.unwrap();
    assert_eq!((report.requested, report.fetched, report.failed), (6, 6, 0));
    assert_eq!(provider.request_count(), 6);
    assert_eq!(session.stats().await.entries, 0);

    // Nothing left to preload
    let again = pyramid.preload_region("paris").await.unwrap();
    assert_eq!(again.requested, 0);
    assert_eq!(provider.request_count(), 6);

    provider.go_offline();
    let served = pyramid.acquire(LEVEL, 1401, 2071).await.unwrap();
    assert_eq!(served.index(), TileIndex::new(1401, 2071));
    assert_eq!(provider.request_count(), 6);

    // Outside the region the network is still needed
    assert!(matches!(
        pyramid.acquire(LEVEL, 1402, 2071).await,
        Err(TileError::Fetch(FetchError::Network(_)))
    ));
}

#[tokio::test]
async fn test_preload_reports_failed_tiles() {
    let store = Arc::new(OfflineCache::open_in_memory().unwrap());
    let region = block("strip", 5, 5, 0, 3);
    store
        .run_blocking(move |s| s.insert_region(&region))
        .await
        .unwrap();

    let provider = TrackingProvider::new().with_dataset(dataset()).shared();
    provider.fail_tile(LEVEL, 5, 2);
    let session = TileSession::new(1 << 20).with_offline_store(Arc::clone(&store));
    let pyramid = session.pyramid_for(provider.clone());

    let report = pyramid.preload_region("strip").await.unwrap();
    assert_eq!((report.requested, report.fetched, report.failed), (4, 3, 1));

    let missing = store.run_blocking(|s| s.missing_tiles("strip")).await.unwrap();
    assert_eq!(missing, vec![tile(5, 2)]);
}

#[tokio::test]
async fn test_preload_rejects_foreign_dataset_and_unknown_region() {
    let store = Arc::new(OfflineCache::open_in_memory().unwrap());
    let region = block("photos", 0, 0, 0, 0);
    store
        .run_blocking(move |s| s.insert_region(&region))
        .await
        .unwrap();

    let provider = TrackingProvider::new()
        .with_dataset(Dataset::new(1, 2, 1))
        .shared();
    let session = TileSession::new(1 << 20).with_offline_store(store);
    let pyramid = session.pyramid_for(provider.clone());

    assert!(matches!(
        pyramid.preload_region("photos").await,
        Err(TileError::DatasetMismatch { .. })
    ));
    assert!(matches!(
        pyramid.preload_region("nowhere").await,
        Err(TileError::Offline(OfflineError::UnknownRegion(_)))
    ));
    assert_eq!(provider.request_count(), 0);
}

// =============================================================================
// Acquisition Through the Store
// =============================================================================

#[tokio::test]
async fn test_acquire_keeps_payloads_of_pinned_tiles_only() {
    let store = Arc::new(OfflineCache::open_in_memory().unwrap());
    let region = block("home", 10, 10, 10, 11);
    store
        .run_blocking(move |s| s.insert_region(&region))
        .await
        .unwrap();

    let provider = TrackingProvider::new().with_dataset(dataset()).shared();
    let session = TileSession::new(1 << 20).with_offline_store(Arc::clone(&store));
    let pyramid = session.pyramid_for(provider.clone());

    pyramid.acquire(LEVEL, 10, 10).await.unwrap();
    pyramid.acquire(LEVEL, 10, 12).await.unwrap();

    let (stored, unpinned) = store
        .run_blocking(|s| Ok((s.get_tile_data(&tile(10, 10))?, s.get_tile_data(&tile(10, 12))?)))
        .await
        .unwrap();
    assert!(stored.as_deref().is_some_and(is_valid_jpeg));
    assert!(unpinned.is_none());

    let missing = store.run_blocking(|s| s.missing_tiles("home")).await.unwrap();
    assert_eq!(missing, vec![tile(10, 11)]);
}

#[tokio::test]
async fn test_offline_provider_serves_stored_tiles() {
    let store = Arc::new(OfflineCache::open_in_memory().unwrap());
    let region = block("cache", 0, 1, 0, 1);
    store
        .run_blocking(move |s| s.insert_region(&region))
        .await
        .unwrap();

    let network = TrackingProvider::new().with_dataset(dataset()).shared();
    let session = TileSession::new(1 << 20).with_offline_store(Arc::clone(&store));
    session
        .pyramid_for(network.clone())
        .preload_region("cache")
        .await
        .unwrap();

    let offline = Arc::new(OfflineProvider::new(
        Arc::clone(&store),
        dataset(),
        network.pyramid().clone(),
    ));
    let payload = offline.get_tile(LEVEL, 1, 1).await.unwrap();
    assert!(is_valid_jpeg(&payload));
    assert!(matches!(
        offline.get_tile(LEVEL, 2, 2).await,
        Err(FetchError::NotAvailable(_))
    ));

    // A session without offline store still goes through the cache
    let plain = TileSession::new(1 << 20);
    let pyramid = plain.pyramid_for(offline);
    let tile = pyramid.acquire(LEVEL, 0, 1).await.unwrap();
    assert_eq!(tile.index(), TileIndex::new(0, 1));
    assert!(matches!(
        pyramid.acquire(LEVEL, 3, 3).await,
        Err(TileError::Fetch(FetchError::NotAvailable(_)))
    ));
}
