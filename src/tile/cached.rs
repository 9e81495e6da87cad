//! Cached pyramid: tile acquisition on top of the shared LRU cache.
//!
//! # Acquisition
//!
//! ```text
//! acquire(level, row, column)
//!     │
//!     ├─ in-flight table has key ──▶ join: holders += 1, wait for the leader
//!     │
//!     ├─ LRU hit ──────────────────▶ refcount += 1, return (no suspension)
//!     │
//!     └─ miss ─▶ register in-flight entry (holders = 1)
//!                spawn fetch task: offline store ─▶ provider (with timeout)
//!                                  decode ─▶ LRU add ─▶ refcount = holders
//!                wake every joined caller with the shared result
//! ```
//!
//! The fetch runs in its own task, so it completes even if every caller stops
//! waiting. A caller that releases a tile while its fetch is in flight drops
//! its hold; the tile then lands in the cache with a refcount of 0 and is
//! immediately evictable. A caller whose acquire future is dropped before the
//! outcome gives its hold back the same way, or releases the reference taken
//! for it if the tile already landed. Such a caller must not also release.
//!
//! Region preloads share the in-flight table: a preload joins a fetch already
//! in flight, and acquires join a preload fetch. A preloaded tile enters the
//! cache only when an acquire holds it at landing.
//!
//! Failed fetches are reported to every joined caller and never inserted. The
//! in-flight entry is removed either way, so the next acquire retries.
//!
//! Lock order: the in-flight table, then the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::RefCountedLru;
use crate::error::{FetchError, GeometryError, OfflineError, TileError};
use crate::geo::{Pyramid, PyramidLevel};
use crate::offline::{OfflineCache, OfflineTile};
use crate::provider::{RawPayload, TileProvider};

use super::entry::Tile;
use super::key::{LayerId, TileKey};
use super::raster::TileImage;

/// Default timeout of a single provider fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of concurrent fetches while preloading a region.
pub const PRELOAD_CONCURRENCY: usize = 8;

/// LRU cache shared by every pyramid of a session.
pub type SharedTileCache = Arc<Mutex<RefCountedLru<Tile>>>;

/// Create an empty shared cache with a byte budget.
pub fn shared_tile_cache(constraint: usize) -> SharedTileCache {
    Arc::new(Mutex::new(RefCountedLru::new(constraint)))
}

/// Outcome of [`CachedPyramid::preload_region`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Pinned tiles that had no data
    pub requested: usize,
    /// Tiles fetched and stored
    pub fetched: usize,
    /// Tiles whose fetch, decode or store failed
    pub failed: usize,
}

// =============================================================================
// In-flight table
// =============================================================================

/// Result slot shared by the leader fetch and every joined caller.
struct InFlightState {
    notify: Notify,
    result: Mutex<Option<Result<Arc<Tile>, TileError>>>,
}

impl InFlightState {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            result: Mutex::new(None),
        }
    }

    async fn complete(&self, result: Result<Arc<Tile>, TileError>) {
        *self.result.lock().await = Some(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> Result<Arc<Tile>, TileError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking, so a completion in between is not missed
            notified.as_mut().enable();

            if let Some(result) = self.result.lock().await.as_ref() {
                return result.clone();
            }
            notified.await;
        }
    }
}

struct InFlightEntry {
    state: Arc<InFlightState>,
    /// Callers that will own a reference once the tile is resident
    holders: usize,
}

/// Whether a landing tile enters the cache when nobody holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Landing {
    Always,
    WhenHeld,
}

/// A decoded tile and the outcome of feeding its payload to the offline store.
struct Fetched {
    tile: Tile,
    stored: Result<(), OfflineError>,
}

/// Hold of an acquire waiting on an in-flight fetch.
///
/// Dropped unsettled when the acquire future is dropped, in which case the
/// hold is given back from a spawned task.
struct PendingHold<P: TileProvider + ?Sized + 'static> {
    shared: Arc<Shared<P>>,
    key: TileKey,
    state: Arc<InFlightState>,
    settled: bool,
}

impl<P: TileProvider + ?Sized + 'static> Drop for PendingHold<P> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);
        let key = self.key;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { shared.abandon(key, state).await });
            }
            Err(_) => warn!(key = %key, "Runtime gone, abandoned hold not given back"),
        }
    }
}

// =============================================================================
// Cached Pyramid
// =============================================================================

struct Shared<P: ?Sized> {
    layer: LayerId,
    provider: Arc<P>,
    cache: SharedTileCache,
    offline: Option<Arc<OfflineCache>>,
    fetch_timeout: Duration,
    in_flight: Mutex<HashMap<TileKey, InFlightEntry>>,
}

/// Pyramid of one provider, backed by the shared tile cache.
///
/// Cheap to clone; clones share the in-flight table.
pub struct CachedPyramid<P: ?Sized> {
    shared: Arc<Shared<P>>,
}

impl<P: ?Sized> Clone for CachedPyramid<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: TileProvider + ?Sized + 'static> CachedPyramid<P> {
    /// Create a cached pyramid.
    ///
    /// # Arguments
    ///
    /// * `layer` - Layer id, unique among the pyramids sharing `cache`
    /// * `provider` - Upstream source of payloads
    /// * `cache` - Shared LRU cache
    /// * `offline` - Store consulted before the provider, and fed on fetch
    /// * `fetch_timeout` - Timeout of a single provider fetch
    pub fn new(
        layer: LayerId,
        provider: Arc<P>,
        cache: SharedTileCache,
        offline: Option<Arc<OfflineCache>>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                layer,
                provider,
                cache,
                offline,
                fetch_timeout,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn layer(&self) -> LayerId {
        self.shared.layer
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.shared.provider
    }

    pub fn pyramid(&self) -> &Pyramid {
        self.shared.provider.pyramid()
    }

    pub fn cache(&self) -> &SharedTileCache {
        &self.shared.cache
    }

    pub fn offline(&self) -> Option<&Arc<OfflineCache>> {
        self.shared.offline.as_ref()
    }

    /// Cache key of a tile, after checking it lies in the pyramid.
    pub fn key(&self, level: u32, row: u32, column: u32) -> Result<TileKey, TileError> {
        self.locate(level, row, column).map(|(key, _)| key)
    }

    fn locate(
        &self,
        level: u32,
        row: u32,
        column: u32,
    ) -> Result<(TileKey, PyramidLevel), TileError> {
        let pyramid_level = *self.pyramid().level(level)?;
        let mosaic_size = pyramid_level.mosaic_size();
        if row >= mosaic_size || column >= mosaic_size {
            return Err(GeometryError::OutOfRegion {
                level,
                row: row as i64,
                column: column as i64,
                mosaic_size,
            }
            .into());
        }
        Ok((TileKey::new(self.shared.layer, level, row, column), pyramid_level))
    }

    /// Acquire a tile, fetching it on miss.
    ///
    /// Every successful acquire must be matched by one [`release`](Self::release).
    /// Concurrent acquires of the same tile share a single provider fetch.
    pub async fn acquire(&self, level: u32, row: u32, column: u32) -> Result<Arc<Tile>, TileError> {
        let (key, pyramid_level) = self.locate(level, row, column)?;

        let state = {
            let mut in_flight = self.shared.in_flight.lock().await;

            if let Some(entry) = in_flight.get_mut(&key) {
                entry.holders += 1;
                debug!(key = %key, holders = entry.holders, "Joined in-flight fetch");
                Arc::clone(&entry.state)
            } else {
                if let Some(tile) = self.shared.cache.lock().await.acquire(&key) {
                    debug!(key = %key, "Cache hit");
                    return Ok(tile);
                }

                let state = Arc::new(InFlightState::new());
                in_flight.insert(
                    key,
                    InFlightEntry {
                        state: Arc::clone(&state),
                        holders: 1,
                    },
                );
                debug!(key = %key, "Cache miss, fetching");

                let shared = Arc::clone(&self.shared);
                let leader_state = Arc::clone(&state);
                tokio::spawn(async move {
                    // Store failures are logged by the leader
                    let _ = shared
                        .load(key, pyramid_level, leader_state, Landing::Always)
                        .await;
                });
                state
            }
        };

        let mut hold = PendingHold {
            shared: Arc::clone(&self.shared),
            key,
            state: Arc::clone(&state),
            settled: false,
        };
        let result = state.wait().await;
        hold.settled = true;
        result
    }

    /// Release a tile previously acquired.
    ///
    /// # Errors
    /// [`TileError::NotAcquired`] if no acquire is outstanding for the tile.
    pub async fn release(&self, level: u32, row: u32, column: u32) -> Result<(), TileError> {
        let (key, _) = self.locate(level, row, column)?;
        let mut in_flight = self.shared.in_flight.lock().await;

        if let Some(entry) = in_flight.get_mut(&key) {
            if entry.holders == 0 {
                return Err(TileError::NotAcquired {
                    key: key.to_string(),
                });
            }
            entry.holders -= 1;
            debug!(key = %key, holders = entry.holders, "Released tile still in flight");
            return Ok(());
        }

        let mut cache = self.shared.cache.lock().await;
        cache.release(&key).map_err(|_| TileError::NotAcquired {
            key: key.to_string(),
        })
    }

    /// Run one eviction pass on the shared cache.
    pub async fn recycle(&self) -> usize {
        self.shared.cache.lock().await.recycle()
    }

    /// Number of fetches currently outstanding.
    pub async fn in_flight(&self) -> usize {
        self.shared.in_flight.lock().await.len()
    }

    /// Fetch and store every pinned tile of a region that has no data yet.
    ///
    /// Tiles go from the provider to the offline store. A tile already in
    /// flight is waited on instead of fetched again. A preloaded tile enters
    /// the LRU cache only if an acquire joined its fetch. Pinned tiles outside
    /// the pyramid are counted as failed without any request.
    ///
    /// # Errors
    /// - [`TileError::NoOfflineStore`] if the pyramid has no offline store
    /// - [`TileError::DatasetMismatch`] if the region was pinned for another dataset
    pub async fn preload_region(&self, name: &str) -> Result<PreloadReport, TileError> {
        let store = self
            .shared
            .offline
            .clone()
            .ok_or(TileError::NoOfflineStore)?;

        let region = {
            let name = name.to_string();
            store.run_blocking(move |s| s.get_region(&name)).await?
        };

        let dataset = self.shared.provider.dataset();
        let map_level = region.map_level;
        if map_level != dataset.level(map_level.level) {
            return Err(TileError::DatasetMismatch {
                region: region.name,
                region_dataset: format!(
                    "{}/{}/{}",
                    map_level.provider_id, map_level.map_id, map_level.version
                ),
                provider_dataset: dataset.to_string(),
            });
        }
        self.pyramid().level(map_level.level)?;

        let missing = {
            let name = name.to_string();
            store.run_blocking(move |s| s.missing_tiles(&name)).await?
        };

        let mut report = PreloadReport {
            requested: missing.len(),
            ..Default::default()
        };
        let mut tasks = JoinSet::new();

        for tile in missing {
            if tasks.len() >= PRELOAD_CONCURRENCY {
                if let Some(joined) = tasks.join_next().await {
                    tally(&mut report, joined);
                }
            }
            let (key, level) = match self.locate(tile.map_level.level, tile.row, tile.column) {
                Ok(located) => located,
                Err(err) => {
                    warn!(tile = %tile, error = %err, "Pinned tile lies outside the pyramid");
                    report.failed += 1;
                    continue;
                }
            };
            let shared = Arc::clone(&self.shared);
            tasks.spawn(async move { shared.preload(key, level).await.map(|()| tile) });
        }
        while let Some(joined) = tasks.join_next().await {
            tally(&mut report, joined);
        }

        info!(
            region = %name,
            requested = report.requested,
            fetched = report.fetched,
            failed = report.failed,
            "Preloaded region"
        );
        Ok(report)
    }
}

fn tally(
    report: &mut PreloadReport,
    joined: Result<Result<OfflineTile, TileError>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(tile)) => {
            debug!(tile = %tile, "Preloaded tile");
            report.fetched += 1;
        }
        Ok(Err(err)) => {
            warn!(error = %err, "Preload fetch failed");
            report.failed += 1;
        }
        Err(err) => {
            warn!(error = %err, "Preload task failed");
            report.failed += 1;
        }
    }
}

impl<P: TileProvider + ?Sized + 'static> Shared<P> {
    /// Leader side of an acquisition: fetch, install, wake joined callers.
    ///
    /// Returns the outcome of the offline store write.
    async fn load(
        self: Arc<Self>,
        key: TileKey,
        level: PyramidLevel,
        state: Arc<InFlightState>,
        landing: Landing,
    ) -> Result<(), OfflineError> {
        let (fetched, stored) = match self.fetch_tile(key, &level).await {
            Ok(Fetched { tile, stored }) => (Ok(Arc::new(tile)), stored),
            Err(err) => {
                warn!(key = %key, error = %err, "Tile fetch failed");
                (Err(err), Ok(()))
            }
        };

        let mut in_flight = self.in_flight.lock().await;
        let holders = in_flight.remove(&key).map(|entry| entry.holders).unwrap_or(0);

        let result = match fetched {
            Ok(tile) if holders == 0 && landing == Landing::WhenHeld => Ok(tile),
            Ok(tile) => {
                let mut cache = self.cache.lock().await;
                match cache.add(Arc::clone(&tile), false) {
                    Ok(()) => {
                        for _ in 0..holders {
                            cache.acquire(&key);
                        }
                        debug!(key = %key, holders, "Tile resident");
                        Ok(tile)
                    }
                    Err(err) => Err(TileError::from(err)),
                }
            }
            Err(err) => Err(err),
        };

        // Completed under the in-flight lock, so an abandoned hold that finds
        // no entry always sees the outcome
        state.complete(result).await;
        drop(in_flight);
        stored
    }

    /// Preload side: join the fetch of a tile, or lead one with no holder.
    async fn preload(self: Arc<Self>, key: TileKey, level: PyramidLevel) -> Result<(), TileError> {
        let (state, leader) = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&key) {
                Some(entry) => {
                    debug!(key = %key, "Preload joined in-flight fetch");
                    (Arc::clone(&entry.state), false)
                }
                None => {
                    let state = Arc::new(InFlightState::new());
                    in_flight.insert(
                        key,
                        InFlightEntry {
                            state: Arc::clone(&state),
                            holders: 0,
                        },
                    );
                    (state, true)
                }
            }
        };

        if leader {
            Arc::clone(&self)
                .load(key, level, Arc::clone(&state), Landing::WhenHeld)
                .await?;
        }
        state.wait().await.map(|_| ())
    }

    /// Give back the hold of an acquire that stopped waiting on `state`.
    async fn abandon(&self, key: TileKey, state: Arc<InFlightState>) {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(entry) = in_flight.get_mut(&key) {
            if Arc::ptr_eq(&entry.state, &state) {
                entry.holders = entry.holders.saturating_sub(1);
                debug!(key = %key, holders = entry.holders, "Abandoned in-flight fetch");
                return;
            }
        }

        // Landed: a reference was taken on behalf of the abandoned caller
        let landed = matches!(state.result.lock().await.as_ref(), Some(Ok(_)));
        if landed {
            let mut cache = self.cache.lock().await;
            match cache.release(&key) {
                Ok(()) => debug!(key = %key, "Released reference of abandoned acquire"),
                Err(err) => warn!(key = %key, error = %err, "Abandoned reference already gone"),
            }
        }
    }

    async fn fetch_tile(&self, key: TileKey, level: &PyramidLevel) -> Result<Fetched, TileError> {
        let offline_tile = OfflineTile::new(
            self.provider.dataset().level(key.level),
            key.row,
            key.column,
        );

        if let Some(payload) = self.read_offline(offline_tile).await {
            match TileImage::decode(&payload) {
                Ok(image) => {
                    debug!(key = %key, "Loaded tile from offline store");
                    return Ok(Fetched {
                        tile: Tile::new(key, level, image),
                        stored: Ok(()),
                    });
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Ignoring undecodable offline payload");
                }
            }
        }

        let payload = self.fetch_payload(key.level, key.row, key.column).await?;
        let image = TileImage::decode(&payload)?;
        let stored = self.write_offline(offline_tile, payload).await;

        Ok(Fetched {
            tile: Tile::new(key, level, image),
            stored,
        })
    }

    /// Provider fetch bounded by the fetch timeout.
    async fn fetch_payload(
        &self,
        level: u32,
        row: u32,
        column: u32,
    ) -> Result<RawPayload, FetchError> {
        let request = self.provider.get_tile(level, row, column);
        match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                after_ms: self.fetch_timeout.as_millis() as u64,
            }),
        }
    }

    async fn read_offline(&self, tile: OfflineTile) -> Option<RawPayload> {
        let store = self.offline.as_ref()?;
        match store.run_blocking(move |s| s.get_tile_data(&tile)).await {
            Ok(data) => data,
            Err(err) => {
                warn!(tile = %tile, error = %err, "Offline lookup failed");
                None
            }
        }
    }

    /// Keep the payload of a pinned tile; unpinned tiles are left alone.
    async fn write_offline(
        &self,
        tile: OfflineTile,
        payload: RawPayload,
    ) -> Result<(), OfflineError> {
        let Some(store) = self.offline.as_ref() else {
            return Ok(());
        };
        match store
            .run_blocking(move |s| s.store_tile_data(&tile, &payload))
            .await
        {
            Ok(true) => {
                debug!(tile = %tile, "Stored payload of pinned tile");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(err) => {
                warn!(tile = %tile, error = %err, "Offline store write failed");
                Err(err)
            }
        }
    }
}
