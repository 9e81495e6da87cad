//! Session: the context shared by every cached pyramid of one application.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::offline::OfflineCache;
use crate::provider::TileProvider;

use super::cached::{shared_tile_cache, CachedPyramid, SharedTileCache, DEFAULT_FETCH_TIMEOUT};
use super::key::LayerIdGenerator;

/// Snapshot of the shared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub resident_bytes: usize,
    pub constraint: usize,
}

/// Owns the layer id sequence, the shared LRU cache and the optional offline
/// store. Pyramids created from one session never collide in the cache.
pub struct TileSession {
    layer_ids: LayerIdGenerator,
    cache: SharedTileCache,
    offline: Option<Arc<OfflineCache>>,
    fetch_timeout: Duration,
}

impl TileSession {
    /// Create a session whose cache holds about `cache_bytes` of decoded tiles.
    pub fn new(cache_bytes: usize) -> Self {
        Self {
            layer_ids: LayerIdGenerator::new(),
            cache: shared_tile_cache(cache_bytes),
            offline: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_offline_store(mut self, store: Arc<OfflineCache>) -> Self {
        self.offline = Some(store);
        self
    }

    /// Create a cached pyramid for `provider` under a fresh layer id.
    pub fn pyramid_for<P: TileProvider + ?Sized + 'static>(
        &self,
        provider: Arc<P>,
    ) -> CachedPyramid<P> {
        let layer = self.layer_ids.next_id();
        info!(layer, dataset = %provider.dataset(), "Created cached pyramid");
        CachedPyramid::new(
            layer,
            provider,
            Arc::clone(&self.cache),
            self.offline.clone(),
            self.fetch_timeout,
        )
    }

    pub fn cache(&self) -> &SharedTileCache {
        &self.cache
    }

    pub fn offline(&self) -> Option<&Arc<OfflineCache>> {
        self.offline.as_ref()
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().await;
        CacheStats {
            entries: cache.len(),
            resident_bytes: cache.total_size(),
            constraint: cache.constraint(),
        }
    }

    /// Run one eviction pass.
    pub async fn recycle(&self) -> usize {
        self.cache.lock().await.recycle()
    }

    /// Drop every resident tile, referenced or not. For teardown.
    pub async fn reset(&self) {
        self.cache.lock().await.reset();
    }
}
