//! Tile acquisition layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            ViewportTracker              │
//! │   release / keep / acquire + recycle    │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            CachedPyramid                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  in-flight   │  │  RefCountedLru  │  │
//! │  │  table       │  │  (shared, byte  │  │
//! │  │  (per key)   │  │   budget)       │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └──────────┬─────────────────────┬────────┘
//!            │                     │
//!            ▼                     ▼
//! ┌────────────────────┐  ┌──────────────────┐
//! │   OfflineCache     │  │   TileProvider   │
//! └────────────────────┘  └──────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileSession`]: layer id sequence, shared cache and offline store
//! - [`CachedPyramid`]: acquire/release of tiles with de-duplicated fetches
//! - [`ViewportTracker`]: keeps the visible set acquired as the view moves
//! - [`Tile`]: decoded raster placed in the pyramid-local plane
//! - [`TileKey`]: `(layer, level, row, column)` cache identity

mod cached;
mod entry;
mod key;
mod raster;
mod session;
mod viewport;

pub use cached::{
    shared_tile_cache, CachedPyramid, PreloadReport, SharedTileCache, DEFAULT_FETCH_TIMEOUT,
    PRELOAD_CONCURRENCY,
};
pub use entry::Tile;
pub use key::{LayerId, LayerIdGenerator, TileKey};
pub use raster::TileImage;
pub use session::{CacheStats, TileSession};
pub use viewport::{ViewportTracker, ViewportUpdate};
