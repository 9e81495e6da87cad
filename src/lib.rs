//! # Tile Pyramid
//!
//! A tile acquisition engine for Web Mercator map pyramids.
//!
//! Map clients ask for tiles by `(level, row, column)`. This library fetches
//! them from a web tile service, decodes them, and keeps them in a shared
//! reference-counted LRU cache so that concurrent requests for the same tile
//! trigger a single fetch. Named regions of tiles can be pinned in an on-disk
//! SQLite store and preloaded for offline use.
//!
//! ## Features
//!
//! - **Pyramid geometry**: degree/Mercator conversions and point or rectangle
//!   to tile index mapping
//! - **De-duplicated fetches**: one fetch per tile however many callers wait on it
//! - **Byte-budgeted cache**: evicts unreferenced tiles in LRU order
//! - **Offline regions**: pin counts per tile, shared between overlapping regions
//!
//! ## Architecture
//!
//! - [`geo`] - Projection, pyramid levels and tile ranges
//! - [`cache`] - Reference-counted LRU cache
//! - [`provider`] - Tile providers (WMTS service, offline store)
//! - [`offline`] - Regions and the SQLite offline store
//! - [`tile`] - Cached pyramids, sessions and viewport tracking
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tile_pyramid::{GeoCoordinate, Licence, TileProvider, TileSession, WmtsLayer, WmtsProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let licence = Licence::new("user", "password", "api-key");
//!     let provider = WmtsProvider::new(
//!         "https://wxs.ign.fr",
//!         licence,
//!         WmtsLayer::Maps,
//!         Duration::from_secs(30),
//!     )?;
//!
//!     let session = TileSession::new(256 * 1024 * 1024);
//!     let pyramid = session.pyramid_for(Arc::new(provider));
//!
//!     let paris = GeoCoordinate::from_degrees(2.35, 48.85);
//!     let index = pyramid.pyramid().level(14)?.coordinate_to_tile_index(&paris)?;
//!     let tile = pyramid.acquire(14, index.row, index.column).await?;
//!     println!("{}x{} pixels", tile.image().width(), tile.image().height());
//!     pyramid.release(14, index.row, index.column).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod geo;
pub mod offline;
pub mod provider;
pub mod tile;

// Re-export commonly used types
pub use cache::{CacheItem, RefCountedLru};
pub use config::{Cli, Command, Config, RegionCommand};
pub use error::{CacheError, ConfigError, FetchError, GeometryError, OfflineError, TileError};
pub use geo::{
    GeoAngle, GeoCoordinate, ProjectedInterval, ProjectedPoint, Pyramid, PyramidLevel, TileIndex,
    TileRange,
};
pub use offline::{MapLevel, OfflineCache, OfflineStats, OfflineTile, Region, Run};
pub use provider::{
    Dataset, Licence, OfflineProvider, RawPayload, TileProvider, WmtsLayer, WmtsProvider,
};
pub use tile::{
    CacheStats, CachedPyramid, PreloadReport, Tile, TileImage, TileKey, TileSession,
    ViewportTracker, ViewportUpdate,
};
