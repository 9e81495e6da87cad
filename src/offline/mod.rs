//! Offline store: tiles pinned on disk so they survive restarts and can be
//! served without network.
//!
//! ```text
//! Region "paris" ──runs──▶ tile(map_level, row, column) ◀──runs── Region "idf"
//!                           offline_count = 2, data = JPEG
//! ```
//!
//! - [`Region`]: named set of tiles of one [`MapLevel`], as row runs
//! - [`OfflineCache`]: SQLite store with per-tile pin counts

mod region;
mod store;

pub use region::{MapLevel, OfflineTile, Region, Run};
pub use store::{OfflineCache, OfflineStats, SCHEMA_VERSION};
