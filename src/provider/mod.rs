//! Data providers: where tile payloads come from.
//!
//! A provider owns the [`Pyramid`] describing its tiling and answers raw
//! payload requests for `(level, row, column)`. The cached pyramid decodes
//! and caches whatever it returns.
//!
//! - [`WmtsProvider`]: tiled-map web service over HTTPS with basic auth
//! - [`OfflineProvider`]: payloads previously stored in an [`OfflineCache`]
//!
//! [`OfflineCache`]: crate::offline::OfflineCache

mod offline;
mod wmts;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;
use crate::geo::Pyramid;
use crate::offline::MapLevel;

pub use offline::OfflineProvider;
pub use wmts::{
    geoportail_pyramid, Licence, WmtsLayer, WmtsProvider, DEFAULT_SERVER, GEOPORTAIL_LEVELS,
    GEOPORTAIL_PROVIDER_ID,
};

/// Encoded tile payload as served by a provider.
pub type RawPayload = Bytes;

/// Identity of the dataset a provider serves, as persisted by the offline store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dataset {
    pub provider_id: i64,
    pub map_id: i64,
    pub version: i64,
}

impl Dataset {
    pub fn new(provider_id: i64, map_id: i64, version: i64) -> Self {
        Self {
            provider_id,
            map_id,
            version,
        }
    }

    /// Map level of this dataset at `level`.
    pub fn level(&self, level: u32) -> MapLevel {
        MapLevel::new(self.provider_id, self.map_id, self.version, level)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.provider_id, self.map_id, self.version)
    }
}

/// Upstream source of tile payloads.
#[async_trait]
pub trait TileProvider: Send + Sync {
    /// Tiling of this provider, fixed for its lifetime.
    fn pyramid(&self) -> &Pyramid;

    /// Dataset identity used for offline persistence.
    fn dataset(&self) -> Dataset;

    /// Fetch the encoded payload of one tile.
    async fn get_tile(&self, level: u32, row: u32, column: u32) -> Result<RawPayload, FetchError>;
}
