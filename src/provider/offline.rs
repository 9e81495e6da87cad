//! Provider serving payloads stored in the offline store.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::{Dataset, RawPayload, TileProvider};
use crate::error::FetchError;
use crate::geo::Pyramid;
use crate::offline::{OfflineCache, OfflineTile};

/// Tile provider reading from an [`OfflineCache`] only.
///
/// Serves the dataset it was created for; tiles without stored data are
/// reported as [`FetchError::NotAvailable`].
pub struct OfflineProvider {
    store: Arc<OfflineCache>,
    dataset: Dataset,
    pyramid: Pyramid,
}

impl OfflineProvider {
    pub fn new(store: Arc<OfflineCache>, dataset: Dataset, pyramid: Pyramid) -> Self {
        Self {
            store,
            dataset,
            pyramid,
        }
    }
}

#[async_trait]
impl TileProvider for OfflineProvider {
    fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    fn dataset(&self) -> Dataset {
        self.dataset
    }

    async fn get_tile(&self, level: u32, row: u32, column: u32) -> Result<RawPayload, FetchError> {
        let tile = OfflineTile::new(self.dataset.level(level), row, column);
        let data = self
            .store
            .run_blocking(move |store| store.get_tile_data(&tile))
            .await
            .map_err(|e| FetchError::NotAvailable(e.to_string()))?;

        trace!(tile = %tile, found = data.is_some(), "Offline lookup");
        data.ok_or_else(|| FetchError::NotAvailable(tile.to_string()))
    }
}
