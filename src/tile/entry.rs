//! Resident tile: what the cache holds and the renderer draws.

use crate::cache::CacheItem;
use crate::geo::{PyramidLevel, TileIndex};

use super::key::TileKey;
use super::raster::TileImage;

/// A decoded tile placed in the pyramid-local plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    key: TileKey,
    /// Footprint edge in projected meters
    length: f64,
    /// Origin in the pyramid-local plane (x eastwards, y southwards)
    x: f64,
    y: f64,
    image: TileImage,
}

impl Tile {
    /// Place a decoded image at its position on `level`.
    pub fn new(key: TileKey, level: &PyramidLevel, image: TileImage) -> Self {
        let origin = level.tile_origin(TileIndex::new(key.row, key.column));
        Self {
            key,
            length: level.tile_length(),
            x: origin.x,
            y: origin.y,
            image,
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn index(&self) -> TileIndex {
        TileIndex::new(self.key.row, self.key.column)
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn image(&self) -> &TileImage {
        &self.image
    }

    pub fn size_bytes(&self) -> usize {
        self.image.byte_size()
    }
}

impl CacheItem for Tile {
    type Key = TileKey;

    fn key(&self) -> TileKey {
        self.key
    }

    fn size_bytes(&self) -> usize {
        self.image.byte_size()
    }
}
