//! Tile identity and layer id allocation.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identifier of one cached pyramid within a session.
pub type LayerId = u32;

/// Composite identity of a cached tile.
///
/// Ordered by layer, then level, row and column. Rendered as the hexadecimal
/// tuple `layer/level/row/column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub layer: LayerId,
    pub level: u32,
    pub row: u32,
    pub column: u32,
}

impl TileKey {
    pub fn new(layer: LayerId, level: u32, row: u32, column: u32) -> Self {
        Self {
            layer,
            level,
            row,
            column,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}/{:x}/{:x}/{:x}",
            self.layer, self.level, self.row, self.column
        )
    }
}

/// Sequence of layer ids, owned by a session rather than the process.
#[derive(Debug, Default)]
pub struct LayerIdGenerator {
    next: AtomicU32,
}

impl LayerIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next layer id, starting at 0.
    pub fn next_id(&self) -> LayerId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}
