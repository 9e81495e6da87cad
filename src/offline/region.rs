//! Persisted identities: map levels, pinned tiles and regions.

use std::fmt;

use crate::geo::{TileIndex, TileRange};

/// One zoom level of one dataset version from one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapLevel {
    pub provider_id: i64,
    pub map_id: i64,
    pub version: i64,
    pub level: u32,
}

impl MapLevel {
    pub fn new(provider_id: i64, map_id: i64, version: i64, level: u32) -> Self {
        Self {
            provider_id,
            map_id,
            version,
            level,
        }
    }

    /// Tiles per side of the level's mosaic.
    pub fn mosaic_size(&self) -> u64 {
        1u64.checked_shl(self.level).unwrap_or(u64::MAX)
    }

    pub fn contains(&self, row: u32, column: u32) -> bool {
        let mosaic = self.mosaic_size();
        u64::from(row) < mosaic && u64::from(column) < mosaic
    }
}

impl fmt::Display for MapLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.provider_id, self.map_id, self.version, self.level
        )
    }
}

/// A tile of the offline store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OfflineTile {
    pub map_level: MapLevel,
    pub row: u32,
    pub column: u32,
}

impl OfflineTile {
    pub fn new(map_level: MapLevel, row: u32, column: u32) -> Self {
        Self {
            map_level,
            row,
            column,
        }
    }

    pub fn index(&self) -> TileIndex {
        TileIndex::new(self.row, self.column)
    }
}

impl fmt::Display for OfflineTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.map_level, self.row, self.column)
    }
}

/// Columns `column_inf..=column_sup` of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Run {
    pub row: u32,
    pub column_inf: u32,
    pub column_sup: u32,
}

impl Run {
    /// Build a run; the column bounds may be given in any order.
    pub fn new(row: u32, column_a: u32, column_b: u32) -> Self {
        Self {
            row,
            column_inf: column_a.min(column_b),
            column_sup: column_a.max(column_b),
        }
    }

    pub fn len(&self) -> u64 {
        (self.column_sup - self.column_inf) as u64 + 1
    }

    /// A run always covers at least one tile.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = TileIndex> {
        let row = self.row;
        (self.column_inf..=self.column_sup).map(move |column| TileIndex::new(row, column))
    }
}

/// A named set of pinned tiles of one map level, run-length encoded.
///
/// Runs are normalized on construction: sorted, and overlapping or adjacent
/// runs of the same row merged, so every tile appears exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub map_level: MapLevel,
    runs: Vec<Run>,
}

impl Region {
    pub fn new(
        name: impl Into<String>,
        map_level: MapLevel,
        runs: impl IntoIterator<Item = Run>,
    ) -> Self {
        Self {
            name: name.into(),
            map_level,
            runs: normalize(runs.into_iter().collect()),
        }
    }

    /// Region covering a rectangle of tiles, one run per row.
    pub fn from_range(name: impl Into<String>, map_level: MapLevel, range: &TileRange) -> Self {
        let runs = (range.row_inf..=range.row_sup)
            .map(|row| Run::new(row, range.column_inf, range.column_sup));
        Self::new(name, map_level, runs)
    }

    pub fn runs(&self) -> &[Run] {
        &self.runs
    }

    pub fn number_of_tiles(&self) -> u64 {
        self.runs.iter().map(Run::len).sum()
    }

    /// Iterate the covered tiles, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = OfflineTile> + '_ {
        self.runs
            .iter()
            .flat_map(|run| run.iter())
            .map(|index| OfflineTile::new(self.map_level, index.row, index.column))
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        self.runs.iter().any(|run| {
            run.row == index.row && (run.column_inf..=run.column_sup).contains(&index.column)
        })
    }

    /// First run reaching past the mosaic of the region's level.
    pub fn first_outside_mosaic(&self) -> Option<&Run> {
        self.runs
            .iter()
            .find(|run| !self.map_level.contains(run.row, run.column_sup))
    }
}

fn normalize(mut runs: Vec<Run>) -> Vec<Run> {
    runs.sort();
    let mut merged: Vec<Run> = Vec::with_capacity(runs.len());
    for run in runs {
        match merged.last_mut() {
            Some(last)
                if last.row == run.row && run.column_inf <= last.column_sup.saturating_add(1) =>
            {
                last.column_sup = last.column_sup.max(run.column_sup);
            }
            _ => merged.push(run),
        }
    }
    merged
}
