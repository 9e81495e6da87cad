//! SQLite-backed offline store.
//!
//! # Schema
//!
//! ```text
//! metadata(version)
//! map_level(map_level_id, provider_id, map_id, version, level)      unique 4-tuple
//! tile(map_level_id, row, column, offline_count, data)              pk (map_level_id, row, column)
//! region(region_id, name)                                           unique name
//! region_run(region_id, map_level_id, row, column_inf, column_sup)  inclusive columns
//! ```
//!
//! A tile row exists iff its `offline_count` is positive: every region whose
//! runs cover it counts once, and so does each ad-hoc [`OfflineCache::pin_tile`].
//!
//! Every multi-statement operation runs in one transaction, so a crash leaves
//! either the old or the new state. The connection is serialized behind a
//! mutex and the database is opened in exclusive locking mode, so only one
//! process uses it at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::region::{MapLevel, OfflineTile, Region, Run};
use crate::error::OfflineError;

/// Version written to the `metadata` table on creation.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    version INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS map_level (
    map_level_id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider_id INTEGER NOT NULL,
    map_id INTEGER NOT NULL,
    version INTEGER NOT NULL,
    level INTEGER NOT NULL,
    UNIQUE (provider_id, map_id, version, level)
);
CREATE TABLE IF NOT EXISTS tile (
    map_level_id INTEGER NOT NULL REFERENCES map_level (map_level_id),
    "row" INTEGER NOT NULL,
    "column" INTEGER NOT NULL,
    offline_count INTEGER NOT NULL,
    data BLOB,
    PRIMARY KEY (map_level_id, "row", "column")
);
CREATE TABLE IF NOT EXISTS region (
    region_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS region_run (
    region_id INTEGER NOT NULL REFERENCES region (region_id),
    map_level_id INTEGER NOT NULL REFERENCES map_level (map_level_id),
    "row" INTEGER NOT NULL,
    column_inf INTEGER NOT NULL,
    column_sup INTEGER NOT NULL,
    PRIMARY KEY (region_id, map_level_id, "row", column_inf)
);
"#;

/// Counters over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OfflineStats {
    pub map_levels: u64,
    pub regions: u64,
    pub tiles: u64,
    pub tiles_with_data: u64,
    pub data_bytes: u64,
}

/// Persistent store of pinned tiles and named regions.
pub struct OfflineCache {
    path: Option<PathBuf>,
    connection: Mutex<Connection>,
    /// In-memory dictionary of known map level ids
    map_level_ids: Mutex<HashMap<MapLevel, i64>>,
}

impl OfflineCache {
    /// Open the store at `path`, creating it if absent.
    ///
    /// # Errors
    /// [`OfflineError::Persistence`] if the file cannot be opened or carries
    /// another schema version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OfflineError> {
        let path = path.as_ref();
        let created = !path.exists();
        let connection = Connection::open(path)?;
        let _mode: String =
            connection.query_row("PRAGMA locking_mode = EXCLUSIVE", [], |row| row.get(0))?;

        let store = Self::from_connection(connection, Some(path.to_path_buf()))?;
        if created {
            info!(path = %path.display(), "Created offline store");
        } else {
            info!(path = %path.display(), "Opened offline store");
        }
        Ok(store)
    }

    /// Open a private store that lives in memory.
    pub fn open_in_memory() -> Result<Self, OfflineError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(
        connection: Connection,
        path: Option<PathBuf>,
    ) -> Result<Self, OfflineError> {
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
        connection.execute_batch(SCHEMA)?;

        let version: Option<i64> = connection
            .query_row("SELECT version FROM metadata LIMIT 1", [], |row| row.get(0))
            .optional()?;
        match version {
            None => {
                connection.execute(
                    "INSERT INTO metadata (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(SCHEMA_VERSION) => {}
            Some(other) => {
                return Err(OfflineError::Persistence(format!(
                    "unsupported schema version {} (expected {})",
                    other, SCHEMA_VERSION
                )));
            }
        }

        Ok(Self {
            path,
            connection: Mutex::new(connection),
            map_level_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Run a store operation on the blocking thread pool.
    ///
    /// SQLite calls block; async callers go through here.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, operation: F) -> Result<T, OfflineError>
    where
        F: FnOnce(&OfflineCache) -> Result<T, OfflineError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || operation(&store))
            .await
            .map_err(|e| OfflineError::Persistence(format!("store task failed: {}", e)))?
    }

    /// Location of the database file, `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, OfflineError> {
        self.connection
            .lock()
            .map_err(|_| OfflineError::Persistence("connection lock poisoned".to_string()))
    }

    fn known_ids(&self) -> Result<MutexGuard<'_, HashMap<MapLevel, i64>>, OfflineError> {
        self.map_level_ids
            .lock()
            .map_err(|_| OfflineError::Persistence("map level lock poisoned".to_string()))
    }

    // =========================================================================
    // Map levels
    // =========================================================================

    /// Id of a map level, inserting it on first use.
    pub fn get_or_create_map_level(&self, map_level: &MapLevel) -> Result<i64, OfflineError> {
        if let Some(id) = self.known_ids()?.get(map_level) {
            return Ok(*id);
        }

        let id = {
            let connection = self.connection()?;
            match select_map_level_id(&connection, map_level)? {
                Some(id) => id,
                None => {
                    connection.execute(
                        "INSERT INTO map_level (provider_id, map_id, version, level)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            map_level.provider_id,
                            map_level.map_id,
                            map_level.version,
                            map_level.level
                        ],
                    )?;
                    let id = connection.last_insert_rowid();
                    debug!(map_level = %map_level, id, "Registered map level");
                    id
                }
            }
        };

        self.known_ids()?.insert(*map_level, id);
        Ok(id)
    }

    /// Id of a map level if it is already registered.
    fn find_map_level_id(&self, map_level: &MapLevel) -> Result<Option<i64>, OfflineError> {
        if let Some(id) = self.known_ids()?.get(map_level) {
            return Ok(Some(*id));
        }
        let id = {
            let connection = self.connection()?;
            select_map_level_id(&connection, map_level)?
        };
        if let Some(id) = id {
            self.known_ids()?.insert(*map_level, id);
        }
        Ok(id)
    }

    /// Load every registered map level into the in-memory dictionary.
    pub fn load_map_levels(&self) -> Result<Vec<(i64, MapLevel)>, OfflineError> {
        let levels = {
            let connection = self.connection()?;
            let mut statement = connection.prepare(
                "SELECT map_level_id, provider_id, map_id, version, level
                 FROM map_level ORDER BY map_level_id",
            )?;
            let rows = statement.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    MapLevel::new(row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?),
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut known = self.known_ids()?;
        for (id, map_level) in &levels {
            known.insert(*map_level, *id);
        }
        Ok(levels)
    }

    /// Delete a map level with its tiles, and drop it from every region.
    ///
    /// Regions left without runs are deleted too. Returns whether the map
    /// level existed.
    pub fn delete_map_level(&self, map_level: &MapLevel) -> Result<bool, OfflineError> {
        let deleted = {
            let mut connection = self.connection()?;
            let tx = connection.transaction()?;
            match select_map_level_id(&tx, map_level)? {
                None => false,
                Some(id) => {
                    tx.execute("DELETE FROM tile WHERE map_level_id = ?1", params![id])?;
                    tx.execute("DELETE FROM region_run WHERE map_level_id = ?1", params![id])?;
                    tx.execute(
                        "DELETE FROM region WHERE region_id NOT IN
                         (SELECT DISTINCT region_id FROM region_run)",
                        [],
                    )?;
                    tx.execute("DELETE FROM map_level WHERE map_level_id = ?1", params![id])?;
                    tx.commit()?;
                    true
                }
            }
        };

        self.known_ids()?.remove(map_level);
        if deleted {
            info!(map_level = %map_level, "Deleted map level");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Regions
    // =========================================================================

    /// Persist a region and pin every tile it covers.
    ///
    /// # Errors
    /// - [`OfflineError::DuplicateName`] if a region with the same name exists
    /// - [`OfflineError::EmptyRegion`] if the region has no run
    /// - [`OfflineError::OutOfRegion`] if a run reaches past the mosaic
    pub fn insert_region(&self, region: &Region) -> Result<(), OfflineError> {
        if region.runs().is_empty() {
            return Err(OfflineError::EmptyRegion(region.name.clone()));
        }
        if let Some(run) = region.first_outside_mosaic() {
            let tile = OfflineTile::new(region.map_level, run.row, run.column_sup);
            return Err(OfflineError::OutOfRegion(tile.to_string()));
        }
        let map_level_id = self.get_or_create_map_level(&region.map_level)?;

        let mut connection = self.connection()?;
        let tx = connection.transaction()?;

        if select_region_id(&tx, &region.name)?.is_some() {
            return Err(OfflineError::DuplicateName(region.name.clone()));
        }

        tx.execute("INSERT INTO region (name) VALUES (?1)", params![region.name])?;
        let region_id = tx.last_insert_rowid();

        {
            let mut insert_run = tx.prepare(
                r#"INSERT INTO region_run (region_id, map_level_id, "row", column_inf, column_sup)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
            )?;
            let mut pin = tx.prepare(PIN_SQL)?;
            for run in region.runs() {
                insert_run.execute(params![
                    region_id,
                    map_level_id,
                    run.row,
                    run.column_inf,
                    run.column_sup
                ])?;
                for index in run.iter() {
                    pin.execute(params![map_level_id, index.row, index.column])?;
                }
            }
        }

        tx.commit()?;
        info!(
            region = %region.name,
            map_level = %region.map_level,
            tiles = region.number_of_tiles(),
            "Inserted offline region"
        );
        Ok(())
    }

    /// Delete a region and unpin the tiles it covers.
    ///
    /// Tiles no longer covered by any region or ad-hoc pin are removed.
    pub fn delete_region(&self, name: &str) -> Result<(), OfflineError> {
        let mut connection = self.connection()?;
        let tx = connection.transaction()?;

        let region_id = select_region_id(&tx, name)?
            .ok_or_else(|| OfflineError::UnknownRegion(name.to_string()))?;

        let runs: Vec<(i64, Run)> = {
            let mut statement = tx.prepare(
                r#"SELECT map_level_id, "row", column_inf, column_sup
                   FROM region_run WHERE region_id = ?1"#,
            )?;
            let rows = statement.query_map(params![region_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    Run::new(row.get(1)?, row.get(2)?, row.get(3)?),
                ))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        {
            let mut unpin = tx.prepare(
                r#"UPDATE tile SET offline_count = offline_count - 1
                   WHERE map_level_id = ?1 AND "row" = ?2 AND "column" BETWEEN ?3 AND ?4"#,
            )?;
            let mut purge = tx.prepare(
                r#"DELETE FROM tile
                   WHERE map_level_id = ?1 AND "row" = ?2 AND "column" BETWEEN ?3 AND ?4
                   AND offline_count <= 0"#,
            )?;
            for (map_level_id, run) in &runs {
                let run_params = params![map_level_id, run.row, run.column_inf, run.column_sup];
                unpin.execute(run_params)?;
                purge.execute(run_params)?;
            }
        }

        tx.execute("DELETE FROM region_run WHERE region_id = ?1", params![region_id])?;
        tx.execute("DELETE FROM region WHERE region_id = ?1", params![region_id])?;
        tx.commit()?;

        info!(region = %name, "Deleted offline region");
        Ok(())
    }

    /// Load a region by name.
    pub fn get_region(&self, name: &str) -> Result<Region, OfflineError> {
        let connection = self.connection()?;
        let region_id = select_region_id(&connection, name)?
            .ok_or_else(|| OfflineError::UnknownRegion(name.to_string()))?;

        let mut statement = connection.prepare(
            r#"SELECT m.provider_id, m.map_id, m.version, m.level,
                      r."row", r.column_inf, r.column_sup
               FROM region_run r JOIN map_level m ON m.map_level_id = r.map_level_id
               WHERE r.region_id = ?1
               ORDER BY r."row", r.column_inf"#,
        )?;
        let rows = statement.query_map(params![region_id], |row| {
            Ok((
                MapLevel::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?),
                Run::new(row.get(4)?, row.get(5)?, row.get(6)?),
            ))
        })?;
        let rows = rows.collect::<Result<Vec<_>, _>>()?;

        let map_level = rows
            .first()
            .map(|(map_level, _)| *map_level)
            .ok_or_else(|| OfflineError::EmptyRegion(name.to_string()))?;
        Ok(Region::new(name, map_level, rows.into_iter().map(|(_, run)| run)))
    }

    /// Names of all regions, sorted.
    pub fn region_names(&self) -> Result<Vec<String>, OfflineError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare("SELECT name FROM region ORDER BY name")?;
        let names = statement.query_map([], |row| row.get(0))?;
        Ok(names.collect::<Result<Vec<String>, _>>()?)
    }

    /// Tiles of a region that are pinned but carry no data yet.
    pub fn missing_tiles(&self, name: &str) -> Result<Vec<OfflineTile>, OfflineError> {
        let region = self.get_region(name)?;
        let Some(map_level_id) = self.find_map_level_id(&region.map_level)? else {
            return Ok(Vec::new());
        };

        let connection = self.connection()?;
        let mut statement = connection.prepare(
            r#"SELECT "row", "column" FROM tile
               WHERE map_level_id = ?1 AND "row" = ?2 AND "column" BETWEEN ?3 AND ?4
               AND data IS NULL
               ORDER BY "column""#,
        )?;

        let mut missing = Vec::new();
        for run in region.runs() {
            let rows = statement.query_map(
                params![map_level_id, run.row, run.column_inf, run.column_sup],
                |row| Ok(OfflineTile::new(region.map_level, row.get(0)?, row.get(1)?)),
            )?;
            for tile in rows {
                missing.push(tile?);
            }
        }
        Ok(missing)
    }

    // =========================================================================
    // Tiles
    // =========================================================================

    /// Pin count of a tile, 0 when it is not pinned.
    pub fn has_tile(&self, tile: &OfflineTile) -> Result<u32, OfflineError> {
        let Some(map_level_id) = self.find_map_level_id(&tile.map_level)? else {
            return Ok(0);
        };
        let connection = self.connection()?;
        let count: Option<u32> = connection
            .query_row(
                r#"SELECT offline_count FROM tile
                   WHERE map_level_id = ?1 AND "row" = ?2 AND "column" = ?3"#,
                params![map_level_id, tile.row, tile.column],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    /// Pin a single tile outside any region. Returns the new pin count.
    ///
    /// # Errors
    /// [`OfflineError::OutOfRegion`] if the tile lies outside the mosaic.
    pub fn pin_tile(&self, tile: &OfflineTile) -> Result<u32, OfflineError> {
        if !tile.map_level.contains(tile.row, tile.column) {
            return Err(OfflineError::OutOfRegion(tile.to_string()));
        }
        let map_level_id = self.get_or_create_map_level(&tile.map_level)?;
        let mut connection = self.connection()?;
        let tx = connection.transaction()?;
        tx.execute(PIN_SQL, params![map_level_id, tile.row, tile.column])?;
        let count = select_offline_count(&tx, map_level_id, tile)?.unwrap_or(0);
        tx.commit()?;
        Ok(count)
    }

    /// Drop one ad-hoc pin of a tile. Returns the remaining pin count.
    ///
    /// # Errors
    /// [`OfflineError::NotPinned`] if the tile has no pin.
    pub fn unpin_tile(&self, tile: &OfflineTile) -> Result<u32, OfflineError> {
        let not_pinned = || OfflineError::NotPinned(tile.to_string());
        let map_level_id = self.find_map_level_id(&tile.map_level)?.ok_or_else(not_pinned)?;

        let mut connection = self.connection()?;
        let tx = connection.transaction()?;
        let count = select_offline_count(&tx, map_level_id, tile)?.ok_or_else(not_pinned)?;

        let remaining = count.saturating_sub(1);
        if remaining == 0 {
            tx.execute(
                r#"DELETE FROM tile WHERE map_level_id = ?1 AND "row" = ?2 AND "column" = ?3"#,
                params![map_level_id, tile.row, tile.column],
            )?;
        } else {
            tx.execute(
                r#"UPDATE tile SET offline_count = ?4
                   WHERE map_level_id = ?1 AND "row" = ?2 AND "column" = ?3"#,
                params![map_level_id, tile.row, tile.column, remaining],
            )?;
        }
        tx.commit()?;
        Ok(remaining)
    }

    /// Stored payload of a pinned tile, if any.
    pub fn get_tile_data(&self, tile: &OfflineTile) -> Result<Option<Bytes>, OfflineError> {
        let Some(map_level_id) = self.find_map_level_id(&tile.map_level)? else {
            return Ok(None);
        };
        let connection = self.connection()?;
        let data: Option<Option<Vec<u8>>> = connection
            .query_row(
                r#"SELECT data FROM tile
                   WHERE map_level_id = ?1 AND "row" = ?2 AND "column" = ?3"#,
                params![map_level_id, tile.row, tile.column],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.flatten().map(Bytes::from))
    }

    /// Store the payload of a tile if it is pinned.
    ///
    /// Returns `false`, and stores nothing, when the tile is not pinned.
    pub fn store_tile_data(&self, tile: &OfflineTile, data: &[u8]) -> Result<bool, OfflineError> {
        let Some(map_level_id) = self.find_map_level_id(&tile.map_level)? else {
            return Ok(false);
        };
        let connection = self.connection()?;
        let changed = connection.execute(
            r#"UPDATE tile SET data = ?4
               WHERE map_level_id = ?1 AND "row" = ?2 AND "column" = ?3"#,
            params![map_level_id, tile.row, tile.column, data],
        )?;
        Ok(changed > 0)
    }

    /// Number of pinned tiles of all map levels of a provider.
    pub fn tile_count_for_provider(&self, provider_id: i64) -> Result<u64, OfflineError> {
        let connection = self.connection()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM tile t JOIN map_level m ON m.map_level_id = t.map_level_id
             WHERE m.provider_id = ?1",
            params![provider_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    /// Counters over the whole store.
    pub fn stats(&self) -> Result<OfflineStats, OfflineError> {
        let connection = self.connection()?;
        let count = |sql: &str| -> Result<u64, rusqlite::Error> {
            connection
                .query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n.max(0) as u64)
        };
        Ok(OfflineStats {
            map_levels: count("SELECT COUNT(*) FROM map_level")?,
            regions: count("SELECT COUNT(*) FROM region")?,
            tiles: count("SELECT COUNT(*) FROM tile")?,
            tiles_with_data: count("SELECT COUNT(*) FROM tile WHERE data IS NOT NULL")?,
            data_bytes: count("SELECT COALESCE(SUM(LENGTH(data)), 0) FROM tile")?,
        })
    }
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

const PIN_SQL: &str = r#"INSERT INTO tile (map_level_id, "row", "column", offline_count)
VALUES (?1, ?2, ?3, 1)
ON CONFLICT (map_level_id, "row", "column") DO UPDATE SET offline_count = offline_count + 1"#;

fn select_map_level_id(
    connection: &Connection,
    map_level: &MapLevel,
) -> Result<Option<i64>, rusqlite::Error> {
    connection
        .query_row(
            "SELECT map_level_id FROM map_level
             WHERE provider_id = ?1 AND map_id = ?2 AND version = ?3 AND level = ?4",
            params![
                map_level.provider_id,
                map_level.map_id,
                map_level.version,
                map_level.level
            ],
            |row| row.get(0),
        )
        .optional()
}

fn select_region_id(connection: &Connection, name: &str) -> Result<Option<i64>, rusqlite::Error> {
    connection
        .query_row(
            "SELECT region_id FROM region WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()
}

fn select_offline_count(
    connection: &Connection,
    map_level_id: i64,
    tile: &OfflineTile,
) -> Result<Option<u32>, rusqlite::Error> {
    connection
        .query_row(
            r#"SELECT offline_count FROM tile
               WHERE map_level_id = ?1 AND "row" = ?2 AND "column" = ?3"#,
            params![map_level_id, tile.row, tile.column],
            |row| row.get(0),
        )
        .optional()
}
