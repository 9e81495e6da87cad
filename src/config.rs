//! Configuration management for the tile pyramid engine.
//!
//! Options come from command-line arguments via clap, with environment
//! variable fallbacks using the `TILE_PYRAMID_` prefix:
//!
//! - `TILE_PYRAMID_CACHE_BYTES` - LRU byte budget (default: 1 GiB)
//! - `TILE_PYRAMID_FETCH_TIMEOUT` - Fetch timeout in seconds (default: 30)
//! - `TILE_PYRAMID_OFFLINE_DB` - Offline store file (default: none, disabled)
//! - `TILE_PYRAMID_LICENCE` - Licence JSON file
//! - `TILE_PYRAMID_LICENCE_NAME` - Entry of the licence file (default: default)
//! - `TILE_PYRAMID_LAYER` - WMTS layer (default: GEOGRAPHICALGRIDSYSTEMS.MAPS)
//! - `TILE_PYRAMID_SERVER` - Service root (default: https://wxs.ign.fr)
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use tile_pyramid::config::Cli;
//!
//! let cli = Cli::parse();
//! cli.config.validate()?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::error::ConfigError;
use crate::geo::{GeoAngle, GeoCoordinate, TileIndex, TileRange};
use crate::provider::{Licence, WmtsLayer, DEFAULT_SERVER};

// =============================================================================
// Default Values
// =============================================================================

/// Default LRU byte budget (1 GiB of decoded tiles).
pub const DEFAULT_CACHE_BYTES: usize = 1 << 30;

/// Default fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Default licence entry.
pub const DEFAULT_LICENCE_NAME: &str = "default";

/// Default WMTS layer.
pub const DEFAULT_LAYER: &str = "GEOGRAPHICALGRIDSYSTEMS.MAPS";

/// Default half-width, in tiles, of the block fetched around a point.
pub const DEFAULT_RADIUS: u32 = 1;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Tile pyramid cache and acquisition engine.
///
/// Locates, fetches and pins Web Mercator map tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "tile-pyramid")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Byte budget of decoded tiles kept in memory.
    #[arg(long, global = true, default_value_t = DEFAULT_CACHE_BYTES, env = "TILE_PYRAMID_CACHE_BYTES")]
    pub cache_bytes: usize,

    /// Timeout of a single tile fetch, in seconds.
    #[arg(long, global = true, default_value_t = DEFAULT_FETCH_TIMEOUT_SECS, env = "TILE_PYRAMID_FETCH_TIMEOUT")]
    pub fetch_timeout: u64,

    /// Offline store file. Created if absent.
    ///
    /// If not specified, the offline store is disabled.
    #[arg(long, global = true, env = "TILE_PYRAMID_OFFLINE_DB")]
    pub offline_db: Option<PathBuf>,

    // =========================================================================
    // Provider Configuration
    // =========================================================================
    /// Licence JSON file mapping names to credentials.
    #[arg(long, global = true, env = "TILE_PYRAMID_LICENCE")]
    pub licence: Option<PathBuf>,

    /// Entry of the licence file to use.
    #[arg(long, global = true, default_value = DEFAULT_LICENCE_NAME, env = "TILE_PYRAMID_LICENCE_NAME")]
    pub licence_name: String,

    /// WMTS layer to request.
    #[arg(long, global = true, default_value = DEFAULT_LAYER, env = "TILE_PYRAMID_LAYER")]
    pub layer: WmtsLayer,

    /// Root URL of the tile service.
    #[arg(long, global = true, default_value = DEFAULT_SERVER, env = "TILE_PYRAMID_SERVER")]
    pub server: String,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_bytes == 0 {
            return Err(ConfigError::Invalid(
                "cache_bytes must be greater than 0".to_string(),
            ));
        }
        if self.fetch_timeout == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout must be greater than 0".to_string(),
            ));
        }
        if self.server.is_empty() {
            return Err(ConfigError::Invalid("server URL is required".to_string()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    /// Load the configured licence.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] if no licence file is configured.
    pub fn load_licence(&self) -> Result<Licence, ConfigError> {
        let path = self.licence.as_ref().ok_or_else(|| {
            ConfigError::Invalid(
                "a licence is required to reach the tile service. \
                 Set --licence or TILE_PYRAMID_LICENCE"
                    .to_string(),
            )
        })?;
        Licence::load_from_json(path, &self.licence_name)
    }

    /// Path of the offline store, required by region commands.
    pub fn require_offline_db(&self) -> Result<&PathBuf, ConfigError> {
        self.offline_db.as_ref().ok_or_else(|| {
            ConfigError::Invalid(
                "this command needs an offline store. \
                 Set --offline-db or TILE_PYRAMID_OFFLINE_DB"
                    .to_string(),
            )
        })
    }
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the level table of the pyramid.
    Levels,

    /// Print the tile containing a point.
    Locate(PointArgs),

    /// Fetch the block of tiles around a point through the cache.
    Fetch(BlockArgs),

    /// Manage offline regions.
    Region {
        #[command(subcommand)]
        command: RegionCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum RegionCommand {
    /// Pin the block of tiles around a point under a name.
    Add {
        /// Region name, unique in the store.
        name: String,

        #[command(flatten)]
        block: BlockArgs,
    },

    /// Delete a region and unpin its tiles.
    Remove { name: String },

    /// List regions and store statistics.
    List,

    /// Print the runs of a region.
    Show { name: String },

    /// Fetch and store every pinned tile of a region that has no data yet.
    Preload { name: String },
}

/// A point and a level.
#[derive(Args, Debug, Clone)]
pub struct PointArgs {
    /// Longitude, decimal degrees or d:m:s.
    #[arg(long, allow_hyphen_values = true)]
    pub longitude: GeoAngle,

    /// Latitude, decimal degrees or d:m:s.
    #[arg(long, allow_hyphen_values = true)]
    pub latitude: GeoAngle,

    /// Pyramid level.
    #[arg(long)]
    pub level: u32,
}

impl PointArgs {
    /// The point as a coordinate, rejecting latitudes the projection cannot map.
    pub fn coordinate(&self) -> Result<GeoCoordinate, ConfigError> {
        let latitude = self.latitude.decimal();
        if !(latitude.abs() < 90.0) {
            return Err(ConfigError::Invalid(format!(
                "latitude {} must lie strictly within (-90, 90)",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude.decimal()) {
            return Err(ConfigError::Invalid(format!(
                "longitude {} must lie within [-180, 180]",
                self.longitude.decimal()
            )));
        }
        Ok(GeoCoordinate::new(self.longitude, self.latitude))
    }
}

/// A square block of tiles centered on a point.
#[derive(Args, Debug, Clone)]
pub struct BlockArgs {
    #[command(flatten)]
    pub point: PointArgs,

    /// Half-width of the block in tiles; the block is (2N+1)².
    #[arg(long, default_value_t = DEFAULT_RADIUS)]
    pub radius: u32,
}

impl BlockArgs {
    /// The block around `center` in a mosaic of `mosaic_size` tiles per side.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] if the block reaches past an edge of the mosaic.
    pub fn range_around(
        &self,
        center: TileIndex,
        mosaic_size: u32,
    ) -> Result<TileRange, ConfigError> {
        let last = mosaic_size.saturating_sub(1);
        let fits = |value: u32| {
            value <= last && value >= self.radius && last - value >= self.radius
        };
        if !fits(center.row) || !fits(center.column) {
            return Err(ConfigError::Invalid(format!(
                "a radius of {} around row {} column {} leaves the {}x{} mosaic",
                self.radius, center.row, center.column, mosaic_size, mosaic_size
            )));
        }
        Ok(TileRange::from_corners(
            TileIndex::new(center.row - self.radius, center.column - self.radius),
            TileIndex::new(center.row + self.radius, center.column + self.radius),
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
