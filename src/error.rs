use thiserror::Error;

/// Errors raised by pyramid geometry (level lookup, coordinate to tile index).
///
/// These are programming errors: out-of-range values are always rejected,
/// never clamped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// Requested level is not in `[0, levels)`
    #[error("Level {level} out of range: pyramid has {levels} levels")]
    LevelOutOfRange { level: u32, levels: u32 },

    /// Tile index falls outside the mosaic of the level
    #[error("Out of region at level {level}: row {row}, column {column} not in [0, {mosaic_size})")]
    OutOfRegion {
        level: u32,
        row: i64,
        column: i64,
        mosaic_size: u32,
    },

    /// Pyramid parameters violate an invariant
    #[error("Invalid pyramid: {0}")]
    InvalidPyramid(String),
}

/// Errors raised by the reference-counted LRU cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// An entry with the same key is already resident
    #[error("Duplicate cache key: {0}")]
    DuplicateKey(String),

    /// Release of a key that is not resident
    #[error("Invariant violation: key {0} is not resident")]
    NotResident(String),

    /// Release of a key whose refcount is already zero
    #[error("Invariant violation: refcount underflow for key {0}")]
    RefcountUnderflow(String),
}

/// Errors raised while fetching a tile from a data provider.
///
/// Cloned to every caller joined on the same in-flight fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network or connection error
    #[error("Network error: {0}")]
    Network(String),

    /// The fetch did not complete in time
    #[error("Fetch timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },

    /// The server answered with a non-success status
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// The payload could not be decoded into a raster
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The provider has no data for this tile
    #[error("Tile not available: {0}")]
    NotAvailable(String),
}

/// Errors raised by the offline store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OfflineError {
    /// A region with this name already exists
    #[error("Region {0} already exists")]
    DuplicateName(String),

    /// No region with this name
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    /// A region must cover at least one tile
    #[error("Region {0} covers no tile")]
    EmptyRegion(String),

    /// A tile or run lies outside the mosaic of its level
    #[error("Tile {0} lies outside the mosaic")]
    OutOfRegion(String),

    /// Unpin of a tile that is not pinned
    #[error("Tile {0} is not pinned")]
    NotPinned(String),

    /// Store unavailable or transaction failure
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<rusqlite::Error> for OfflineError {
    fn from(err: rusqlite::Error) -> Self {
        OfflineError::Persistence(err.to_string())
    }
}

/// Errors on the tile acquisition path.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Geometry error while resolving a tile index
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Cache invariant violated
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Data provider failure
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Offline store failure
    #[error("Offline store error: {0}")]
    Offline(#[from] OfflineError),

    /// Release of a tile this pyramid never handed out
    #[error("Tile {key} was not acquired")]
    NotAcquired { key: String },

    /// An offline region belongs to another dataset than the provider
    #[error("Region {region} was pinned for {region_dataset}, provider serves {provider_dataset}")]
    DatasetMismatch {
        region: String,
        region_dataset: String,
        provider_dataset: String,
    },

    /// The operation needs an offline store and none is configured
    #[error("No offline store configured")]
    NoOfflineStore,
}

/// Configuration and licence loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is invalid
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The licence file could not be read
    #[error("Cannot read licence file {path}: {message}")]
    LicenceFile { path: String, message: String },

    /// The licence file has no entry with the requested name
    #[error("No licence named {0}")]
    UnknownLicence(String),
}
