//! WMTS provider for the Géoportail tile service.
//!
//! Tiles are requested with a templated GET:
//!
//! ```text
//! {server}/{api_key}/geoportail/wmts?SERVICE=WMTS&VERSION=1.0.0&REQUEST=GetTile
//!     &LAYER={layer}&STYLE=normal&FORMAT=image/jpeg&TILEMATRIXSET=PM
//!     &TILEMATRIX={level}&TILEROW={row}&TILECOL={column}
//! ```
//!
//! authenticated with the licence user and password.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{Dataset, RawPayload, TileProvider};
use crate::error::{ConfigError, FetchError, GeometryError, TileError};
use crate::geo::{Pyramid, DEFAULT_TILE_SIZE};

/// Default service root.
pub const DEFAULT_SERVER: &str = "https://wxs.ign.fr";

/// Provider id of the Géoportail service in the offline store.
pub const GEOPORTAIL_PROVIDER_ID: i64 = 1;

/// Number of levels of the `PM` tile matrix set.
pub const GEOPORTAIL_LEVELS: u32 = 22;

const DATASET_VERSION: i64 = 1;

const DEFAULT_OFFLINE_CACHE_LIMIT: u64 = 1000;

// =============================================================================
// Licence
// =============================================================================

/// Credentials for the tile service.
#[derive(Clone, Deserialize)]
pub struct Licence {
    pub user: String,
    pub password: String,
    pub api_key: String,
    /// Maximum number of tiles the licence allows to keep offline
    #[serde(default = "default_offline_cache_limit")]
    pub offline_cache_limit: u64,
}

fn default_offline_cache_limit() -> u64 {
    DEFAULT_OFFLINE_CACHE_LIMIT
}

impl Licence {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            api_key: api_key.into(),
            offline_cache_limit: DEFAULT_OFFLINE_CACHE_LIMIT,
        }
    }

    /// Load the licence called `name` from a JSON file mapping names to licences.
    ///
    /// ```json
    /// { "default": { "user": "...", "password": "...", "api_key": "..." } }
    /// ```
    pub fn load_from_json(path: &Path, name: &str) -> Result<Self, ConfigError> {
        let file_error = |message: String| ConfigError::LicenceFile {
            path: path.display().to_string(),
            message,
        };

        let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let mut licences: HashMap<String, Licence> =
            serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))?;

        licences
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownLicence(name.to_string()))
    }
}

impl fmt::Debug for Licence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Licence")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("offline_cache_limit", &self.offline_cache_limit)
            .finish()
    }
}

// =============================================================================
// Layers
// =============================================================================

/// Layers served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WmtsLayer {
    /// Scanned topographic maps
    Maps,
    /// Aerial photography
    OrthoPhotos,
}

impl WmtsLayer {
    /// WMTS layer identifier.
    pub fn identifier(&self) -> &'static str {
        match self {
            WmtsLayer::Maps => "GEOGRAPHICALGRIDSYSTEMS.MAPS",
            WmtsLayer::OrthoPhotos => "ORTHOIMAGERY.ORTHOPHOTOS",
        }
    }

    /// Map id of the layer in the offline store.
    pub fn map_id(&self) -> i64 {
        match self {
            WmtsLayer::Maps => 1,
            WmtsLayer::OrthoPhotos => 2,
        }
    }

    /// Dataset identity of the layer, as pinned in the offline store.
    pub fn dataset(&self) -> Dataset {
        Dataset::new(GEOPORTAIL_PROVIDER_ID, self.map_id(), DATASET_VERSION)
    }
}

/// Pyramid of the `PM` tile matrix set.
pub fn geoportail_pyramid() -> Result<Pyramid, GeometryError> {
    Pyramid::web_mercator(DEFAULT_TILE_SIZE, GEOPORTAIL_LEVELS)
}

impl fmt::Display for WmtsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for WmtsLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GEOGRAPHICALGRIDSYSTEMS.MAPS" | "maps" => Ok(WmtsLayer::Maps),
            "ORTHOIMAGERY.ORTHOPHOTOS" | "orthophotos" => Ok(WmtsLayer::OrthoPhotos),
            other => Err(format!("unknown layer: {}", other)),
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Tile provider backed by the WMTS endpoint.
pub struct WmtsProvider {
    client: reqwest::Client,
    endpoint: Url,
    licence: Licence,
    layer: WmtsLayer,
    pyramid: Pyramid,
    timeout: Duration,
}

impl WmtsProvider {
    /// Create a provider for `layer` on `server`.
    ///
    /// # Arguments
    ///
    /// * `server` - Service root, e.g. [`DEFAULT_SERVER`]
    /// * `licence` - Credentials; the API key becomes part of the endpoint path
    /// * `layer` - Layer to request
    /// * `timeout` - Per-request timeout
    pub fn new(
        server: &str,
        licence: Licence,
        layer: WmtsLayer,
        timeout: Duration,
    ) -> Result<Self, TileError> {
        let endpoint = format!(
            "{}/{}/geoportail/wmts",
            server.trim_end_matches('/'),
            licence.api_key
        );
        let endpoint = Url::parse(&endpoint)
            .map_err(|e| FetchError::Network(format!("invalid server URL {}: {}", server, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            licence,
            layer,
            pyramid: geoportail_pyramid()?,
            timeout,
        })
    }

    pub fn layer(&self) -> WmtsLayer {
        self.layer
    }

    /// URL of the GetTile request for one tile.
    pub fn tile_url(&self, level: u32, row: u32, column: u32) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("SERVICE", "WMTS")
            .append_pair("VERSION", "1.0.0")
            .append_pair("REQUEST", "GetTile")
            .append_pair("LAYER", self.layer.identifier())
            .append_pair("STYLE", "normal")
            .append_pair("FORMAT", "image/jpeg")
            .append_pair("TILEMATRIXSET", "PM")
            .append_pair("TILEMATRIX", &level.to_string())
            .append_pair("TILEROW", &row.to_string())
            .append_pair("TILECOL", &column.to_string());
        url
    }

    fn map_request_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout {
                after_ms: self.timeout.as_millis() as u64,
            }
        } else {
            FetchError::Network(err.without_url().to_string())
        }
    }
}

#[async_trait]
impl TileProvider for WmtsProvider {
    fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    fn dataset(&self) -> Dataset {
        self.layer.dataset()
    }

    async fn get_tile(&self, level: u32, row: u32, column: u32) -> Result<RawPayload, FetchError> {
        let url = self.tile_url(level, row, column);
        debug!(
            layer = self.layer.identifier(),
            level,
            row,
            column,
            query = url.query().unwrap_or_default(),
            "GET tile"
        );

        let response = self
            .client
            .get(url)
            .basic_auth(&self.licence.user, Some(&self.licence.password))
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| self.map_request_error(e))
    }
}
