//! Pyramid geometry: per-level resolution and projected-plane to tile-index
//! conversion.
//!
//! # Pyramid-local plane
//!
//! Tile indices are computed in a plane anchored at the pyramid offset, with
//! the y axis flipped so that rows grow southwards:
//!
//! ```text
//! x_local = x_mercator - offset.x
//! y_local = offset.y - y_mercator
//! column  = floor(x_local / tile_length)
//! row     = floor(y_local / tile_length)
//! ```
//!
//! Because of the flip, the south-west corner of a projected interval maps to
//! the *largest* row. Range conversions therefore compute both corners and take
//! element-wise min/max instead of pairing inf with inf.

use std::fmt;

use crate::error::GeometryError;

use super::projection::{GeoCoordinate, ProjectedPoint, WEB_MERCATOR_HALF_EXTENT};

/// Default tile size in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Highest supported level count; `2^31` tiles per axis still fits a `u32`.
pub const MAX_LEVELS: u32 = 32;

// =============================================================================
// Tile indices
// =============================================================================

/// Position of a tile in the mosaic of one level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIndex {
    pub row: u32,
    pub column: u32,
}

impl TileIndex {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// Inclusive rectangle of tile indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRange {
    pub row_inf: u32,
    pub row_sup: u32,
    pub column_inf: u32,
    pub column_sup: u32,
}

impl TileRange {
    /// Build a range from two opposite corners, in any order.
    pub fn from_corners(a: TileIndex, b: TileIndex) -> Self {
        Self {
            row_inf: a.row.min(b.row),
            row_sup: a.row.max(b.row),
            column_inf: a.column.min(b.column),
            column_sup: a.column.max(b.column),
        }
    }

    pub fn rows(&self) -> u32 {
        self.row_sup - self.row_inf + 1
    }

    pub fn columns(&self) -> u32 {
        self.column_sup - self.column_inf + 1
    }

    /// Number of tiles covered by the range.
    pub fn len(&self) -> u64 {
        self.rows() as u64 * self.columns() as u64
    }

    /// A range always covers at least one tile.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, index: TileIndex) -> bool {
        (self.row_inf..=self.row_sup).contains(&index.row)
            && (self.column_inf..=self.column_sup).contains(&index.column)
    }

    /// Iterate the covered tiles in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = TileIndex> + '_ {
        (self.row_inf..=self.row_sup).flat_map(move |row| {
            (self.column_inf..=self.column_sup).map(move |column| TileIndex { row, column })
        })
    }
}

/// Axis-aligned rectangle of the Web Mercator plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedInterval {
    pub inf: ProjectedPoint,
    pub sup: ProjectedPoint,
}

impl ProjectedInterval {
    /// Build an interval from two opposite corners, in any order.
    pub fn from_corners(a: ProjectedPoint, b: ProjectedPoint) -> Self {
        Self {
            inf: ProjectedPoint::new(a.x.min(b.x), a.y.min(b.y)),
            sup: ProjectedPoint::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Square interval of half-side `radius` centred on `center`.
    pub fn around(center: ProjectedPoint, radius: f64) -> Self {
        Self::from_corners(
            ProjectedPoint::new(center.x - radius, center.y - radius),
            ProjectedPoint::new(center.x + radius, center.y + radius),
        )
    }

    pub fn width(&self) -> f64 {
        self.sup.x - self.inf.x
    }

    pub fn height(&self) -> f64 {
        self.sup.y - self.inf.y
    }

    /// Closed containment test.
    pub fn contains(&self, point: ProjectedPoint) -> bool {
        (self.inf.x..=self.sup.x).contains(&point.x) && (self.inf.y..=self.sup.y).contains(&point.y)
    }
}

// =============================================================================
// Pyramid
// =============================================================================

/// Tiling parameters of one data provider.
///
/// Immutable once built; level descriptors are derived up front.
#[derive(Debug, Clone, PartialEq)]
pub struct Pyramid {
    tile_size: u32,
    root_resolution: f64,
    offset: ProjectedPoint,
    levels: Vec<PyramidLevel>,
}

impl Pyramid {
    /// Create a pyramid.
    ///
    /// # Arguments
    /// * `tile_size` - Tile edge in pixels, at least 1
    /// * `number_of_levels` - Number of levels, in `[1, MAX_LEVELS]`
    /// * `root_resolution` - Meters per pixel at level 0
    /// * `offset` - Origin of the pyramid-local plane, in Mercator meters
    pub fn new(
        tile_size: u32,
        number_of_levels: u32,
        root_resolution: f64,
        offset: ProjectedPoint,
    ) -> Result<Self, GeometryError> {
        if tile_size == 0 {
            return Err(GeometryError::InvalidPyramid(
                "tile size must be at least 1 pixel".to_string(),
            ));
        }
        if number_of_levels == 0 || number_of_levels > MAX_LEVELS {
            return Err(GeometryError::InvalidPyramid(format!(
                "number of levels must be in [1, {}], got {}",
                MAX_LEVELS, number_of_levels
            )));
        }
        if !(root_resolution.is_finite() && root_resolution > 0.0) {
            return Err(GeometryError::InvalidPyramid(format!(
                "root resolution must be positive, got {}",
                root_resolution
            )));
        }

        let levels = (0..number_of_levels)
            .map(|level| PyramidLevel::new(level, tile_size, root_resolution, offset))
            .collect();

        Ok(Self {
            tile_size,
            root_resolution,
            offset,
            levels,
        })
    }

    /// Standard Web Mercator pyramid: level 0 is one tile covering the world,
    /// the plane origin is the north-west corner.
    pub fn web_mercator(tile_size: u32, number_of_levels: u32) -> Result<Self, GeometryError> {
        let root_resolution = 2.0 * WEB_MERCATOR_HALF_EXTENT / tile_size.max(1) as f64;
        Self::new(
            tile_size,
            number_of_levels,
            root_resolution,
            ProjectedPoint::new(-WEB_MERCATOR_HALF_EXTENT, WEB_MERCATOR_HALF_EXTENT),
        )
    }

    /// Get the descriptor of a level.
    pub fn level(&self, level: u32) -> Result<&PyramidLevel, GeometryError> {
        self.levels
            .get(level as usize)
            .ok_or(GeometryError::LevelOutOfRange {
                level,
                levels: self.number_of_levels(),
            })
    }

    /// All levels, from the coarsest (0) to the finest.
    pub fn levels(&self) -> impl Iterator<Item = &PyramidLevel> {
        self.levels.iter()
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn number_of_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn root_resolution(&self) -> f64 {
        self.root_resolution
    }

    pub fn offset(&self) -> ProjectedPoint {
        self.offset
    }
}

// =============================================================================
// Pyramid Level
// =============================================================================

/// Geometry of one zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PyramidLevel {
    level: u32,
    tile_size: u32,
    mosaic_size: u32,
    resolution: f64,
    offset: ProjectedPoint,
}

impl PyramidLevel {
    fn new(level: u32, tile_size: u32, root_resolution: f64, offset: ProjectedPoint) -> Self {
        let mosaic_size = 1u64 << level;
        Self {
            level,
            tile_size,
            mosaic_size: mosaic_size as u32,
            resolution: root_resolution / mosaic_size as f64,
            offset,
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Number of tiles per axis, `2^level`.
    pub fn mosaic_size(&self) -> u32 {
        self.mosaic_size
    }

    /// Meters per pixel.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Tile edge in projected meters.
    pub fn tile_length(&self) -> f64 {
        self.tile_size as f64 * self.resolution
    }

    /// Convert a Mercator point into the pyramid-local plane.
    pub fn to_local(&self, point: ProjectedPoint) -> ProjectedPoint {
        ProjectedPoint::new(point.x - self.offset.x, self.offset.y - point.y)
    }

    /// Convert a Mercator point into the index of the tile containing it.
    pub fn projected_to_tile_index(
        &self,
        point: ProjectedPoint,
    ) -> Result<TileIndex, GeometryError> {
        let local = self.to_local(point);
        let length = self.tile_length();
        let column = (local.x / length).floor();
        let row = (local.y / length).floor();

        let mosaic = self.mosaic_size as f64;
        if !(0.0..mosaic).contains(&row) || !(0.0..mosaic).contains(&column) {
            return Err(GeometryError::OutOfRegion {
                level: self.level,
                row: saturate(row),
                column: saturate(column),
                mosaic_size: self.mosaic_size,
            });
        }

        Ok(TileIndex {
            row: row as u32,
            column: column as u32,
        })
    }

    /// Convert a geographic coordinate into the index of the tile containing it.
    pub fn coordinate_to_tile_index(
        &self,
        coordinate: &GeoCoordinate,
    ) -> Result<TileIndex, GeometryError> {
        self.projected_to_tile_index(coordinate.to_projected())
    }

    /// Convert a projected interval into the range of tiles it overlaps.
    ///
    /// Both corners are converted independently and the result is normalized,
    /// so the y-axis flip of the local plane cannot invert the range.
    pub fn interval_to_tile_range(
        &self,
        interval: &ProjectedInterval,
    ) -> Result<TileRange, GeometryError> {
        let a = self.projected_to_tile_index(interval.inf)?;
        let b = self.projected_to_tile_index(interval.sup)?;
        Ok(TileRange::from_corners(a, b))
    }

    /// Convert a longitude/latitude box into the range of tiles it overlaps.
    pub fn geo_interval_to_tile_range(
        &self,
        corner_a: &GeoCoordinate,
        corner_b: &GeoCoordinate,
    ) -> Result<TileRange, GeometryError> {
        let interval =
            ProjectedInterval::from_corners(corner_a.to_projected(), corner_b.to_projected());
        self.interval_to_tile_range(&interval)
    }

    /// Origin of a tile in the pyramid-local plane.
    pub fn tile_origin(&self, index: TileIndex) -> ProjectedPoint {
        let length = self.tile_length();
        ProjectedPoint::new(index.column as f64 * length, index.row as f64 * length)
    }

    /// Mercator footprint of a tile.
    pub fn tile_rect(&self, index: TileIndex) -> ProjectedInterval {
        let length = self.tile_length();
        let x_inf = self.offset.x + index.column as f64 * length;
        let y_sup = self.offset.y - index.row as f64 * length;
        ProjectedInterval {
            inf: ProjectedPoint::new(x_inf, y_sup - length),
            sup: ProjectedPoint::new(x_inf + length, y_sup),
        }
    }
}

fn saturate(value: f64) -> i64 {
    if value.is_nan() {
        i64::MIN
    } else {
        value as i64
    }
}
