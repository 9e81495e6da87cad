//! Geographic layer: projection math and pyramid geometry.
//!
//! ```text
//! GeoCoordinate ──to_projected──▶ ProjectedPoint ──PyramidLevel──▶ TileIndex
//!   (lon, lat)      Web Mercator     (x, y) meters    offset, flip    (row, column)
//! ```

mod projection;
mod pyramid;

pub use projection::{
    GeoAngle, GeoCoordinate, ProjectedPoint, Sexagesimal, EQUATORIAL_RADIUS,
    WEB_MERCATOR_HALF_EXTENT,
};
pub use pyramid::{
    ProjectedInterval, Pyramid, PyramidLevel, TileIndex, TileRange, DEFAULT_TILE_SIZE, MAX_LEVELS,
};
