//! Geodetic math: WGS84 geographic coordinates and Web Mercator (EPSG:3857).
//!
//! Everything here is a pure function over plain values.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::fmt;
use std::str::FromStr;

/// Equatorial radius (half major axis) of the WGS84 ellipsoid, in meters.
pub const EQUATORIAL_RADIUS: f64 = 6_378_137.0;

/// Half the extent of the Web Mercator plane, `PI * R`, in meters.
pub const WEB_MERCATOR_HALF_EXTENT: f64 = PI * EQUATORIAL_RADIUS;

// =============================================================================
// Angles
// =============================================================================

/// Angle split into degrees, minutes and seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sexagesimal {
    pub negative: bool,
    pub degrees: u32,
    pub minutes: u32,
    pub seconds: f64,
}

/// An angle in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct GeoAngle(f64);

impl GeoAngle {
    /// Build an angle from decimal degrees.
    pub fn from_decimal(degrees: f64) -> Self {
        Self(degrees)
    }

    /// Build an angle from degrees, minutes and seconds.
    ///
    /// The sign of `degrees` applies to the whole angle.
    pub fn from_sexagesimal(degrees: i32, minutes: u32, seconds: f64) -> Self {
        let magnitude = degrees.unsigned_abs() as f64 + (minutes as f64 + seconds / 60.0) / 60.0;
        if degrees < 0 {
            Self(-magnitude)
        } else {
            Self(magnitude)
        }
    }

    /// Angle in decimal degrees.
    pub fn decimal(&self) -> f64 {
        self.0
    }

    /// Angle in radians.
    pub fn radians(&self) -> f64 {
        self.0.to_radians()
    }

    /// Split the angle into degrees, minutes and seconds.
    pub fn sexagesimal(&self) -> Sexagesimal {
        let magnitude = self.0.abs();
        let degrees = magnitude.trunc();
        let minutes = ((magnitude - degrees) * 60.0).trunc();
        let seconds = ((magnitude - degrees) * 60.0 - minutes) * 60.0;
        Sexagesimal {
            negative: self.0 < 0.0,
            degrees: degrees as u32,
            minutes: minutes as u32,
            seconds,
        }
    }
}

impl fmt::Display for GeoAngle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.sexagesimal();
        let sign = if s.negative { "-" } else { "" };
        write!(f, "{}{}°{:02}'{:05.2}\"", sign, s.degrees, s.minutes, s.seconds)
    }
}

/// Parses either decimal degrees (`6.1167`) or `d:m:s` (`6:7:0`, `-44:41`).
impl FromStr for GeoAngle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.contains(':') {
            return s
                .parse::<f64>()
                .map(GeoAngle::from_decimal)
                .map_err(|e| format!("invalid angle '{}': {}", s, e));
        }

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() > 3 {
            return Err(format!("invalid angle '{}': expected d:m:s", s));
        }
        let negative = parts[0].starts_with('-');
        let degrees: i32 = parts[0]
            .parse()
            .map_err(|_| format!("invalid degrees in '{}'", s))?;
        let minutes: u32 = match parts.get(1) {
            Some(m) => m.parse().map_err(|_| format!("invalid minutes in '{}'", s))?,
            None => 0,
        };
        let seconds: f64 = match parts.get(2) {
            Some(sec) => sec.parse().map_err(|_| format!("invalid seconds in '{}'", s))?,
            None => 0.0,
        };
        if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
            return Err(format!("invalid angle '{}': minutes and seconds must be < 60", s));
        }

        let angle = GeoAngle::from_sexagesimal(degrees.abs(), minutes, seconds);
        Ok(if negative { GeoAngle(-angle.0) } else { angle })
    }
}

// =============================================================================
// Coordinates
// =============================================================================

/// A point of the Web Mercator plane, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
}

impl ProjectedPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A WGS84 geographic coordinate (EPSG:4326).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    pub longitude: GeoAngle,
    pub latitude: GeoAngle,
}

impl GeoCoordinate {
    pub fn new(longitude: GeoAngle, latitude: GeoAngle) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Build a coordinate from decimal degrees.
    pub fn from_degrees(longitude: f64, latitude: f64) -> Self {
        Self::new(GeoAngle::from_decimal(longitude), GeoAngle::from_decimal(latitude))
    }

    /// Web Mercator forward transform (EPSG:3857).
    ///
    /// # Preconditions
    ///
    /// The latitude must lie strictly within (-90°, 90°): the transform is
    /// singular at the poles and yields an infinite `y` there.
    pub fn to_projected(&self) -> ProjectedPoint {
        debug_assert!(
            self.latitude.decimal().abs() < 90.0,
            "latitude must be within (-90, 90)"
        );
        let x = EQUATORIAL_RADIUS * self.longitude.radians();
        let y = EQUATORIAL_RADIUS * (self.latitude.radians() / 2.0 + FRAC_PI_4).tan().ln();
        ProjectedPoint { x, y }
    }

    /// Web Mercator inverse transform.
    pub fn from_projected(point: ProjectedPoint) -> Self {
        let longitude = (point.x / EQUATORIAL_RADIUS).to_degrees();
        let latitude = (2.0 * (point.y / EQUATORIAL_RADIUS).exp().atan() - FRAC_PI_2).to_degrees();
        Self::from_degrees(longitude, latitude)
    }
}
