//! Web Mercator (rendering) and WGS84 (interchange) coordinate transforms.
//!
//! Features live in the rendering projection (EPSG:3857, meters) while
//! they are on the client. The backend stores and returns geographic
//! degrees (EPSG:4326). Conversion happens only at the transport boundary.

use std::sync::LazyLock;

use geo::Coord;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis used by spherical Web Mercator.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Latitude at which Web Mercator becomes a square world.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Any coordinate magnitude above this cannot be a longitude in degrees.
const DEGREE_LIMIT: f64 = 180.0;

static FIRST_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?[0-9]+(?:\.[0-9]+)?(?:[eE][+-]?[0-9]+)?").expect("valid regex")
});

/// A coordinate reference system known to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Projection {
    /// Longitude/latitude degrees. The interchange projection.
    #[serde(rename = "EPSG:4326")]
    Geographic,
    /// Spherical Web Mercator meters. The rendering projection.
    #[serde(rename = "EPSG:3857")]
    Rendering,
}

impl std::fmt::Display for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Geographic => f.write_str("EPSG:4326"),
            Self::Rendering => f.write_str("EPSG:3857"),
        }
    }
}

/// How to decide the projection of incoming WKT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionHint {
    /// The wire contract states the projection.
    Explicit(Projection),
    /// Guess from coordinate magnitude (see [`detect_projection`]).
    #[default]
    Detect,
}

impl ProjectionHint {
    /// Resolves the hint against a concrete WKT string.
    #[must_use]
    pub fn resolve(self, wkt: &str) -> Projection {
        match self {
            Self::Explicit(projection) => projection,
            Self::Detect => detect_projection(wkt),
        }
    }
}

impl From<Option<Projection>> for ProjectionHint {
    fn from(value: Option<Projection>) -> Self {
        value.map_or(Self::Detect, Self::Explicit)
    }
}

/// Guesses the projection of a WKT string from its first numeric token.
///
/// A first coordinate whose absolute value exceeds 180 cannot be a
/// longitude, so the text is taken to be in the rendering projection
/// already. Anything else is treated as degrees. This is lossy: Mercator
/// coordinates within 180 m of the origin are misread as degrees.
#[must_use]
pub fn detect_projection(wkt: &str) -> Projection {
    let first = FIRST_NUMBER
        .find(wkt)
        .and_then(|m| m.as_str().parse::<f64>().ok());

    match first {
        Some(value) if value.abs() > DEGREE_LIMIT => Projection::Rendering,
        _ => Projection::Geographic,
    }
}

/// Projects a longitude/latitude coordinate into Web Mercator meters.
///
/// Latitudes are clamped to [`MAX_LATITUDE`] so the poles stay finite.
#[must_use]
pub fn to_rendering(coord: Coord<f64>) -> Coord<f64> {
    let lat = coord.y.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    Coord {
        x: EARTH_RADIUS * coord.x.to_radians(),
        y: EARTH_RADIUS * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

/// Unprojects Web Mercator meters into longitude/latitude degrees.
#[must_use]
pub fn to_geographic(coord: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (coord.x / EARTH_RADIUS).to_degrees(),
        y: (2.0f64.mul_add((coord.y / EARTH_RADIUS).exp().atan(), -std::f64::consts::FRAC_PI_2))
            .to_degrees(),
    }
}

/// Returns `true` if the coordinate is a plausible longitude/latitude.
#[must_use]
pub fn is_geographic(coord: Coord<f64>) -> bool {
    coord.x.is_finite()
        && coord.y.is_finite()
        && coord.x.abs() <= DEGREE_LIMIT
        && coord.y.abs() <= 90.0
}
