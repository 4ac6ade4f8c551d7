//! Lengths, areas and extents shown in feature details.

use geo::{GeodesicArea, LineString, Polygon, Rect};

use crate::FeatureGeometry;

/// A human-facing measurement of a feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// Path length in meters.
    Length {
        /// Meters.
        meters: f64,
    },
    /// Surface area in square meters.
    Area {
        /// Square meters.
        square_meters: f64,
    },
    /// Circle radius and enclosed area.
    Circle {
        /// Radius in meters.
        radius_m: f64,
        /// Square meters.
        square_meters: f64,
    },
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Length { meters } => write!(f, "Length: {meters:.2} m"),
            Self::Area { square_meters } => {
                write!(f, "Area: {:.4} km²", square_meters / 1e6)
            }
            Self::Circle {
                radius_m,
                square_meters,
            } => write!(
                f,
                "Radius: {radius_m:.2} m, Area: {:.4} km²",
                square_meters / 1e6
            ),
        }
    }
}

/// Area of a polygon given in geographic degrees, in square meters on the
/// WGS84 ellipsoid.
#[must_use]
pub fn geodesic_area_sq_m(geographic: &Polygon<f64>) -> f64 {
    geographic.geodesic_area_unsigned()
}

/// Planar length of a path in rendering-projection meters.
#[must_use]
pub fn planar_length_m(line: &LineString<f64>) -> f64 {
    line.lines().map(|l| l.dx().hypot(l.dy())).sum()
}

/// Measures a feature for display. Points have no measurement.
#[must_use]
pub fn measure(geometry: &FeatureGeometry) -> Option<Measurement> {
    match geometry {
        FeatureGeometry::Point(_) => None,
        FeatureGeometry::LineString(line) => Some(Measurement::Length {
            meters: planar_length_m(line),
        }),
        FeatureGeometry::Polygon(_) => {
            let geographic = geometry.to_geographic();
            match geographic {
                FeatureGeometry::Polygon(poly) => Some(Measurement::Area {
                    square_meters: geodesic_area_sq_m(&poly),
                }),
                _ => None,
            }
        }
        FeatureGeometry::Circle { radius, .. } => Some(Measurement::Circle {
            radius_m: *radius,
            square_meters: std::f64::consts::PI * radius * radius,
        }),
    }
}

/// Bounding box of a set of geometries, in their own projection.
#[must_use]
pub fn extent<'a>(geometries: impl IntoIterator<Item = &'a FeatureGeometry>) -> Option<Rect<f64>> {
    geometries
        .into_iter()
        .filter_map(FeatureGeometry::bounding_rect)
        .reduce(|a, b| {
            Rect::new(
                geo::Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                geo::Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        })
}
