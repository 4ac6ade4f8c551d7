#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature geometry and the interchange boundary.
//!
//! [`FeatureGeometry`] is what the client holds: coordinates in the
//! rendering projection (Web Mercator). The backend speaks WKT in
//! geographic degrees. [`FeatureGeometry::to_interchange`] and
//! [`FeatureGeometry::from_interchange`] are the only crossings between
//! the two.

pub mod circle;
pub mod codec;
pub mod dedup;
pub mod measure;
pub mod projection;

use citymap_geometry_models::GeometryKind;
use geo::{BoundingRect, Coord, Geometry, InteriorPoint, LineString, MapCoords, Point, Polygon, Rect};

pub use dedup::{CoordKey, coord_key};
pub use projection::{Projection, ProjectionHint};

/// Errors from parsing, writing or transforming geometries.
#[derive(Debug, thiserror::Error)]
pub enum GeometryError {
    /// The WKT text could not be parsed.
    #[error("WKT parse error: {message}")]
    Parse {
        /// Parser diagnostic.
        message: String,
    },

    /// The geometry type has no client representation.
    #[error("Unsupported geometry type: {kind}")]
    Unsupported {
        /// WKT type name.
        kind: String,
    },

    /// A coordinate is not a valid longitude/latitude.
    #[error("Coordinate out of range: ({x}, {y})")]
    OutOfRange {
        /// First ordinate.
        x: f64,
        /// Second ordinate.
        y: f64,
    },

    /// The geometry has no coordinates.
    #[error("Empty geometry")]
    Empty,
}

/// A feature's geometry in the rendering projection.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    /// A single location.
    Point(Point<f64>),
    /// An open path.
    LineString(LineString<f64>),
    /// A closed area.
    Polygon(Polygon<f64>),
    /// A circle drawn on the map. Radius is in rendering-projection meters.
    Circle {
        /// Center.
        center: Coord<f64>,
        /// Radius.
        radius: f64,
    },
}

impl FeatureGeometry {
    /// The kind tag of this geometry.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        match self {
            Self::Point(_) => GeometryKind::Point,
            Self::LineString(_) => GeometryKind::LineString,
            Self::Polygon(_) => GeometryKind::Polygon,
            Self::Circle { .. } => GeometryKind::Circle,
        }
    }

    /// Replaces circles with their [`circle::CIRCLE_SIDES`]-gon; other
    /// geometries are returned unchanged.
    #[must_use]
    pub fn normalized(&self) -> Self {
        match self {
            Self::Circle { center, radius } => Self::Polygon(circle::circle_to_polygon(
                *center,
                *radius,
                circle::CIRCLE_SIDES,
            )),
            other => other.clone(),
        }
    }

    /// Returns the normalized geometry reprojected into geographic degrees.
    ///
    /// Every ring coordinate goes through [`projection::to_geographic`]
    /// individually.
    #[must_use]
    pub fn to_geographic(&self) -> Self {
        match self.normalized() {
            Self::Point(p) => Self::Point(p.map_coords(projection::to_geographic)),
            Self::LineString(l) => Self::LineString(l.map_coords(projection::to_geographic)),
            Self::Polygon(p) => Self::Polygon(p.map_coords(projection::to_geographic)),
            Self::Circle { .. } => unreachable!("circles are normalized to polygons"),
        }
    }

    /// Serializes the geometry as interchange WKT (geographic degrees,
    /// fixed precision).
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::Empty`] for geometries without coordinates.
    pub fn to_interchange(&self) -> Result<String, GeometryError> {
        codec::write_wkt(&self.to_geographic().into_geo())
    }

    /// Parses WKT from the backend into the rendering projection.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the text does not parse, holds an
    /// unsupported geometry type, or holds degrees outside the valid range.
    pub fn from_interchange(wkt: &str, hint: ProjectionHint) -> Result<Self, GeometryError> {
        let parsed = codec::parse_wkt(wkt)?;
        let source = hint.resolve(wkt);
        let geometry = Self::try_from_geo(parsed)?;

        match source {
            Projection::Rendering => Ok(geometry),
            Projection::Geographic => {
                if let Some(bad) = geometry.coords().find(|c| !projection::is_geographic(*c)) {
                    return Err(GeometryError::OutOfRange { x: bad.x, y: bad.y });
                }
                Ok(geometry.map_all(projection::to_rendering))
            }
        }
    }

    /// The coordinate of the point itself, a polygon's interior point, a
    /// path's first vertex, or a circle's center. Used to anchor popups.
    #[must_use]
    pub fn anchor(&self) -> Option<Coord<f64>> {
        match self {
            Self::Point(p) => Some(p.0),
            Self::LineString(l) => l.0.first().copied(),
            Self::Polygon(p) => p.interior_point().map(|p| p.0),
            Self::Circle { center, .. } => Some(*center),
        }
    }

    /// Bounding box in the rendering projection.
    #[must_use]
    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        match self {
            Self::Point(p) => Some(p.bounding_rect()),
            Self::LineString(l) => l.bounding_rect(),
            Self::Polygon(p) => p.bounding_rect(),
            Self::Circle { center, radius } => Some(Rect::new(
                Coord {
                    x: center.x - radius,
                    y: center.y - radius,
                },
                Coord {
                    x: center.x + radius,
                    y: center.y + radius,
                },
            )),
        }
    }

    /// For points, the dedup key of the geographic position.
    #[must_use]
    pub fn point_key(&self) -> Option<CoordKey> {
        match self {
            Self::Point(p) => Some(coord_key(projection::to_geographic(p.0))),
            _ => None,
        }
    }

    fn try_from_geo(geometry: Geometry<f64>) -> Result<Self, GeometryError> {
        match geometry {
            Geometry::Point(p) => Ok(Self::Point(p)),
            Geometry::LineString(l) if l.0.is_empty() => Err(GeometryError::Empty),
            Geometry::LineString(l) => Ok(Self::LineString(l)),
            Geometry::Polygon(p) if p.exterior().0.is_empty() => Err(GeometryError::Empty),
            Geometry::Polygon(p) => Ok(Self::Polygon(p)),
            other => Err(GeometryError::Unsupported {
                kind: codec::geometry_type_name(&other).to_string(),
            }),
        }
    }

    fn into_geo(self) -> Geometry<f64> {
        match self.normalized() {
            Self::Point(p) => Geometry::Point(p),
            Self::LineString(l) => Geometry::LineString(l),
            Self::Polygon(p) => Geometry::Polygon(p),
            Self::Circle { .. } => unreachable!("circles are normalized to polygons"),
        }
    }

    fn coords(&self) -> Box<dyn Iterator<Item = Coord<f64>> + '_> {
        match self {
            Self::Point(p) => Box::new(std::iter::once(p.0)),
            Self::LineString(l) => Box::new(l.coords().copied()),
            Self::Polygon(p) => Box::new(
                p.exterior()
                    .coords()
                    .chain(p.interiors().iter().flat_map(LineString::coords))
                    .copied(),
            ),
            Self::Circle { center, .. } => Box::new(std::iter::once(*center)),
        }
    }

    fn map_all(self, f: fn(Coord<f64>) -> Coord<f64>) -> Self {
        match self {
            Self::Point(p) => Self::Point(p.map_coords(f)),
            Self::LineString(l) => Self::LineString(l.map_coords(f)),
            Self::Polygon(p) => Self::Polygon(p.map_coords(f)),
            Self::Circle { center, radius } => Self::Circle {
                center: f(center),
                radius,
            },
        }
    }
}
