//! WKT reading and fixed-precision writing.
//!
//! Both directions go through the `wkt` crate. Coordinates are rounded
//! before writing so every coordinate leaves the client at the same
//! precision the dedup keys use.

use geo::{Coord, Geometry, MapCoords};
use wkt::{ToWkt, TryFromWkt};

use crate::GeometryError;

/// Decimal places written for interchange coordinates.
pub const WKT_DECIMALS: i32 = 6;

/// Parses WKT text into a [`Geometry`].
///
/// # Errors
///
/// Returns [`GeometryError::Parse`] if the text is not valid WKT and
/// [`GeometryError::Empty`] for blank input.
pub fn parse_wkt(text: &str) -> Result<Geometry<f64>, GeometryError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(GeometryError::Empty);
    }

    Geometry::<f64>::try_from_wkt_str(text).map_err(|e| GeometryError::Parse {
        message: format!("{e} (input: {})", preview(text)),
    })
}

/// Writes a `Point`, `LineString` or `Polygon` as WKT with every
/// ordinate rounded to [`WKT_DECIMALS`] places.
///
/// # Errors
///
/// Returns [`GeometryError::Unsupported`] for other geometry types and
/// [`GeometryError::Empty`] for geometries without coordinates.
pub fn write_wkt(geometry: &Geometry<f64>) -> Result<String, GeometryError> {
    match geometry {
        Geometry::Point(_) => {}
        Geometry::LineString(line) if line.0.is_empty() => return Err(GeometryError::Empty),
        Geometry::Polygon(polygon) if polygon.exterior().0.is_empty() => {
            return Err(GeometryError::Empty);
        }
        Geometry::LineString(_) | Geometry::Polygon(_) => {}
        other => {
            return Err(GeometryError::Unsupported {
                kind: geometry_type_name(other).to_string(),
            });
        }
    }

    let rounded = geometry.map_coords(|Coord { x, y }| Coord {
        x: round_ordinate(x),
        y: round_ordinate(y),
    });
    Ok(rounded.wkt_string())
}

/// Rounds one ordinate to [`WKT_DECIMALS`] places. Negative zero is
/// folded into zero so it prints without a sign.
#[must_use]
pub fn round_ordinate(value: f64) -> f64 {
    let scale = 10_f64.powi(WKT_DECIMALS);
    (value * scale).round() / scale + 0.0
}

/// The WKT tag of a geometry, for error messages.
#[must_use]
pub const fn geometry_type_name(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Point, polygon};

    #[test]
    fn parses_point_and_polygon() {
        let point = parse_wkt("POINT(29.105 40.985)").unwrap();
        assert!(matches!(point, Geometry::Point(p) if (p.x() - 29.105).abs() < 1e-12));

        let poly = parse_wkt(
            "POLYGON((29.10 40.98, 29.11 40.98, 29.11 40.99, 29.10 40.99, 29.10 40.98))",
        )
        .unwrap();
        let Geometry::Polygon(poly) = poly else {
            panic!("expected polygon");
        };
        assert_eq!(poly.exterior().0.len(), 5);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_wkt("POINT(abc def)"),
            Err(GeometryError::Parse { .. })
        ));
        assert!(matches!(parse_wkt("   "), Err(GeometryError::Empty)));
        assert!(matches!(
            parse_wkt("POLYGON((1 2, 3 4"),
            Err(GeometryError::Parse { .. })
        ));
    }

    #[test]
    fn writes_fixed_precision() {
        let text = write_wkt(&Geometry::Point(Point::new(29.105_000_4, 40.984_999_9))).unwrap();
        assert_eq!(text, "POINT(29.105 40.985)");
    }

    #[test]
    fn writes_polygon_rings() {
        let poly = polygon![
            (x: 29.1, y: 40.98),
            (x: 29.11, y: 40.98),
            (x: 29.11, y: 40.99),
            (x: 29.1, y: 40.98),
        ];
        assert_eq!(
            write_wkt(&Geometry::Polygon(poly)).unwrap(),
            "POLYGON((29.1 40.98,29.11 40.98,29.11 40.99,29.1 40.98))"
        );
    }

    #[test]
    fn rounds_and_normalizes_ordinates() {
        let text = write_wkt(&Geometry::Point(Point::new(12.0, -0.000_000_1))).unwrap();
        assert_eq!(text, "POINT(12 0)");

        let text = write_wkt(&Geometry::Point(Point::new(-1.5, 3_239_711.234_567_89))).unwrap();
        assert_eq!(text, "POINT(-1.5 3239711.234568)");
    }

    #[test]
    fn writes_line_strings_and_rejects_empty_ones() {
        let line = LineString::from(vec![(29.100_000_2, 40.98), (29.11, 40.990_000_7)]);
        assert_eq!(
            write_wkt(&Geometry::LineString(line)).unwrap(),
            "LINESTRING(29.1 40.98,29.11 40.990001)"
        );
        assert!(matches!(
            write_wkt(&Geometry::LineString(LineString::new(vec![]))),
            Err(GeometryError::Empty)
        ));
    }

    #[test]
    fn refuses_multi_geometries() {
        let multi = parse_wkt("MULTIPOINT((1 2), (3 4))").unwrap();
        assert!(matches!(
            write_wkt(&multi),
            Err(GeometryError::Unsupported { kind }) if kind == "MultiPoint"
        ));
    }
}
