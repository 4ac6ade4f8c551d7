//! Circle normalization.
//!
//! The wire format has no circle type, so circles are sent as regular
//! polygons inscribed in the circle.

use geo::{Coord, LineString, Polygon};

/// Number of sides used when approximating a circle.
pub const CIRCLE_SIDES: usize = 64;

/// Approximates a circle with a closed `sides`-gon.
///
/// Vertices start at angle zero (due east of the center) and advance
/// counter-clockwise. `sides` below 3 is raised to 3.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn circle_to_polygon(center: Coord<f64>, radius: f64, sides: usize) -> Polygon<f64> {
    let sides = sides.max(3);
    let step = std::f64::consts::TAU / sides as f64;

    let mut ring: Vec<Coord<f64>> = (0..sides)
        .map(|i| {
            let angle = step * i as f64;
            Coord {
                x: radius.mul_add(angle.cos(), center.x),
                y: radius.mul_add(angle.sin(), center.y),
            }
        })
        .collect();
    ring.push(ring[0]);

    Polygon::new(LineString::new(ring), vec![])
}
