//! Coordinate keys for duplicate detection.
//!
//! Two points are duplicates iff their geographic coordinates round to the
//! same value at six decimal degrees (about 11 cm). The key is exact at
//! that precision; nothing coarser is applied.

use std::collections::BTreeSet;

use geo::Coord;

/// Decimal degrees kept by [`coord_key`].
pub const DEDUP_DECIMALS: i32 = 6;

/// A geographic coordinate rounded to [`DEDUP_DECIMALS`] places, stored as
/// scaled integers so it can be hashed and ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoordKey {
    x: i64,
    y: i64,
}

/// Builds the dedup key of a geographic coordinate.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn coord_key(geographic: Coord<f64>) -> CoordKey {
    let scale = 10f64.powi(DEDUP_DECIMALS);
    CoordKey {
        x: (geographic.x * scale).round() as i64,
        y: (geographic.y * scale).round() as i64,
    }
}

/// Keeps the first item for every key not already in `seen`, recording
/// the keys it keeps.
///
/// Items for which `key` returns `None` are passed through untouched.
/// Returns the kept items and the number of dropped duplicates.
pub fn retain_unique<T, F>(
    items: impl IntoIterator<Item = T>,
    seen: &mut BTreeSet<CoordKey>,
    key: F,
) -> (Vec<T>, usize)
where
    F: Fn(&T) -> Option<CoordKey>,
{
    let mut kept = Vec::new();
    let mut dropped = 0;

    for item in items {
        match key(&item) {
            Some(k) if !seen.insert(k) => dropped += 1,
            _ => kept.push(item),
        }
    }

    (kept, dropped)
}
