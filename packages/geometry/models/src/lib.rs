#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature identity, project category and backend wire types.
//!
//! The backend stores every geometry as a "location" row carrying a WKT
//! string in geographic degrees. These types mirror that JSON contract and
//! are kept separate from the in-memory feature types so the wire format
//! can evolve independently.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Prefix that marks a locally-assigned, not-yet-persisted feature id.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Identity of a feature in the client store.
///
/// Persisted ids come from the backend. Temporary ids are assigned to
/// optimization results that have not been saved yet and must never reach
/// a mutation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureId {
    /// Backend-assigned identifier.
    Persisted(i64),
    /// Local placeholder (`temp-<uuid>`).
    Temporary(String),
}

impl FeatureId {
    /// Allocates a fresh temporary id.
    #[must_use]
    pub fn new_temporary() -> Self {
        Self::Temporary(format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Returns `true` for ids that were never confirmed by the backend.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns the backend id, or `None` for temporary ids.
    #[must_use]
    pub const fn persisted(&self) -> Option<i64> {
        match self {
            Self::Persisted(id) => Some(*id),
            Self::Temporary(_) => None,
        }
    }
}

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "{id}"),
            Self::Temporary(id) => f.write_str(id),
        }
    }
}

/// Error returned when a string is neither an integer id nor a `temp-` id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFeatureIdError {
    /// The rejected input.
    pub input: String,
}

impl std::fmt::Display for InvalidFeatureIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid feature id '{}': expected an integer or a '{TEMP_ID_PREFIX}' id",
            self.input
        )
    }
}

impl std::error::Error for InvalidFeatureIdError {}

impl FromStr for FeatureId {
    type Err = InvalidFeatureIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with(TEMP_ID_PREFIX) && s.len() > TEMP_ID_PREFIX.len() {
            return Ok(Self::Temporary(s.to_string()));
        }
        s.parse::<i64>()
            .map(Self::Persisted)
            .map_err(|_| InvalidFeatureIdError {
                input: s.to_string(),
            })
    }
}

/// Geometry kinds a feature can carry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
pub enum GeometryKind {
    /// A single location (bin, drain, parking spot).
    Point,
    /// An open path. Optional capability.
    LineString,
    /// A closed area; the input to optimization.
    Polygon,
    /// Center + radius. Never sent as-is; normalized to a polygon first.
    Circle,
}

/// Project category ("type tag") used for filtering and theming.
///
/// The string forms are the labels the backend stores in the `typeN`
/// column.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum ProjectCategory {
    /// Waste container placement.
    #[serde(rename = "Atık Yönetimi")]
    #[strum(serialize = "Atık Yönetimi")]
    WasteManagement,
    /// General zoning.
    #[serde(rename = "Bölge Planlama")]
    #[strum(serialize = "Bölge Planlama")]
    RegionPlanning,
    /// Storm drain / manhole placement.
    #[serde(rename = "Altyapı Yönetimi")]
    #[strum(serialize = "Altyapı Yönetimi")]
    InfrastructureManagement,
    /// Parking capacity planning.
    #[serde(rename = "Otopark Planlama")]
    #[strum(serialize = "Otopark Planlama")]
    ParkingPlanning,
    /// "All projects" sentinel.
    #[default]
    #[serde(rename = "Tüm Projeler")]
    #[strum(serialize = "Tüm Projeler")]
    AllProjects,
}

impl ProjectCategory {
    /// All categories, sentinel last.
    pub const ALL: &[Self] = &[
        Self::WasteManagement,
        Self::RegionPlanning,
        Self::InfrastructureManagement,
        Self::ParkingPlanning,
        Self::AllProjects,
    ];

    /// Resolves the optional `typeN` wire value, falling back to the
    /// sentinel for missing or unknown labels.
    #[must_use]
    pub fn from_wire(value: Option<&str>) -> Self {
        value
            .and_then(|v| Self::from_str(v.trim()).ok())
            .unwrap_or_default()
    }

    /// The label to send in `typeN`, or `None` for the sentinel.
    #[must_use]
    pub fn to_wire(self) -> Option<String> {
        match self {
            Self::AllProjects => None,
            other => Some(other.to_string()),
        }
    }
}

/// Land-use type for parking estimates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UsageType {
    /// Housing.
    Residential,
    /// Shops and offices.
    Commercial,
    /// Both.
    Mixed,
}

/// Category-specific attributes stored next to a location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetadata {
    /// People per square meter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population_density: Option<f64>,
    /// Rainfall intensity in mm/min.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rainfall_intensity: Option<f64>,
    /// Storm duration in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Land-use type for parking estimates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<UsageType>,
    /// Number of placements the capacity calculator asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cover_count: Option<u32>,
}

impl FeatureMetadata {
    /// Returns `true` if no attribute is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.population_density.is_none()
            && self.rainfall_intensity.is_none()
            && self.duration.is_none()
            && self.usage_type.is_none()
            && self.min_cover_count.is_none()
    }
}

/// A location row as returned by the list endpoint.
///
/// Every field except `id` is optional on the wire; rows with missing or
/// unparseable WKT are skipped by the store loader rather than failing the
/// whole response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    /// Backend id.
    pub id: i64,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Geometry as WKT.
    #[serde(default)]
    pub wkt: Option<String>,
    /// Project category label.
    #[serde(default, rename = "typeN")]
    pub type_n: Option<String>,
    /// Category-specific attributes.
    #[serde(flatten)]
    pub metadata: FeatureMetadata,
}

/// Body of a create call (single or bulk).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLocation {
    /// Display name.
    pub name: String,
    /// Geometry as WKT in geographic degrees.
    pub wkt: String,
    /// Project category label.
    #[serde(default, rename = "typeN", skip_serializing_if = "Option::is_none")]
    pub type_n: Option<String>,
    /// Category-specific attributes.
    #[serde(flatten)]
    pub metadata: FeatureMetadata,
}

/// Body of an update call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    /// Backend id (repeated in the body, as the backend expects).
    pub id: i64,
    /// New name, if renaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Geometry as WKT in geographic degrees.
    pub wkt: String,
}

/// Response of a create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedLocation {
    /// Backend-assigned id.
    pub id: i64,
}

/// A candidate placement returned by the optimize endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedPoint {
    /// Backend id, when the optimizer persisted the point itself.
    #[serde(default)]
    pub id: Option<i64>,
    /// Backend-suggested name (overridden by the client).
    #[serde(default)]
    pub name: Option<String>,
    /// Point geometry as WKT.
    pub wkt: String,
}

/// Query parameters of the optimize endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeParams {
    /// Grid cell size in degrees.
    pub cell_size: f64,
    /// Desired number of placements (the client's `minCoverCount`).
    pub new_bin_count: u32,
    /// Minimum spacing between placements in degrees.
    pub min_distance: f64,
    /// Prefix for backend-side names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
}
