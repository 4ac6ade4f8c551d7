//! Backend connection settings.
//!
//! Deserialized from the `[backend]` table of the client TOML. Every field
//! has a default matching the municipal deployment, so a partial table is
//! enough.

use citymap_geometry::Projection;
use serde::{Deserialize, Serialize};

/// Connection and endpoint settings for [`crate::HttpBackend`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Scheme, host and port, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for read requests. Mutations are never retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles each retry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Projection of WKT returned by the backend. Unset means "detect from
    /// coordinate magnitude".
    #[serde(default)]
    pub wire_projection: Option<Projection>,
    /// Endpoint paths.
    #[serde(default)]
    pub endpoints: Endpoints,
    /// Fixed optimize parameters.
    #[serde(default)]
    pub optimize: OptimizeDefaults,
}

/// Endpoint paths relative to [`BackendConfig::base_url`]. `{id}` is
/// substituted with the backend id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// `GET` all locations.
    pub list: String,
    /// `POST` one location.
    pub create: String,
    /// `PUT` one location.
    pub update: String,
    /// `DELETE` one location.
    pub delete: String,
    /// `POST` many locations.
    pub bulk_create: String,
    /// `POST` a polygon for optimization.
    pub optimize: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            list: "/Point/GetAll".to_string(),
            create: "/Point/Add".to_string(),
            update: "/Point/Update/{id}".to_string(),
            delete: "/Point/Delete/{id}".to_string(),
            bulk_create: "/Point/AddRange/range".to_string(),
            optimize: "/api/TrashBin/optimize".to_string(),
        }
    }
}

/// Optimize parameters that do not come from the capacity calculator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeDefaults {
    /// Grid cell size in degrees.
    pub cell_size: f64,
    /// Minimum spacing between placements in degrees.
    pub min_distance: f64,
}

impl Default for OptimizeDefaults {
    fn default() -> Self {
        Self {
            cell_size: 0.0009,
            min_distance: 0.00027,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            wire_projection: None,
            endpoints: Endpoints::default(),
            optimize: OptimizeDefaults::default(),
        }
    }
}

impl BackendConfig {
    /// Joins the base URL and an endpoint path, substituting `{id}`.
    #[must_use]
    pub fn url(&self, path: &str, id: Option<i64>) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = id.map_or_else(|| path.to_string(), |id| path.replace("{id}", &id.to_string()));
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:7096".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_ms() -> u64 {
    500
}
