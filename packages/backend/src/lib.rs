#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The geometry store backend.
//!
//! [`GeometryBackend`] is the seam between the client core and the
//! municipal REST service: CRUD over location rows plus the optimize RPC,
//! all exchanging WKT in geographic degrees. [`HttpBackend`] talks to the
//! real service; [`memory::MemoryBackend`] is an in-process double that
//! records every call for ordering assertions.

pub mod config;
pub mod http;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use citymap_geometry_models::{LocationRecord, LocationUpdate, NewLocation, OptimizeParams, OptimizedPoint};

pub use config::BackendConfig;
pub use http::HttpBackend;

/// Errors from backend calls.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request could not be completed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend returned HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Body preview.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("Unexpected response: {message}")]
    Decode {
        /// What was wrong with it.
        message: String,
    },
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode {
            message: e.to_string(),
        }
    }
}

/// Persistent storage and optimization for location geometries.
///
/// All geometry crosses this trait as WKT in geographic degrees.
#[async_trait]
pub trait GeometryBackend: Send + Sync {
    /// Returns every stored location.
    ///
    /// Rows that cannot be decoded individually are dropped by the
    /// implementation (and logged); the call only fails as a whole if the
    /// request fails or the body is not a list.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the request fails.
    async fn list_locations(&self) -> Result<Vec<LocationRecord>, BackendError>;

    /// Stores one location and returns its backend id.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the request fails or no id comes back.
    async fn create_location(&self, location: &NewLocation) -> Result<i64, BackendError>;

    /// Replaces the geometry (and optionally the name) of a location.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the request fails.
    async fn update_location(&self, update: &LocationUpdate) -> Result<(), BackendError>;

    /// Deletes a location.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the request fails.
    async fn delete_location(&self, id: i64) -> Result<(), BackendError>;

    /// Stores many locations in one call and returns the ids the backend
    /// reported, in request order. The list may be shorter than the input
    /// when the backend does not echo ids.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the request fails.
    async fn create_locations(&self, locations: &[NewLocation]) -> Result<Vec<i64>, BackendError>;

    /// Asks the optimizer for point placements inside `polygon_wkt`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the request fails or the body is not a
    /// list of points.
    async fn optimize(
        &self,
        polygon_wkt: &str,
        params: &OptimizeParams,
    ) -> Result<Vec<OptimizedPoint>, BackendError>;
}
