#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Turns a free-form address into a longitude/latitude position.
//!
//! The only provider is Nominatim (see [`nominatim`]). Callers depend on
//! the [`Geocoder`] trait so tests can substitute a fixed answer.

pub mod config;
pub mod nominatim;

use async_trait::async_trait;

pub use config::GeocoderConfig;
pub use nominatim::NominatimGeocoder;

/// Errors from address lookup.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The query was blank.
    #[error("Address is empty")]
    EmptyQuery,
}

/// A matched address in geographic degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedAddress {
    pub latitude: f64,
    pub longitude: f64,
    /// The provider's full name for the match.
    pub matched_address: Option<String>,
}

/// Looks up addresses.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Returns the best match for `query`, or `None` if nothing matched.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the lookup itself fails.
    async fn geocode(&self, query: &str) -> Result<Option<GeocodedAddress>, GeocodeError>;
}
