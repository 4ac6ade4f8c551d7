//! Geocoder settings, deserialized from the `[geocoder]` table of the
//! client TOML.

use serde::{Deserialize, Serialize};

/// Endpoint and client settings for [`crate::NominatimGeocoder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Full URL of the search endpoint.
    pub base_url: String,
    /// Sent with every request. The public Nominatim instance refuses
    /// requests without one.
    pub user_agent: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Comma-separated ISO 3166-1 codes to restrict matches to.
    pub country_codes: Option<String>,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: concat!("citymap/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 10,
            country_codes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults() {
        let config: GeocoderConfig = toml::de::from_str("country_codes = \"tr\"").unwrap();
        assert_eq!(config.country_codes.as_deref(), Some("tr"));
        assert_eq!(config.base_url, GeocoderConfig::default().base_url);
        assert_eq!(config.timeout_secs, 10);
    }
}
