//! Nominatim / OpenStreetMap geocoder client.
//!
//! The public instance allows about one request per second. Lookups here
//! are user-initiated, one address at a time, so no client-side limiter is
//! kept; a 429 is reported as [`GeocodeError::RateLimited`].
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use std::time::Duration;

use async_trait::async_trait;

use crate::{GeocodeError, GeocodedAddress, Geocoder, GeocoderConfig};

/// [`Geocoder`] backed by a Nominatim search endpoint.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    config: GeocoderConfig,
}

impl NominatimGeocoder {
    /// Builds a client with the configured user agent and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Http`] if the TLS backend cannot be
    /// initialized.
    pub fn new(config: GeocoderConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<GeocodedAddress>, GeocodeError> {
        geocode_freeform(
            &self.client,
            &self.config.base_url,
            query,
            self.config.country_codes.as_deref(),
        )
        .await
    }
}

/// Geocodes a free-form address using Nominatim.
///
/// # Errors
///
/// Returns [`GeocodeError`] if the query is blank, or the HTTP request or
/// response parsing fails.
pub async fn geocode_freeform(
    client: &reqwest::Client,
    base_url: &str,
    query: &str,
    country_codes: Option<&str>,
) -> Result<Option<GeocodedAddress>, GeocodeError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(GeocodeError::EmptyQuery);
    }

    let mut params = vec![("q", query), ("format", "jsonv2"), ("limit", "1")];
    if let Some(codes) = country_codes {
        params.push(("countrycodes", codes));
    }

    log::debug!("Geocoding '{query}'");
    let resp = client.get(base_url).query(&params).send().await?;

    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(GeocodeError::RateLimited);
    }

    let body: serde_json::Value = resp.error_for_status()?.json().await?;
    let result = parse_response(&body)?;
    if result.is_none() {
        log::info!("No match for '{query}'");
    }
    Ok(result)
}

/// Parses Nominatim JSON response.
fn parse_response(body: &serde_json::Value) -> Result<Option<GeocodedAddress>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "Nominatim response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(None);
    };

    let lat = coordinate(first, "lat")?;
    let lon = coordinate(first, "lon")?;
    let display_name = first["display_name"].as_str().map(String::from);

    Ok(Some(GeocodedAddress {
        latitude: lat,
        longitude: lon,
        matched_address: display_name,
    }))
}

/// Nominatim sends coordinates as strings.
fn coordinate(result: &serde_json::Value, field: &str) -> Result<f64, GeocodeError> {
    result[field]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| GeocodeError::Parse {
            message: format!("Missing {field} in Nominatim response"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nominatim_result() {
        let body = serde_json::json!([{
            "place_id": 123_456,
            "lat": "40.9853",
            "lon": "29.1054",
            "display_name": "Bağdat Caddesi, Kadıköy, İstanbul, Türkiye"
        }]);
        let result = parse_response(&body).unwrap().unwrap();
        assert!((result.latitude - 40.9853).abs() < 1e-9);
        assert!((result.longitude - 29.1054).abs() < 1e-9);
        assert_eq!(
            result.matched_address.as_deref(),
            Some("Bağdat Caddesi, Kadıköy, İstanbul, Türkiye")
        );
    }

    #[test]
    fn parses_nominatim_empty() {
        let body = serde_json::json!([]);
        assert!(parse_response(&body).unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_responses() {
        let body = serde_json::json!({ "error": "Unable to geocode" });
        assert!(matches!(parse_response(&body), Err(GeocodeError::Parse { .. })));

        let body = serde_json::json!([{ "lat": 40.98, "lon": "29.1" }]);
        assert!(matches!(
            parse_response(&body),
            Err(GeocodeError::Parse { message }) if message.contains("lat")
        ));
    }

    #[tokio::test]
    async fn blank_query_is_refused_without_a_request() {
        let client = reqwest::Client::new();
        let result = geocode_freeform(&client, "http://127.0.0.1:9/search", "   ", None).await;
        assert!(matches!(result, Err(GeocodeError::EmptyQuery)));
    }
}
