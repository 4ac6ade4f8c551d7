//! REST client for the municipal geometry service.

use std::time::Duration;

use async_trait::async_trait;
use citymap_geometry_models::{
    CreatedLocation, LocationRecord, LocationUpdate, NewLocation, OptimizeParams, OptimizedPoint,
};

use crate::retry::{self, RetryPolicy};
use crate::{BackendConfig, BackendError, GeometryBackend};

/// [`GeometryBackend`] over HTTP.
pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// Builds a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Http`] if the TLS backend cannot be
    /// initialized.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    const fn read_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            base_delay: Duration::from_millis(self.config.backoff_ms),
        }
    }
}

#[async_trait]
impl GeometryBackend for HttpBackend {
    async fn list_locations(&self) -> Result<Vec<LocationRecord>, BackendError> {
        let url = self.config.url(&self.config.endpoints.list, None);
        log::debug!("GET {url}");
        let body = retry::send_json(|| self.client.get(&url), self.read_policy()).await?;
        parse_location_list(body)
    }

    async fn create_location(&self, location: &NewLocation) -> Result<i64, BackendError> {
        let url = self.config.url(&self.config.endpoints.create, None);
        log::debug!("POST {url} name={:?}", location.name);
        let body =
            retry::send_json(|| self.client.post(&url).json(location), RetryPolicy::ONCE).await?;
        parse_created_id(&body).ok_or_else(|| BackendError::Decode {
            message: format!("create response carries no id: {body}"),
        })
    }

    async fn update_location(&self, update: &LocationUpdate) -> Result<(), BackendError> {
        let url = self.config.url(&self.config.endpoints.update, Some(update.id));
        log::debug!("PUT {url}");
        retry::send_text(|| self.client.put(&url).json(update), RetryPolicy::ONCE).await?;
        Ok(())
    }

    async fn delete_location(&self, id: i64) -> Result<(), BackendError> {
        let url = self.config.url(&self.config.endpoints.delete, Some(id));
        log::debug!("DELETE {url}");
        retry::send_text(|| self.client.delete(&url), RetryPolicy::ONCE).await?;
        Ok(())
    }

    async fn create_locations(&self, locations: &[NewLocation]) -> Result<Vec<i64>, BackendError> {
        let url = self.config.url(&self.config.endpoints.bulk_create, None);
        log::debug!("POST {url} ({} locations)", locations.len());
        let body =
            retry::send_json(|| self.client.post(&url).json(locations), RetryPolicy::ONCE).await?;

        let ids: Vec<i64> = body
            .as_array()
            .map(|items| items.iter().filter_map(parse_created_id).collect())
            .unwrap_or_default();
        if ids.len() != locations.len() {
            log::warn!(
                "Bulk create returned {} ids for {} locations",
                ids.len(),
                locations.len()
            );
        }
        Ok(ids)
    }

    async fn optimize(
        &self,
        polygon_wkt: &str,
        params: &OptimizeParams,
    ) -> Result<Vec<OptimizedPoint>, BackendError> {
        let url = self.config.url(&self.config.endpoints.optimize, None);
        log::debug!("POST {url} newBinCount={}", params.new_bin_count);
        let body = retry::send_json(
            || self.client.post(&url).query(params).json(polygon_wkt),
            RetryPolicy::ONCE,
        )
        .await?;

        if !body.is_array() {
            return Err(BackendError::Decode {
                message: format!("optimize response is not a list: {body}"),
            });
        }
        Ok(serde_json::from_value(body)?)
    }
}

/// Decodes the list endpoint body, dropping rows that do not decode.
///
/// Accepts a bare array or an object wrapping it in `data`.
fn parse_location_list(body: serde_json::Value) -> Result<Vec<LocationRecord>, BackendError> {
    let items = match body {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(BackendError::Decode {
                    message: "location list is not an array".to_string(),
                });
            }
        },
        other => {
            return Err(BackendError::Decode {
                message: format!("location list is not an array: {other}"),
            });
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<LocationRecord>(item.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping undecodable location {item}: {e}");
                None
            }
        })
        .collect())
}

/// Reads an id from `{ "id": n }` or a bare number.
fn parse_created_id(body: &serde_json::Value) -> Option<i64> {
    body.as_i64().or_else(|| {
        serde_json::from_value::<CreatedLocation>(body.clone())
            .ok()
            .map(|c| c.id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_and_skips_bad_rows() {
        let body = serde_json::json!([
            { "id": 1, "name": "A", "wkt": "POINT(29 41)" },
            { "name": "no id" },
            { "id": 2, "name": "B" }
        ]);
        let records = parse_location_list(body).unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 2]);
    }

    #[test]
    fn parses_wrapped_list() {
        let body = serde_json::json!({ "data": [{ "id": 9 }] });
        assert_eq!(parse_location_list(body).unwrap().len(), 1);
    }

    #[test]
    fn rejects_non_list() {
        assert!(matches!(
            parse_location_list(serde_json::json!("oops")),
            Err(BackendError::Decode { .. })
        ));
    }

    #[test]
    fn created_id_shapes() {
        assert_eq!(parse_created_id(&serde_json::json!({ "id": 5 })), Some(5));
        assert_eq!(parse_created_id(&serde_json::json!(6)), Some(6));
        assert_eq!(parse_created_id(&serde_json::json!({ "ok": true })), None);
    }

    #[test]
    fn builds_with_default_config() {
        let backend = HttpBackend::new(BackendConfig::default()).unwrap();
        assert_eq!(backend.config().endpoints.list, "/Point/GetAll");
    }
}
