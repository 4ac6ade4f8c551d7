//! HTTP send helpers with retry for transient errors.
//!
//! Every request goes through [`send_json`] or [`send_text`]. Reads use a
//! [`RetryPolicy`] with retries; mutations and optimize calls use
//! [`RetryPolicy::ONCE`], since re-sending a create could persist the same
//! geometry twice.
//!
//! ```ignore
//! let body = retry::send_json(|| client.get(&url), policy).await?;
//! let body = retry::send_json(|| client.post(&url).json(&payload), RetryPolicy::ONCE).await?;
//! ```

use std::time::Duration;

use crate::BackendError;

/// Maximum length of the response body preview included in errors.
const BODY_PREVIEW_LEN: usize = 500;

/// How many times, and how patiently, a request is re-sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt on connection errors, timeouts,
    /// HTTP 429 and HTTP 5xx.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// A single attempt.
    pub const ONCE: Self = Self {
        max_retries: 0,
        base_delay: Duration::ZERO,
    };

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX))
    }
}

/// Sends a request and parses the response body as JSON.
///
/// An empty body parses as `null`.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (builders are consumed by `.send()`).
///
/// # Errors
///
/// Returns [`BackendError`] if the request fails after all retries, the
/// server returns a non-success status, or the body is not JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F, policy: RetryPolicy) -> Result<serde_json::Value, BackendError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, policy).await?;
    let url = response.url().to_string();
    let status = response.status();
    let text = response.text().await?;

    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }

    serde_json::from_str(&text).map_err(|e| {
        log::error!(
            "JSON parse failed.\n  \
             url: {url}\n  \
             status: {status}\n  \
             received: {} bytes\n  \
             parse error: {e}\n  \
             body preview: {}",
            text.len(),
            preview(&text),
        );
        BackendError::Decode {
            message: format!("JSON parse failed: {e} (status={status}, {} bytes)", text.len()),
        }
    })
}

/// Sends a request and returns the response body as text.
///
/// # Errors
///
/// Returns [`BackendError`] if the request fails after all retries or the
/// server returns a non-success status.
#[allow(clippy::future_not_send)]
pub async fn send_text<F>(build_request: F, policy: RetryPolicy) -> Result<String, BackendError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, policy).await?;
    Ok(response.text().await?)
}

/// Core retry loop shared by [`send_json`] and [`send_text`].
///
/// Returns the successful [`reqwest::Response`] (status 2xx or 3xx).
#[allow(clippy::future_not_send)]
async fn send_inner<F>(build_request: &F, policy: RetryPolicy) -> Result<reqwest::Response, BackendError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let max_retries = policy.max_retries;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    continue;
                }
                return Err(BackendError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                if (status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                    && attempt < max_retries
                {
                    log::warn!("  HTTP {status} from {}", response.url());
                    continue;
                }

                if status.is_client_error() || status.is_server_error() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(BackendError::Status {
                        status: status.as_u16(),
                        message: preview(&body),
                    });
                }

                return Ok(response);
            }
        }
    }

    unreachable!("send_inner retry loop exited without returning")
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_request()
}

fn preview(text: &str) -> String {
    if text.len() > BODY_PREVIEW_LEN {
        let mut end = BODY_PREVIEW_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
    }

    #[test]
    fn once_never_waits() {
        assert_eq!(RetryPolicy::ONCE.max_retries, 0);
        assert_eq!(RetryPolicy::ONCE.delay(1), Duration::ZERO);
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let text = "ş".repeat(400);
        let p = preview(&text);
        assert!(p.ends_with("..."));
        assert!(p.len() <= BODY_PREVIEW_LEN + 3);
    }
}
