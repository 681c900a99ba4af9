//! HTTP retry helpers for transient errors.
//!
//! All feed fetchers should use [`send_json`] instead of calling
//! `reqwest::RequestBuilder::send()` directly. This ensures every HTTP
//! request gets automatic retry with exponential backoff for transient
//! failures (timeouts, connection resets, server errors, rate limiting).
//!
//! # Usage
//!
//! ```ignore
//! use crate::retry;
//!
//! // Simple GET -> JSON
//! let body = retry::send_json(|| client.get(&url)).await?;
//!
//! // GET with query params
//! let body = retry::send_json(|| client.get(&url).query(&params)).await?;
//! ```

use std::time::Duration;

use crate::SourceError;

/// Maximum number of retry attempts for transient HTTP errors
/// (connection failures, timeouts, server errors).
const MAX_RETRIES: u32 = 3;

/// Upper bound on a single backoff delay. With base delays of 2s, 4s, 8s
/// the cap only engages if `MAX_RETRIES` is raised.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 500;

/// Sends an HTTP request and parses the response body as JSON.
///
/// The `build_request` closure is called on each attempt to construct a
/// fresh [`reqwest::RequestBuilder`] (since builders are consumed by
/// `.send()`). Retries up to [`MAX_RETRIES`] times with exponential backoff
/// on connection errors, timeouts, HTTP 429, and HTTP 5xx. Does **not**
/// retry other HTTP 4xx, which are permanent.
///
/// # Errors
///
/// Returns [`SourceError`] if the request fails after all retries, the
/// server returns a non-retryable status code, or the response body cannot
/// be parsed as JSON.
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F) -> Result<serde_json::Value, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, MAX_RETRIES).await?;

    let url = response.url().to_string();
    let status = response.status();

    // Read the raw body as text first, then parse as JSON. This lets us
    // log the actual response content on failure.
    let text = response.text().await.map_err(SourceError::Http)?;

    match serde_json::from_str(&text) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            let preview = if text.len() > BODY_PREVIEW_LEN {
                format!("{}...", &text[..BODY_PREVIEW_LEN])
            } else {
                text.clone()
            };
            log::error!(
                "JSON parse failed for {url} (status {status}, {} bytes): {json_err}\n  \
                 body preview: {preview}",
                text.len(),
            );
            Err(SourceError::Normalization {
                message: format!(
                    "JSON parse failed: {json_err} (status={status}, received {} bytes)",
                    text.len()
                ),
            })
        }
    }
}

/// Core retry loop for [`send_json`].
///
/// Sends the request built by `build_request`, retrying on transient errors
/// up to `max_retries` times with exponential backoff. Returns the
/// successful [`reqwest::Response`] (status 2xx or 3xx).
#[allow(clippy::future_not_send)]
async fn send_inner<F>(
    build_request: &F,
    max_retries: u32,
) -> Result<reqwest::Response, SourceError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error: Option<SourceError> = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << attempt).min(MAX_BACKOFF);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    last_error = Some(SourceError::Http(e));
                    continue;
                }
                return Err(SourceError::Http(e));
            }
            Ok(response) => {
                let status = response.status();

                // 429 Too Many Requests and 5xx server errors are retryable
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
                {
                    if attempt < max_retries {
                        log::warn!("  HTTP {status}, retrying");
                        last_error = Some(SourceError::Normalization {
                            message: format!("HTTP {status}"),
                        });
                        continue;
                    }
                    return Err(SourceError::Normalization {
                        message: format!("HTTP {status} after {max_retries} retries"),
                    });
                }

                // 4xx Client Error (not 429) is permanent, don't retry
                if status.is_client_error() {
                    return Err(SourceError::Normalization {
                        message: format!("HTTP {status}"),
                    });
                }

                return Ok(response);
            }
        }
    }

    // Should be unreachable, but in case the loop exits without returning:
    Err(last_error.unwrap_or_else(|| SourceError::Normalization {
        message: "request failed after all retries".to_string(),
    }))
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}
