//! HTTP fetch with automatic retry and backoff.
//!
//! Provides [`fetch_with_retry`], used by the segment (`/segment/{name}`)
//! and key-fetch (`/key`) handlers so a single transient upstream hiccup
//! doesn't surface as a player-visible error. Extractor handshakes (§4.2)
//! use the separate exponential-backoff [`retry_with_backoff`] instead,
//! since that flow's retry/session-reset semantics differ from a plain
//! fetch-and-serve relay fetch.

use crate::util::FORCED_USER_AGENT;
use reqwest::{Client, Response};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Default number of fetch attempts (1 initial + 1 retry).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default backoff between attempts in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 500;

/// Configuration for [`fetch_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (minimum 1; 0 is treated as 1).
    pub max_attempts: u32,
    /// Sleep duration between consecutive attempts.
    pub backoff: Duration,
    /// Optional per-request timeout applied to each individual attempt.
    ///
    /// When `None`, the client's own timeout applies.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            timeout: None,
        }
    }
}

/// Apply the forced desktop User-Agent plus any caller-supplied headers to
/// a fresh `GET` request for `url`. Headers are re-applied on every retry
/// attempt since a [`reqwest::RequestBuilder`] is consumed by `send`.
fn build_request(client: &Client, url: &str, headers: &HashMap<String, String>, timeout: Option<Duration>) -> reqwest::RequestBuilder {
    let mut request = client.get(url).header(reqwest::header::USER_AGENT, FORCED_USER_AGENT);
    for (k, v) in headers {
        if k.eq_ignore_ascii_case("user-agent") {
            continue;
        }
        request = request.header(k.as_str(), v.as_str());
    }
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    request
}

/// Fetch a URL via HTTP GET with automatic retry and backoff.
///
/// Attempts the request up to `config.max_attempts` times, sleeping
/// `config.backoff` between each attempt. `headers` are repeated on every
/// attempt (the segment/key handlers use this to carry the upstream header
/// set the extractor or DASH→HLS converter resolved).
///
/// Returns the first successful (2xx) [`Response`], or the last
/// [`reqwest::Error`] encountered once all attempts are exhausted.
///
/// # Errors
///
/// Returns the last network or non-2xx error after all retries fail.
pub async fn fetch_with_retry(
    client: &Client,
    url: &str,
    headers: &HashMap<String, String>,
    config: &RetryConfig,
) -> Result<Response, reqwest::Error> {
    let max_attempts = config.max_attempts.max(1);

    // Retry loop: attempts 1 through N-1, with backoff between each.
    // The final attempt is handled separately below to guarantee a
    // return without `unreachable!()` or other panic paths.
    for attempt in 1..max_attempts {
        let request = build_request(client, url, headers, config.timeout);

        match request.send().await {
            Ok(response) if response.status().is_success() => return Ok(response),

            Ok(response) => {
                warn!(
                    "HTTP fetch returned {} for {} (attempt {}/{})",
                    response.status(),
                    url,
                    attempt,
                    max_attempts
                );
            }

            Err(e) => {
                warn!(
                    "HTTP fetch failed for {} (attempt {}/{}): {}",
                    url, attempt, max_attempts, e
                );
            }
        }

        warn!("Retrying HTTP fetch in {}ms...", config.backoff.as_millis());
        tokio::time::sleep(config.backoff).await;
    }

    // Final attempt — returns directly, no further retry
    let request = build_request(client, url, headers, config.timeout);

    let response = request.send().await.map_err(|e| {
        warn!(
            "HTTP fetch failed for {} (attempt {}/{}): {}",
            url, max_attempts, max_attempts, e
        );
        e
    })?;

    if !response.status().is_success() {
        warn!(
            "HTTP fetch returned {} for {} (attempt {}/{})",
            response.status(),
            url,
            max_attempts,
            max_attempts
        );
    }

    response.error_for_status()
}

/// Exponential backoff used by extractor handshakes (§4.2): three attempts,
/// sleeping `initial · 2^attempt` between each.
#[derive(Debug, Clone)]
pub struct ExponentialRetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for ExponentialRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

/// Run `op` up to `config.max_attempts` times, sleeping
/// `config.initial_backoff * 2^attempt` between attempts. Returns the last
/// error if every attempt fails.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &ExponentialRetryConfig,
    mut op: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    "attempt {}/{} failed: {}",
                    attempt + 1,
                    max_attempts,
                    e
                );
                last_err = Some(e);
                if attempt + 1 < max_attempts {
                    let delay = config.initial_backoff * 2u32.pow(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(cfg.backoff, Duration::from_millis(DEFAULT_BACKOFF_MS));
        assert!(cfg.timeout.is_none());
    }

    #[test]
    fn retry_config_custom() {
        let cfg = RetryConfig {
            max_attempts: 5,
            backoff: Duration::from_millis(100),
            timeout: Some(Duration::from_secs(10)),
        };
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.backoff, Duration::from_millis(100));
        assert_eq!(cfg.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn max_attempts_zero_treated_as_one() {
        let cfg = RetryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        // max(1) guard ensures at least one attempt
        assert_eq!(cfg.max_attempts.max(1), 1);
    }

    #[test]
    fn retry_config_is_debug() {
        let cfg = RetryConfig::default();
        let debug = format!("{:?}", cfg);
        assert!(debug.contains("max_attempts"));
        assert!(debug.contains("backoff"));
    }

    #[test]
    fn retry_config_is_clone() {
        let cfg = RetryConfig {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            timeout: Some(Duration::from_secs(5)),
        };
        let cloned = cfg.clone();
        assert_eq!(cloned.max_attempts, 3);
        assert_eq!(cloned.backoff, Duration::from_millis(200));
        assert_eq!(cloned.timeout, Some(Duration::from_secs(5)));
    }

    // ---- Integration tests using wiremock ----

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = Client::new();
        let config = RetryConfig {
            backoff: Duration::from_millis(1),
            ..Default::default()
        };

        let result = fetch_with_retry(&client, &server.uri(), &HashMap::new(), &config).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;

        // 200 fallback (lower priority — mounted first)
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        // 500 on first hit (higher priority — mounted last, deactivates after 1)
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let client = Client::new();
        let config = RetryConfig {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
            timeout: None,
        };

        let result = fetch_with_retry(&client, &server.uri(), &HashMap::new(), &config).await;
        assert!(result.is_ok(), "Expected success after retry");
        assert_eq!(result.unwrap().text().await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn returns_error_after_all_retries_exhausted() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = Client::new();
        let config = RetryConfig {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
            timeout: None,
        };

        let result = fetch_with_retry(&client, &server.uri(), &HashMap::new(), &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn single_attempt_no_retry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Client::new();
        let config = RetryConfig {
            max_attempts: 1,
            backoff: Duration::from_millis(1),
            timeout: None,
        };

        let result = fetch_with_retry(&client, &server.uri(), &HashMap::new(), &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn backoff_retries_until_success() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = AtomicU32::new(0);
        let config = ExponentialRetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        };

        let result: std::result::Result<u32, &str> = retry_with_backoff(&config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet")
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_exhausts_and_returns_last_error() {
        let config = ExponentialRetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
        };

        let result: std::result::Result<(), &str> =
            retry_with_backoff(&config, || async { Err("always fails") }).await;

        assert_eq!(result, Err("always fails"));
    }
}
