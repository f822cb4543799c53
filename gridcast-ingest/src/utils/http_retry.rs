//! Resilient HTTP client
//!
//! Bounded retry with exponential backoff for upstream JSON APIs.
//!
//! **Retried:** HTTP 429, 502, 503, 504, connect failures and timeouts.
//! **Not retried:** every other status, undecodable bodies.
//!
//! Exhausting the attempts yields [`SourceError::Unavailable`], which the
//! fallback coordinator treats as "try the next source".

use crate::error::SourceError;
use gridcast_common::config::{
    RetryConfig, SourcesConfig, MAX_RETRY_ATTEMPTS, MIN_BACKOFF_MULTIPLIER,
};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Response bodies quoted in errors are cut to this many characters
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Retry schedule for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.clamp(1, MAX_RETRY_ATTEMPTS),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier.max(MIN_BACKOFF_MULTIPLIER),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Backoff slept after the given failed attempt (1-based)
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        Duration::from_millis(millis.min(self.max_backoff.as_millis() as f64) as u64)
    }
}

/// Statuses worth retrying
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

/// HTTP client shared by one source adapter
pub struct ResilientClient {
    client: Client,
    policy: RetryPolicy,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    requests: AtomicU64,
}

impl ResilientClient {
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        policy: RetryPolicy,
        requests_per_second: u32,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SourceError::Setup(format!("HTTP client: {}", e)))?;

        let per_second = NonZeroU32::new(requests_per_second)
            .ok_or_else(|| SourceError::Setup("requests_per_second must be non-zero".to_string()))?;

        Ok(Self {
            client,
            policy,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
            requests: AtomicU64::new(0),
        })
    }

    /// Client configured from the `[sources]` and `[retry]` tables
    pub fn from_config(sources: &SourcesConfig, retry: &RetryConfig) -> Result<Self, SourceError> {
        Self::new(
            &sources.user_agent,
            Duration::from_secs(sources.request_timeout_secs),
            RetryPolicy::from(retry),
            sources.requests_per_second,
        )
    }

    /// Requests sent, counting retries
    pub fn requests_made(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// GET and decode JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.rate_limiter.until_ready().await;
            self.requests.fetch_add(1, Ordering::Relaxed);

            tracing::debug!(url, attempt, "Upstream request");

            let failure = match self.client.get(url).query(params).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.bytes().await {
                            Ok(body) => {
                                if attempt > 1 {
                                    tracing::debug!(
                                        url,
                                        attempt,
                                        "Upstream request succeeded after retry"
                                    );
                                }
                                return serde_json::from_slice(&body)
                                    .map_err(|e| SourceError::Decode(format!("{}: {}", url, e)));
                            }
                            Err(e) => format!("body read failed: {}", e),
                        }
                    } else if is_retryable_status(status) {
                        format!("HTTP {}", status.as_u16())
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(SourceError::Status {
                            status: status.as_u16(),
                            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                        });
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => e.to_string(),
                Err(e) => {
                    return Err(SourceError::Unavailable {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            };

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    url,
                    attempt,
                    reason = %failure,
                    "Upstream request failed: retry budget exhausted"
                );
                return Err(SourceError::Unavailable {
                    attempts: attempt,
                    reason: failure,
                });
            }

            let backoff = self.policy.backoff_after(attempt);
            tracing::warn!(
                url,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                reason = %failure,
                "Transient upstream failure, will retry after backoff"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// GET and decode JSON, mapping 404 to `None`
    pub async fn get_json_optional<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>, SourceError> {
        match self.get_json(url, params).await {
            Ok(value) => Ok(Some(value)),
            Err(SourceError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        for code in [429u16, 502, 503, 504] {
            assert!(is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 403, 404, 500, 501] {
            assert!(!is_retryable_status(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(3000),
        };

        assert_eq!(policy.backoff_after(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(3000));
    }

    #[test]
    fn test_default_policy_matches_config_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn test_out_of_range_config_is_clamped() {
        let config = RetryConfig {
            max_attempts: 9,
            backoff_multiplier: 1.2,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.multiplier, 2.0);
    }

    #[test]
    fn test_zero_rate_is_setup_error() {
        let result =
            ResilientClient::new("test", Duration::from_secs(1), RetryPolicy::default(), 0);
        assert!(matches!(result, Err(SourceError::Setup(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(5),
        };
        let client = ResilientClient::new("test", Duration::from_secs(2), policy, 1000).unwrap();

        // Bind then release a port so nothing is listening on it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = format!("http://127.0.0.1:{}/unreachable", port);
        let result: Result<serde_json::Value, _> = client.get_json(&url, &[]).await;

        match result {
            Err(SourceError::Unavailable { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert_eq!(client.requests_made(), 3);
    }
}
