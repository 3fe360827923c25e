//! Rate-limited HTTP transport.
//!
//! [`RateLimitedTransport::request`] wraps a raw [`HttpFetch`] with the retry
//! policy every upstream call shares:
//!
//! | Response | Behavior |
//! |---|---|
//! | 429, or 403 carrying rate-limit headers | wait `max(retry-after, reset - now, 1s)` then retry |
//! | wait above the ceiling | fail with [`SourceError::RateLimitExceeded`] |
//! | rate limited in strict mode | fail with [`SourceError::RateLimitedStrict`] |
//! | 5xx | retry after 1s, 2s, ... up to `server_error_retries` times, then return it |
//! | 404 and everything else | returned as-is |
//!
//! A bare 403 without rate-limit headers is a permission problem, not
//! throttling, and is returned unchanged.

use super::SourceError;
use crate::config::TransportConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::warn;

const MIN_RATE_LIMIT_WAIT: Duration = Duration::from_millis(1000);
const SERVER_ERROR_BACKOFF: Duration = Duration::from_millis(1000);

/// A fully read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header; invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok().map(str::trim)
    }

    fn header_u64(&self, name: &str) -> Option<u64> {
        self.header_str(name)?.parse().ok()
    }
}

/// One GET request, no retries.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, SourceError>;
}

/// [`HttpFetch`] over a shared `reqwest` client.
pub struct ReqwestFetch {
    client: Client,
    user_agent: String,
    token: Option<String>,
}

impl ReqwestFetch {
    /// `timeout` bounds each request from connect to the last body byte.
    pub fn new(
        user_agent: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, user_agent, token))
    }

    pub fn with_client(client: Client, user_agent: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            token,
        }
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    async fn get(&self, url: &str) -> Result<HttpResponse, SourceError> {
        let network = |e: reqwest::Error| SourceError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let mut request = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(network)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(network)?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Backoff wait requested by a throttled response, or `None` if the response
/// is not a rate-limit signal.
pub fn rate_limit_wait(response: &HttpResponse, now: DateTime<Utc>) -> Option<Duration> {
    let status = response.status;
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::FORBIDDEN {
        return None;
    }

    let retry_after = response.header_u64("retry-after").unwrap_or(0);
    let reset = response.header_u64("x-ratelimit-reset").unwrap_or(0);
    let exhausted = response.header_str("x-ratelimit-remaining") == Some("0");
    if status == StatusCode::FORBIDDEN && retry_after == 0 && reset == 0 && !exhausted {
        return None;
    }

    let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    let reset_delta = reset.saturating_mul(1000).saturating_sub(now_ms);
    let wait_ms = retry_after.saturating_mul(1000).max(reset_delta);
    Some(Duration::from_millis(wait_ms).max(MIN_RATE_LIMIT_WAIT))
}

/// Retrying wrapper around an [`HttpFetch`].
pub struct RateLimitedTransport<F> {
    inner: F,
    max_wait: Duration,
    server_error_retries: u32,
    max_rate_limit_retries: u32,
    strict: bool,
}

impl<F: HttpFetch> RateLimitedTransport<F> {
    pub fn new(inner: F, config: &TransportConfig, strict: bool) -> Self {
        Self {
            inner,
            max_wait: config.max_wait(),
            server_error_retries: config.server_error_retries,
            max_rate_limit_retries: config.max_rate_limit_retries,
            strict,
        }
    }

    /// GET `url`, applying the backoff and retry policy.
    pub async fn request(&self, url: &str) -> Result<HttpResponse, SourceError> {
        let mut server_attempt: u32 = 1;
        let mut rate_limit_attempt: u32 = 0;

        loop {
            let response = self.inner.get(url).await?;

            if let Some(wait) = rate_limit_wait(&response, Utc::now()) {
                if wait > self.max_wait {
                    return Err(SourceError::RateLimitExceeded {
                        wait,
                        ceiling: self.max_wait,
                    });
                }
                if self.strict {
                    return Err(SourceError::RateLimitedStrict {
                        status: response.status.as_u16(),
                    });
                }
                if rate_limit_attempt >= self.max_rate_limit_retries {
                    return Err(SourceError::RateLimitRetriesExhausted {
                        attempts: rate_limit_attempt,
                    });
                }
                rate_limit_attempt += 1;
                warn!(
                    target: "recipe_sync",
                    status = response.status.as_u16(),
                    wait_secs = wait.as_secs_f64().ceil(),
                    "rate limited, waiting before retry"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if response.status.is_server_error() && server_attempt <= self.server_error_retries {
                let backoff = SERVER_ERROR_BACKOFF * server_attempt;
                warn!(
                    target: "recipe_sync",
                    status = response.status.as_u16(),
                    backoff_ms = backoff.as_millis() as u64,
                    "server error, retrying"
                );
                tokio::time::sleep(backoff).await;
                server_attempt += 1;
                continue;
            }

            return Ok(response);
        }
    }
}
