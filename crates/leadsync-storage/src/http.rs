//! Rate-limited JSON HTTP client shared by remote backend clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RetryDisposition {
    /// Quota exhaustion (429), request timeouts (408) and server faults are
    /// worth another attempt; every other status is final.
    pub fn for_status(status: StatusCode) -> Self {
        match status.as_u16() {
            408 | 429 | 500..=599 => Self::Retryable,
            _ => Self::NonRetryable,
        }
    }

    pub fn for_transport(err: &reqwest::Error) -> Self {
        if err.is_builder() || err.is_redirect() || err.is_decode() {
            Self::NonRetryable
        } else if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }
}

/// Doubling backoff between attempts. A `Retry-After` hint from the server
/// replaces the computed delay, still bounded by `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(32),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_before_retry(&self, retry: usize, hint: Option<Duration>) -> Duration {
        let computed = match u32::try_from(retry).ok().and_then(|r| 2u32.checked_pow(r)) {
            Some(factor) => self.base_delay.saturating_mul(factor),
            None => self.max_delay,
        };
        hint.unwrap_or(computed).min(self.max_delay)
    }
}

/// Seconds form of `Retry-After`; the HTTP-date form is ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Request budget: `capacity` calls may go out back to back, after which
/// calls are spaced `refill_every` apart.
#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl TokenBucketConfig {
    /// Spreads `per_minute` requests evenly, allowing a burst of the same size.
    pub fn per_minute(per_minute: u32) -> Self {
        let per_minute = per_minute.max(1);
        Self {
            capacity: per_minute,
            refill_every: Duration::from_millis(60_000 / u64::from(per_minute)),
        }
    }
}

/// Paces calls against a [`TokenBucketConfig`] by booking each call a slot
/// on a virtual timeline. A caller only sleeps once the booked slots run
/// further ahead of now than the burst allows.
#[derive(Debug)]
pub struct RequestPacer {
    spacing: Duration,
    burst: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(budget: TokenBucketConfig) -> Self {
        Self {
            spacing: budget.refill_every,
            burst: budget
                .refill_every
                .saturating_mul(budget.capacity.saturating_sub(1)),
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let wait = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next_slot.map_or(now, |at| at.max(now));
            *next_slot = Some(slot + self.spacing);
            slot.saturating_duration_since(now).saturating_sub(self.burst)
        };
        if !wait.is_zero() {
            debug!(?wait, "request budget exhausted, pacing");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub bearer_token: Option<String>,
    pub concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(format!("leadsync/{}", env!("CARGO_PKG_VERSION"))),
            bearer_token: None,
            concurrency: 8,
            backoff: BackoffPolicy::default(),
            token_bucket: Some(TokenBucketConfig::per_minute(60)),
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("invalid url {0}")]
    Url(String),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Request(err) => RetryDisposition::for_transport(err),
            Self::Status { status, .. } => StatusCode::from_u16(*status)
                .map(RetryDisposition::for_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            Self::Url(_) => RetryDisposition::NonRetryable,
        }
    }
}

/// JSON client with a global concurrency cap, an optional token bucket and
/// exponential backoff for requests the caller marks idempotent.
#[derive(Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    bearer_token: Option<String>,
    limit: Arc<Semaphore>,
    pacer: Option<Arc<RequestPacer>>,
    backoff: BackoffPolicy,
}

impl ApiClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let pacer = config.token_bucket.map(|budget| Arc::new(RequestPacer::new(budget)));

        Ok(Self {
            client,
            bearer_token: config.bearer_token,
            limit: Arc::new(Semaphore::new(config.concurrency.max(1))),
            pacer,
            backoff: config.backoff,
        })
    }

    pub fn parse_url(&self, url: &str) -> Result<Url, HttpError> {
        Url::parse(url).map_err(|_| HttpError::Url(url.to_string()))
    }

    /// Sends one request and decodes the JSON body (`null` for empty bodies).
    /// Only `idempotent` requests are retried on 429/5xx or connect failures.
    pub async fn send_json(
        &self,
        method: Method,
        url: Url,
        body: Option<&JsonValue>,
        idempotent: bool,
    ) -> Result<JsonValue, HttpError> {
        let _permit = self.limit.acquire().await.expect("semaphore not closed");
        let max_retries = if idempotent { self.backoff.max_retries } else { 0 };

        let mut attempt = 0;
        loop {
            let mut hint = None;
            if let Some(pacer) = &self.pacer {
                pacer.acquire().await;
            }

            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let outcome = match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp.bytes().await?;
                        if bytes.is_empty() {
                            return Ok(JsonValue::Null);
                        }
                        return serde_json::from_slice(&bytes).map_err(|err| HttpError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                            body: format!("undecodable response body: {err}"),
                        });
                    }
                    hint = retry_after(resp.headers());
                    let body = resp.text().await.unwrap_or_default();
                    HttpError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                        body,
                    }
                }
                Err(err) => HttpError::Request(err),
            };

            if outcome.disposition() == RetryDisposition::Retryable && attempt < max_retries {
                let delay = self.backoff.delay_before_retry(attempt, hint);
                warn!(%url, attempt, ?delay, error = %outcome, "retrying request");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            debug!(%url, error = %outcome, "request failed");
            return Err(outcome);
        }
    }
}
