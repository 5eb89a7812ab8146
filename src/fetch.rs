use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::debug;

use crate::observe::ErrorSink;

/// Failure classification for a single fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Timeout or dropped connection; worth retrying.
    #[error("transient network failure: {0}")]
    Transient(String),
    /// Server answered with a non-success status; retrying will not help.
    #[error("http status {status} for {url}")]
    Status { status: StatusCode, url: String },
    /// Any other request failure (bad URL, TLS, body decode).
    #[error("request failed: {0}")]
    Request(String),
    /// Transient failures persisted through the whole retry budget.
    #[error("retries exhausted after {attempts} attempts: {url}")]
    RetriesExhausted { url: String, attempts: u32 },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient network failure",
            FetchError::Status { .. } => "http error status",
            FetchError::Request(_) => "request failed",
            FetchError::RetriesExhausted { .. } => "retries exhausted",
        }
    }
}

/// Fixed-delay retry policy applied at the fetcher boundary.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// One HTTP GET, no retry and no gating. Implemented by the reqwest client
/// in production and by stubs in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        query: &[(String, String)],
    ) -> Result<String, FetchError>;
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() {
        FetchError::Transient(err.to_string())
    } else {
        FetchError::Request(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        query: &[(String, String)],
    ) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .query(query)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                url: url.to_string(),
            });
        }

        response.text().await.map_err(classify)
    }
}

/// Bounded fetcher: a shared admission gate around a transport, plus a
/// fixed-delay retry loop for transient failures.
///
/// The gate caps simultaneous in-flight requests for one source session no
/// matter how many walker tasks are asking; a permit is held for the whole
/// call, retries included.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    gate: Arc<Semaphore>,
    policy: RetryPolicy,
    sink: Arc<dyn ErrorSink>,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        max_in_flight: usize,
        policy: RetryPolicy,
        sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            transport,
            gate: Arc::new(Semaphore::new(max_in_flight)),
            policy,
            sink,
        }
    }

    /// Fetch one page body. Transient failures are retried with a fixed
    /// delay up to the policy's attempt budget; everything else propagates
    /// immediately. Every terminal failure is reported to the sink.
    pub async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
        query: &[(String, String)],
    ) -> Result<String, FetchError> {
        let _permit = self.gate.acquire().await.expect("admission gate closed");

        let mut attempt = 1;
        loop {
            match self.transport.get(url, headers, query).await {
                Ok(body) => return Ok(body),
                Err(FetchError::Transient(reason)) => {
                    if attempt >= self.policy.max_attempts {
                        let err = FetchError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                        };
                        self.sink.record(url, err.kind());
                        return Err(err);
                    }
                    debug!(url, attempt, %reason, "transient failure, retrying");
                    attempt += 1;
                    sleep(self.policy.delay).await;
                }
                Err(err) => {
                    self.sink.record(url, err.kind());
                    return Err(err);
                }
            }
        }
    }
}
