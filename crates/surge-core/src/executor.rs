//! HTTP request execution and latency measurement.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Method;
use tokio_util::sync::CancellationToken;

use crate::error::{SurgeError, SurgeResult};

/// Method, headers and body shared by every request of a run.
///
/// The URL is not part of the template; workers supply it per request.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestTemplate {
    pub fn new(method: Method, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self {
            method,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self::new(Method::GET, HeaderMap::new(), None)
    }
}

/// Outcome of a single request/response cycle.
///
/// Status 0 is reserved for requests that never received an HTTP status. The
/// constructors guarantee it always comes with an error, so a result can never
/// be "status 0 and no error".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    latency: Duration,
    status: u16,
    error: Option<String>,
}

/// Error attached to a result that carries neither a status nor a cause.
pub const MISSING_STATUS_ERROR: &str = "no status code received";

impl RequestResult {
    /// A response with an HTTP status.
    ///
    /// A status of 0 is not a valid HTTP status and is recorded as a transport
    /// failure.
    pub fn new(status: u16, latency: Duration) -> Self {
        if status == 0 {
            return Self::failed(MISSING_STATUS_ERROR, latency);
        }
        Self {
            latency,
            status,
            error: None,
        }
    }

    /// A request that failed before any status arrived (connect, DNS, timeout).
    pub fn failed(error: impl Into<String>, latency: Duration) -> Self {
        Self {
            latency,
            status: 0,
            error: Some(error.into()),
        }
    }

    /// A status was received but the exchange failed afterwards.
    pub fn with_error(status: u16, error: impl Into<String>, latency: Duration) -> Self {
        Self {
            latency,
            status,
            error: Some(error.into()),
        }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// HTTP status, or 0 for a transport failure.
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// No error and a status below 400.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status < 400
    }
}

/// Performs one request for a worker.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Execute `template` against `url`.
    ///
    /// Returns `None` when `cancel` fired before the exchange completed; the
    /// in-flight request is dropped and no result must be recorded for it.
    async fn execute(
        &self,
        template: &RequestTemplate,
        url: &str,
        cancel: &CancellationToken,
    ) -> Option<RequestResult>;
}

/// reqwest-backed executor with a keep-alive connection pool.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Build an executor sized for `concurrency` workers.
    pub fn new(concurrency: usize, timeout: Duration) -> SurgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(concurrency.max(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SurgeError::HttpClient(e.to_string()))?;

        Ok(Self { client })
    }

    async fn exchange(&self, template: &RequestTemplate, url: &str) -> RequestResult {
        let start = Instant::now();

        let mut request = self
            .client
            .request(template.method().clone(), url)
            .headers(template.headers().clone());
        if let Some(body) = template.body() {
            request = request.body(body.clone());
        }

        match request.send().await {
            Ok(response) => {
                let latency = start.elapsed();
                let status = response.status().as_u16();

                // Drain the body so the connection goes back to the pool
                match response.bytes().await {
                    Ok(_) => RequestResult::new(status, latency),
                    Err(e) => RequestResult::with_error(status, e.to_string(), latency),
                }
            }
            Err(e) => RequestResult::failed(e.to_string(), start.elapsed()),
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(
        &self,
        template: &RequestTemplate,
        url: &str,
        cancel: &CancellationToken,
    ) -> Option<RequestResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.exchange(template, url) => Some(result),
        }
    }
}
