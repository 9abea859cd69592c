//! Run configuration loading and validation.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

use crate::error::{SurgeError, SurgeResult};
use crate::executor::RequestTemplate;

/// Upper bound on result channel slots, well below tokio's semaphore limit.
pub const MAX_RESULT_BUFFER: usize = 1 << 20;

/// Immutable description of a single load run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Target URLs, visited round-robin.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(with = "humantime_duration", default = "default_duration")]
    pub duration: Duration,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Maximum aggregate requests per second (0 = no limit)
    #[serde(default)]
    pub max_rps: u32,
    #[serde(with = "humantime_duration", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Result channel slots per worker
    #[serde(default = "default_result_buffer_factor")]
    pub result_buffer_factor: usize,
}

fn default_concurrency() -> usize {
    10
}

fn default_duration() -> Duration {
    Duration::from_secs(10)
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_result_buffer_factor() -> usize {
    10
}

impl RunConfig {
    /// Create a configuration for the given URLs with default settings.
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            concurrency: default_concurrency(),
            duration: default_duration(),
            method: default_method(),
            body: None,
            headers: BTreeMap::new(),
            max_rps: 0,
            request_timeout: default_request_timeout(),
            result_buffer_factor: default_result_buffer_factor(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_max_rps(mut self, max_rps: u32) -> Self {
        self.max_rps = max_rps;
        self
    }

    /// Load a run file from YAML.
    pub fn from_file(path: impl AsRef<Path>) -> SurgeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> SurgeResult<()> {
        if self.urls.is_empty() {
            return Err(SurgeError::NoEndpoints);
        }
        if self.concurrency == 0 {
            return Err(SurgeError::InvalidConcurrency);
        }
        if self.duration.is_zero() {
            return Err(SurgeError::InvalidDuration);
        }
        match self.concurrency.checked_mul(self.result_buffer_factor.max(1)) {
            Some(slots) if slots <= MAX_RESULT_BUFFER => {}
            _ => {
                return Err(SurgeError::InvalidResultBuffer(format!(
                    "{} workers x {} slots exceeds {}",
                    self.concurrency, self.result_buffer_factor, MAX_RESULT_BUFFER
                )))
            }
        }
        for url in &self.urls {
            Url::parse(url).map_err(|e| SurgeError::InvalidUrl {
                url: url.clone(),
                message: e.to_string(),
            })?;
        }
        self.request_template()?;
        Ok(())
    }

    /// Capacity of the result channel shared by all workers, capped at
    /// [`MAX_RESULT_BUFFER`].
    pub fn result_buffer(&self) -> usize {
        self.concurrency
            .checked_mul(self.result_buffer_factor.max(1))
            .unwrap_or(MAX_RESULT_BUFFER)
            .clamp(1, MAX_RESULT_BUFFER)
    }

    /// Build the per-request template (everything but the URL).
    pub fn request_template(&self) -> SurgeResult<RequestTemplate> {
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|_| SurgeError::InvalidMethod(self.method.clone()))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| SurgeError::InvalidHeader {
                    header: name.clone(),
                    message: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| SurgeError::InvalidHeader {
                    header: name.clone(),
                    message: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        let body = self
            .body
            .as_ref()
            .filter(|b| !b.is_empty())
            .map(|b| Bytes::from(b.clone()));

        Ok(RequestTemplate::new(method, headers, body))
    }
}

/// Parse a `Key: Value` header argument.
///
/// Splits on the first colon so values may themselves contain colons.
pub fn parse_header(raw: &str) -> SurgeResult<(String, String)> {
    let (key, value) = raw.split_once(':').ok_or_else(|| SurgeError::InvalidHeader {
        header: raw.to_string(),
        message: "expected 'Key: Value'".to_string(),
    })?;

    let key = key.trim();
    if key.is_empty() {
        return Err(SurgeError::InvalidHeader {
            header: raw.to_string(),
            message: "empty header name".to_string(),
        });
    }

    Ok((key.to_string(), value.trim().to_string()))
}

/// Serde adapter for durations written as `10s`, `1m30s`, `250ms`.
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
