//! Error types for surge load runs.

use thiserror::Error;

/// Result type alias using SurgeError.
pub type SurgeResult<T> = Result<T, SurgeError>;

/// Errors that abort a run before any load is generated.
///
/// Per-request failures never surface here; they are folded into the run
/// statistics as failed results.
#[derive(Debug, Error)]
pub enum SurgeError {
    // === Configuration Errors ===
    #[error("at least one URL is required")]
    NoEndpoints,

    #[error("concurrency must be greater than 0")]
    InvalidConcurrency,

    #[error("duration must be greater than 0")]
    InvalidDuration,

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid header format: {header} ({message})")]
    InvalidHeader { header: String, message: String },

    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("result buffer too large: {0}")]
    InvalidResultBuffer(String),

    // === Infrastructure Errors ===
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid run file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SurgeError {
    /// Stable machine-readable code for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            SurgeError::NoEndpoints => "no_endpoints",
            SurgeError::InvalidConcurrency => "invalid_concurrency",
            SurgeError::InvalidDuration => "invalid_duration",
            SurgeError::InvalidMethod(_) => "invalid_method",
            SurgeError::InvalidHeader { .. } => "invalid_header",
            SurgeError::InvalidUrl { .. } => "invalid_url",
            SurgeError::InvalidResultBuffer(_) => "invalid_result_buffer",
            SurgeError::HttpClient(_) => "http_client",
            SurgeError::Io(_) => "io",
            SurgeError::Yaml(_) => "yaml",
            SurgeError::Internal(_) => "internal",
        }
    }

    /// Whether this error stems from the run configuration rather than the environment.
    pub fn is_config_error(&self) -> bool {
        !matches!(
            self,
            SurgeError::HttpClient(_) | SurgeError::Io(_) | SurgeError::Internal(_)
        )
    }
}
