//! HTTP load generation engine.
//!
//! A fixed pool of workers sends requests to one or more endpoints for a fixed
//! duration, optionally capped at a global request rate. Results flow through
//! a bounded channel into a [`StatsCollector`], which produces a [`Summary`]
//! with throughput, latency percentiles and a status code histogram.
//!
//! ```ignore
//! use surge_core::{LoadRunner, RunConfig};
//! use std::time::Duration;
//!
//! let config = RunConfig::new(vec!["http://localhost:8080/".into()])
//!     .with_concurrency(50)
//!     .with_duration(Duration::from_secs(30));
//! let summary = LoadRunner::new(config)?.run().await?;
//! println!("{:.1} req/s", summary.requests_per_second);
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod rate_limiter;
pub mod runner;
pub mod selector;
pub mod stats;
pub mod worker;

pub use config::{parse_header, RunConfig};
pub use error::{SurgeError, SurgeResult};
pub use executor::{HttpExecutor, RequestExecutor, RequestResult, RequestTemplate};
pub use rate_limiter::RateLimiter;
pub use runner::{run, LoadRunner};
pub use selector::EndpointSelector;
pub use stats::{percentile, ProgressSnapshot, StatsCollector, Summary};
pub use worker::{Worker, WorkerStats};
