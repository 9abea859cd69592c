//! Load test orchestration: worker lifecycle, deadline and result draining.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::{SurgeError, SurgeResult};
use crate::executor::{HttpExecutor, RequestExecutor, RequestResult};
use crate::rate_limiter::RateLimiter;
use crate::selector::EndpointSelector;
use crate::stats::{StatsCollector, Summary};
use crate::worker::{Worker, WorkerStats};

/// How long workers get to notice cancellation before they are aborted.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Executes a load test with a fixed number of workers for a fixed duration.
pub struct LoadRunner {
    config: RunConfig,
    executor: Arc<dyn RequestExecutor>,
    stats: Arc<StatsCollector>,
    cancel: CancellationToken,
}

impl LoadRunner {
    /// Create a runner that sends real HTTP requests.
    pub fn new(config: RunConfig) -> SurgeResult<Self> {
        let executor = HttpExecutor::new(config.concurrency, config.request_timeout)?;
        Ok(Self::with_executor(config, Arc::new(executor)))
    }

    /// Create a runner with a custom executor.
    pub fn with_executor(config: RunConfig, executor: Arc<dyn RequestExecutor>) -> Self {
        Self {
            config,
            executor,
            stats: Arc::new(StatsCollector::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Live statistics, for progress polling while the run is in flight.
    pub fn stats(&self) -> Arc<StatsCollector> {
        self.stats.clone()
    }

    /// Token that ends the run early when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the load test to completion.
    ///
    /// Fails only on configuration errors, before any request is sent. Request
    /// failures are part of the returned summary.
    pub async fn run(self) -> SurgeResult<Summary> {
        self.config.validate()?;
        let selector = Arc::new(
            EndpointSelector::new(self.config.urls.clone()).ok_or(SurgeError::NoEndpoints)?,
        );
        let template = Arc::new(self.config.request_template()?);

        info!(
            endpoints = selector.len(),
            concurrency = self.config.concurrency,
            duration_ms = self.config.duration.as_millis() as u64,
            max_rps = self.config.max_rps,
            "Starting load test"
        );

        let (result_tx, result_rx) = mpsc::channel(self.config.result_buffer());
        let deadline = self.cancel.child_token();
        let started = Instant::now();
        self.stats.start().await;

        // The consumer must be running before the first result can be produced
        let collector = tokio::spawn(collect(self.stats.clone(), result_rx));

        let rate_limiter = RateLimiter::new(self.config.max_rps).map(Arc::new);

        let mut workers = JoinSet::new();
        for id in 0..self.config.concurrency {
            let worker = Worker::new(
                id,
                self.executor.clone(),
                template.clone(),
                result_tx.clone(),
                rate_limiter.clone(),
                selector.clone(),
            );
            workers.spawn(worker.run(deadline.clone()));
        }

        tokio::select! {
            _ = tokio::time::sleep(self.config.duration) => {
                info!("Duration elapsed, stopping workers");
            }
            _ = deadline.cancelled() => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Load test cancelled"
                );
            }
        }
        deadline.cancel();
        if let Some(limiter) = &rate_limiter {
            limiter.stop();
        }

        // Every producer is gone before our sender is dropped and the channel closes
        let workers_total = join_workers(&mut workers).await;
        drop(result_tx);

        let received = collector
            .await
            .map_err(|e| SurgeError::Internal(format!("collector task failed: {}", e)))?;
        self.stats.finalize().await;

        debug!(
            sent = workers_total.sent,
            delivered = workers_total.delivered,
            abandoned = workers_total.abandoned,
            received,
            "Workers drained"
        );

        let summary = self.stats.summary().await;
        info!(
            total = summary.total_requests,
            success = summary.successful_requests,
            failed = summary.failed_requests,
            rps = summary.requests_per_second,
            "Load test complete"
        );
        Ok(summary)
    }
}

/// Run a load test with the default HTTP executor.
pub async fn run(config: RunConfig) -> SurgeResult<Summary> {
    LoadRunner::new(config)?.run().await
}

/// Feed every result into the collector until all senders are dropped.
async fn collect(stats: Arc<StatsCollector>, mut results: mpsc::Receiver<RequestResult>) -> u64 {
    let mut received = 0;
    while let Some(result) = results.recv().await {
        stats.add_result(result).await;
        received += 1;
    }
    received
}

/// Wait for all workers, aborting stragglers after the grace period.
async fn join_workers(workers: &mut JoinSet<WorkerStats>) -> WorkerStats {
    let mut total = WorkerStats::default();

    let joined = tokio::time::timeout(WORKER_SHUTDOWN_GRACE, async {
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(stats) => total.merge(&stats),
                Err(e) => warn!(error = %e, "Worker task failed"),
            }
        }
    })
    .await;

    if joined.is_err() {
        warn!(
            remaining = workers.len(),
            "Workers did not stop within grace period, aborting"
        );
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RequestTemplate;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Scripted executor: fixed status, fixed service time, records URLs.
    struct ScriptedExecutor {
        status: u16,
        delay: Duration,
        calls: AtomicU64,
        urls: Mutex<HashSet<String>>,
    }

    impl ScriptedExecutor {
        fn new(status: u16, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                status,
                delay,
                calls: AtomicU64::new(0),
                urls: Mutex::new(HashSet::new()),
            })
        }
    }

    #[async_trait]
    impl RequestExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            _template: &RequestTemplate,
            url: &str,
            cancel: &CancellationToken,
        ) -> Option<RequestResult> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.urls.lock().unwrap().insert(url.to_string());
            tokio::select! {
                _ = cancel.cancelled() => None,
                _ = tokio::time::sleep(self.delay) => Some(if self.status == 0 {
                    RequestResult::failed("connection refused", self.delay)
                } else {
                    RequestResult::new(self.status, self.delay)
                }),
            }
        }
    }

    fn config(urls: &[&str]) -> RunConfig {
        RunConfig::new(urls.iter().map(|s| s.to_string()).collect())
            .with_concurrency(4)
            .with_duration(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_no_endpoints_fails_before_start() {
        let executor = ScriptedExecutor::new(200, Duration::from_millis(1));
        let runner = LoadRunner::with_executor(config(&[]), executor.clone());

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, SurgeError::NoEndpoints));
        assert_eq!(executor.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_fails_before_start() {
        let executor = ScriptedExecutor::new(200, Duration::from_millis(1));
        let runner = LoadRunner::with_executor(
            config(&["http://localhost/a"]).with_concurrency(0),
            executor.clone(),
        );

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, SurgeError::InvalidConcurrency));
        assert_eq!(executor.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_oversized_result_buffer_fails_before_start() {
        let executor = ScriptedExecutor::new(200, Duration::from_millis(1));
        let mut config = config(&["http://localhost/a"]).with_concurrency(1);
        config.result_buffer_factor = usize::MAX / 4;
        let runner = LoadRunner::with_executor(config, executor.clone());

        let err = runner.run().await.unwrap_err();
        assert!(matches!(err, SurgeError::InvalidResultBuffer(_)));
        assert_eq!(executor.calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_run_lasts_for_duration() {
        let executor = ScriptedExecutor::new(200, Duration::from_millis(2));
        let runner = LoadRunner::with_executor(config(&["http://localhost/a"]), executor);

        let started = Instant::now();
        let summary = runner.run().await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(2));
        assert!(summary.total_requests > 0);
        assert_eq!(summary.failed_requests, 0);
        assert_eq!(
            summary.successful_requests + summary.failed_requests,
            summary.total_requests
        );
        assert_eq!(
            summary.status_codes.values().sum::<u64>(),
            summary.total_requests
        );
        assert!(summary.duration >= Duration::from_millis(300));
        assert!(summary.requests_per_second > 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_transport_failures_use_sentinel() {
        let executor = ScriptedExecutor::new(0, Duration::from_millis(2));
        let runner = LoadRunner::with_executor(config(&["http://localhost/a"]), executor);

        let summary = runner.run().await.unwrap();
        assert!(summary.total_requests > 0);
        assert_eq!(summary.successful_requests, 0);
        assert_eq!(summary.failed_requests, summary.total_requests);
        assert_eq!(summary.status_codes.len(), 1);
        assert_eq!(summary.transport_errors(), summary.total_requests);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_endpoints_are_used() {
        let executor = ScriptedExecutor::new(200, Duration::from_millis(1));
        let urls = ["http://localhost/a", "http://localhost/b", "http://localhost/c"];
        let runner = LoadRunner::with_executor(config(&urls), executor.clone());

        runner.run().await.unwrap();

        let seen = executor.urls.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for url in urls {
            assert!(seen.contains(url));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_early_cancellation_still_reports() {
        let executor = ScriptedExecutor::new(200, Duration::from_millis(2));
        let runner = LoadRunner::with_executor(
            config(&["http://localhost/a"]).with_duration(Duration::from_secs(30)),
            executor,
        );
        let cancel = runner.cancel_token();
        let stats = runner.stats();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let summary = runner.run().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(summary.total_requests > 0);

        // The shared handle saw the same final state
        assert!(stats.is_finalized().await);
        assert_eq!(stats.progress().await.total_requests, summary.total_requests);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hanging_requests_are_abandoned() {
        let executor = ScriptedExecutor::new(200, Duration::from_secs(60));
        let runner = LoadRunner::with_executor(config(&["http://localhost/a"]), executor.clone());

        let started = Instant::now();
        let summary = runner.run().await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(executor.calls.load(Ordering::Relaxed), 4);
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.latency_max, Duration::ZERO);
        assert_eq!(summary.requests_per_second, 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rate_limit_bounds_total() {
        let executor = ScriptedExecutor::new(200, Duration::from_micros(100));
        let runner = LoadRunner::with_executor(
            config(&["http://localhost/a"])
                .with_concurrency(8)
                .with_duration(Duration::from_secs(1))
                .with_max_rps(50),
            executor,
        );

        let summary = runner.run().await.unwrap();
        // 50 rps for 1s, 10% tick slack plus the immediate first permit
        assert!(summary.total_requests <= 56, "total {}", summary.total_requests);
        assert!(summary.total_requests >= 30, "total {}", summary.total_requests);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_small_buffer_loses_nothing() {
        let executor = ScriptedExecutor::new(204, Duration::from_micros(200));
        let mut config = config(&["http://localhost/a"]).with_concurrency(16);
        config.result_buffer_factor = 1;
        let runner = LoadRunner::with_executor(config, executor.clone());

        let summary = runner.run().await.unwrap();
        let calls = executor.calls.load(Ordering::Relaxed);

        // Each call ends as a recorded result, an abandoned request, or a result
        // still waiting for buffer space when the deadline hit
        assert!(summary.total_requests > 0);
        assert!(summary.total_requests <= calls);
        assert!(calls - summary.total_requests <= 16);
        assert_eq!(summary.status_codes.get(&204), Some(&summary.total_requests));
    }
}
