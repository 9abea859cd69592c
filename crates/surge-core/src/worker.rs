//! Worker request loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::{RequestExecutor, RequestResult, RequestTemplate};
use crate::rate_limiter::RateLimiter;
use crate::selector::EndpointSelector;

/// Counters kept by a single worker, reported when it exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    /// Requests started
    pub sent: u64,
    /// Results handed to the collector
    pub delivered: u64,
    /// Requests dropped mid-flight by cancellation
    pub abandoned: u64,
}

impl WorkerStats {
    /// Add another worker's counters to these.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.sent += other.sent;
        self.delivered += other.delivered;
        self.abandoned += other.abandoned;
    }
}

/// Sends requests in a loop until cancelled.
///
/// Each iteration: check cancellation, wait for a rate permit, pick the next
/// endpoint, execute, deliver the result. Every wait point also watches the
/// cancellation token so a worker exits promptly once the run ends.
pub struct Worker {
    id: usize,
    executor: Arc<dyn RequestExecutor>,
    template: Arc<RequestTemplate>,
    results: mpsc::Sender<RequestResult>,
    rate_limiter: Option<Arc<RateLimiter>>,
    selector: Arc<EndpointSelector>,
}

impl Worker {
    pub fn new(
        id: usize,
        executor: Arc<dyn RequestExecutor>,
        template: Arc<RequestTemplate>,
        results: mpsc::Sender<RequestResult>,
        rate_limiter: Option<Arc<RateLimiter>>,
        selector: Arc<EndpointSelector>,
    ) -> Self {
        Self {
            id,
            executor,
            template,
            results,
            rate_limiter,
            selector,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run the request loop. Consumes the worker, so its result sender is
    /// dropped when the loop ends.
    pub async fn run(self, cancel: CancellationToken) -> WorkerStats {
        let mut stats = WorkerStats::default();
        debug!(worker_id = self.id, "Worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if let Some(limiter) = &self.rate_limiter {
                if !limiter.acquire(&cancel).await {
                    break;
                }
            }

            let url = self.selector.next();
            stats.sent += 1;

            let Some(result) = self.executor.execute(&self.template, url, &cancel).await else {
                stats.abandoned += 1;
                break;
            };

            // A completed result is kept if the sink has room; a full sink only
            // blocks until the run is cancelled.
            tokio::select! {
                biased;
                sent = self.results.send(result) => {
                    if sent.is_err() {
                        debug!(worker_id = self.id, "Result sink closed");
                        break;
                    }
                    stats.delivered += 1;
                }
                _ = cancel.cancelled() => break,
            }
        }

        debug!(
            worker_id = self.id,
            sent = stats.sent,
            delivered = stats.delivered,
            abandoned = stats.abandoned,
            "Worker stopped"
        );
        stats
    }
}
