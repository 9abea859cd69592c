//! Run statistics collection and summary computation.

use std::collections::BTreeMap;
use std::time::{Duration, Instant, SystemTime};

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::executor::RequestResult;

/// Mutable aggregate state, only touched under the collector's lock.
#[derive(Debug, Default)]
struct RunningStats {
    total: u64,
    success: u64,
    failed: u64,
    status_codes: BTreeMap<u16, u64>,
    latencies: Vec<Duration>,
    started_at: Option<Instant>,
    started_wall: Option<SystemTime>,
    finished_at: Option<Instant>,
    /// Results rejected because they arrived after finalize
    late: u64,
}

impl RunningStats {
    fn started(now: Instant, wall: SystemTime) -> Self {
        Self {
            started_at: Some(now),
            started_wall: Some(wall),
            ..Self::default()
        }
    }
}

/// Aggregates per-request results from all workers.
///
/// A single read/write lock guards the counters and the latency list: results
/// take the write side, progress snapshots and the final summary the read side.
#[derive(Debug)]
pub struct StatsCollector {
    inner: RwLock<RunningStats>,
}

/// Cheap view of the running counters for interim display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

/// Final statistics of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Responses per HTTP status; key 0 counts transport failures
    pub status_codes: BTreeMap<u16, u64>,
    pub latency_min: Duration,
    pub latency_avg: Duration,
    pub latency_max: Duration,
    pub latency_p90: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    pub requests_per_second: f64,
    pub duration: Duration,
    pub started_at: SystemTime,
    pub ended_at: SystemTime,
}

impl Summary {
    /// Percentage of successful requests (0 when nothing was sent).
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.successful_requests as f64 / self.total_requests as f64) * 100.0
        }
    }

    /// Number of requests that never received an HTTP status.
    pub fn transport_errors(&self) -> u64 {
        self.status_codes.get(&0).copied().unwrap_or(0)
    }
}

impl StatsCollector {
    /// Create a collector; the run clock starts now.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RunningStats::started(Instant::now(), SystemTime::now())),
        }
    }

    /// Reset all state and restart the run clock.
    ///
    /// Lets a progress consumer hold the collector before the run begins.
    pub async fn start(&self) {
        let mut stats = self.inner.write().await;
        *stats = RunningStats::started(Instant::now(), SystemTime::now());
    }

    /// Record one result.
    pub async fn add_result(&self, result: RequestResult) {
        let status = result.status();
        let latency = result.latency();
        let success = result.is_success();

        {
            let mut stats = self.inner.write().await;
            if stats.finished_at.is_some() {
                stats.late += 1;
                if stats.late == 1 {
                    tracing::warn!(status, "Result received after finalize, dropping");
                } else {
                    tracing::debug!(status, late = stats.late, "Dropping late result");
                }
                return;
            }

            stats.total += 1;
            if success {
                stats.success += 1;
            } else {
                stats.failed += 1;
            }
            *stats.status_codes.entry(status).or_insert(0) += 1;
            stats.latencies.push(latency);
        }

        counter!("surge_requests_total", "status" => status.to_string()).increment(1);
        histogram!("surge_request_latency_seconds").record(latency.as_secs_f64());
    }

    /// Point-in-time counters.
    pub async fn progress(&self) -> ProgressSnapshot {
        let stats = self.inner.read().await;
        ProgressSnapshot {
            total_requests: stats.total,
            successful_requests: stats.success,
            failed_requests: stats.failed,
        }
    }

    /// Freeze the end of the run. Later calls keep the first timestamp.
    pub async fn finalize(&self) {
        let mut stats = self.inner.write().await;
        if stats.finished_at.is_none() {
            stats.finished_at = Some(Instant::now());
        }
    }

    /// Results dropped because they arrived after finalize.
    pub async fn late_results(&self) -> u64 {
        self.inner.read().await.late
    }

    pub async fn is_finalized(&self) -> bool {
        self.inner.read().await.finished_at.is_some()
    }

    /// Time since the run clock started, frozen once finalized.
    pub async fn elapsed(&self) -> Duration {
        let stats = self.inner.read().await;
        let now = stats.finished_at.unwrap_or_else(Instant::now);
        stats
            .started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Compute the summary.
    ///
    /// Intended for a finalized collector; before `finalize` the duration runs
    /// up to now.
    pub async fn summary(&self) -> Summary {
        let stats = self.inner.read().await;

        let finished_at = stats.finished_at.unwrap_or_else(Instant::now);
        let duration = stats
            .started_at
            .map(|start| finished_at.saturating_duration_since(start))
            .unwrap_or_default();
        let started_wall = stats.started_wall.unwrap_or_else(SystemTime::now);
        let duration_secs = duration.as_secs_f64();
        let requests_per_second = if duration_secs > 0.0 {
            stats.total as f64 / duration_secs
        } else {
            0.0
        };

        let mut summary = Summary {
            total_requests: stats.total,
            successful_requests: stats.success,
            failed_requests: stats.failed,
            status_codes: stats.status_codes.clone(),
            latency_min: Duration::ZERO,
            latency_avg: Duration::ZERO,
            latency_max: Duration::ZERO,
            latency_p90: Duration::ZERO,
            latency_p95: Duration::ZERO,
            latency_p99: Duration::ZERO,
            requests_per_second,
            duration,
            started_at: started_wall,
            ended_at: started_wall + duration,
        };

        if stats.latencies.is_empty() {
            return summary;
        }

        let mut min = stats.latencies[0];
        let mut max = stats.latencies[0];
        let mut sum: u128 = 0;
        for &latency in &stats.latencies {
            min = min.min(latency);
            max = max.max(latency);
            sum += latency.as_nanos();
        }
        let avg_nanos = sum / stats.latencies.len() as u128;

        let mut sorted = stats.latencies.clone();
        sorted.sort_unstable();

        summary.latency_min = min;
        summary.latency_max = max;
        summary.latency_avg = Duration::from_nanos(avg_nanos as u64);
        summary.latency_p90 = percentile(&sorted, 90.0);
        summary.latency_p95 = percentile(&sorted, 95.0);
        summary.latency_p99 = percentile(&sorted, 99.0);
        summary
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear-interpolation percentile over an ascending slice.
///
/// The rank is `p/100 * (n-1)`; the fractional part blends the two samples
/// around it.
pub fn percentile(sorted: &[Duration], p: f64) -> Duration {
    match sorted.len() {
        0 => Duration::ZERO,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = (rank.ceil() as usize).min(n - 1);
            let fraction = rank - lower as f64;

            let low = sorted[lower].as_nanos() as f64;
            let high = sorted[upper].as_nanos() as f64;
            Duration::from_nanos((low + (high - low) * fraction).round() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_percentile_empty_and_single() {
        assert_eq!(percentile(&[], 99.0), Duration::ZERO);
        assert_eq!(percentile(&[ms(7)], 50.0), ms(7));
        assert_eq!(percentile(&[ms(7)], 99.0), ms(7));
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [ms(10), ms(20), ms(30), ms(40), ms(50)];
        assert_eq!(percentile(&sorted, 0.0), ms(10));
        assert_eq!(percentile(&sorted, 50.0), ms(30));
        assert_eq!(percentile(&sorted, 100.0), ms(50));
        // rank 3.6 -> 40 + 0.6 * 10
        assert_eq!(percentile(&sorted, 90.0), ms(46));
        // rank 0.4 -> 10 + 0.4 * 10
        assert_eq!(percentile(&sorted, 10.0), ms(14));
    }

    #[test]
    fn test_percentile_two_samples() {
        let sorted = [ms(0), ms(100)];
        assert_eq!(percentile(&sorted, 95.0), ms(95));
    }

    #[tokio::test]
    async fn test_empty_summary_is_zero() {
        let collector = StatsCollector::new();
        collector.finalize().await;

        let summary = collector.summary().await;
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.successful_requests, 0);
        assert_eq!(summary.failed_requests, 0);
        assert!(summary.status_codes.is_empty());
        assert_eq!(summary.latency_min, Duration::ZERO);
        assert_eq!(summary.latency_avg, Duration::ZERO);
        assert_eq!(summary.latency_max, Duration::ZERO);
        assert_eq!(summary.latency_p99, Duration::ZERO);
        assert_eq!(summary.requests_per_second, 0.0);
        assert_eq!(summary.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_classification_and_histogram() {
        let collector = StatsCollector::new();
        collector.add_result(RequestResult::new(200, ms(10))).await;
        collector.add_result(RequestResult::new(201, ms(12))).await;
        collector.add_result(RequestResult::new(301, ms(3))).await;
        collector.add_result(RequestResult::new(404, ms(4))).await;
        collector.add_result(RequestResult::new(500, ms(40))).await;
        collector
            .add_result(RequestResult::failed("connection refused", ms(1)))
            .await;
        collector.finalize().await;

        let summary = collector.summary().await;
        assert_eq!(summary.total_requests, 6);
        assert_eq!(summary.successful_requests, 3);
        assert_eq!(summary.failed_requests, 3);
        assert_eq!(summary.status_codes[&200], 1);
        assert_eq!(summary.status_codes[&404], 1);
        assert_eq!(summary.status_codes[&0], 1);
        assert_eq!(summary.transport_errors(), 1);
        assert_eq!(summary.status_codes.values().sum::<u64>(), 6);
        assert_eq!(summary.latency_min, ms(1));
        assert_eq!(summary.latency_max, ms(40));
        assert_eq!(summary.latency_avg, ms(70) / 6);
    }

    #[tokio::test]
    async fn test_zero_status_without_error_counts_as_transport_failure() {
        let collector = StatsCollector::new();
        collector.add_result(RequestResult::new(0, ms(2))).await;
        collector.finalize().await;

        let summary = collector.summary().await;
        assert_eq!(summary.failed_requests, 1);
        assert_eq!(summary.successful_requests, 0);
        assert_eq!(summary.status_codes.get(&0), Some(&1));
    }

    #[tokio::test]
    async fn test_p99_for_uniform_latencies() {
        let collector = StatsCollector::new();
        // 1000 samples spread evenly over 1ms..=100ms
        for i in 0..1000u64 {
            let nanos = 1_000_000 + i * 99_000_000 / 999;
            collector
                .add_result(RequestResult::new(200, Duration::from_nanos(nanos)))
                .await;
        }
        collector.finalize().await;

        let summary = collector.summary().await;
        assert!(summary.latency_p99 >= ms(98), "p99 = {:?}", summary.latency_p99);
        assert!(summary.latency_p99 <= ms(100), "p99 = {:?}", summary.latency_p99);
        assert_eq!(summary.latency_min, ms(1));
        assert_eq!(summary.latency_max, ms(100));
    }

    #[tokio::test]
    async fn test_summary_of_scrambled_ramp() {
        let collector = StatsCollector::new();
        for latency in test_utils::scrambled_ramp(100, ms(1)) {
            collector.add_result(RequestResult::new(200, latency)).await;
        }
        collector.finalize().await;

        let summary = collector.summary().await;
        assert_eq!(summary.latency_min, ms(1));
        assert_eq!(summary.latency_max, ms(100));
        assert_eq!(summary.latency_avg, Duration::from_micros(50_500));
        // rank 89.1 over 1..=100ms
        assert_eq!(summary.latency_p90, Duration::from_micros(90_100));
        test_utils::assert_approx_eq!(summary.success_rate(), 100.0, 1e-9);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["total_requests"], 100);
        assert_eq!(json["status_codes"]["200"], 100);
    }

    #[tokio::test]
    async fn test_percentiles_are_monotonic() {
        let collector = StatsCollector::new();
        let samples = [83, 2, 51, 17, 99, 4, 38, 66, 12, 7, 250, 31, 45];
        for v in samples {
            collector.add_result(RequestResult::new(200, ms(v))).await;
        }
        collector.finalize().await;

        let s = collector.summary().await;
        assert!(s.latency_p90 <= s.latency_p95);
        assert!(s.latency_p95 <= s.latency_p99);
        assert!(s.latency_p99 <= s.latency_max);
        assert!(s.latency_min <= s.latency_avg);
        assert!(s.latency_avg <= s.latency_max);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let collector = Arc::new(StatsCollector::new());
        let mut handles = Vec::new();

        for writer in 0..16u64 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..250u64 {
                    let result = match (writer + i) % 4 {
                        0 => RequestResult::failed("timeout", ms(i)),
                        1 => RequestResult::new(500, ms(i)),
                        _ => RequestResult::new(200, ms(i)),
                    };
                    collector.add_result(result).await;
                    if i % 50 == 0 {
                        let progress = collector.progress().await;
                        assert_eq!(
                            progress.successful_requests + progress.failed_requests,
                            progress.total_requests
                        );
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        collector.finalize().await;

        let summary = collector.summary().await;
        assert_eq!(summary.total_requests, 4000);
        assert_eq!(
            summary.successful_requests + summary.failed_requests,
            4000
        );
        assert_eq!(summary.successful_requests, 2000);
        assert_eq!(summary.status_codes.values().sum::<u64>(), 4000);
    }

    #[tokio::test]
    async fn test_finalize_freezes_state() {
        let collector = StatsCollector::new();
        collector.add_result(RequestResult::new(200, ms(1))).await;
        collector.finalize().await;
        assert!(collector.is_finalized().await);

        let first = collector.summary().await;
        tokio::time::sleep(ms(20)).await;
        collector.finalize().await;
        collector.add_result(RequestResult::new(200, ms(1))).await;

        let second = collector.summary().await;
        assert_eq!(first, second);
        assert_eq!(second.total_requests, 1);
        assert_eq!(collector.late_results().await, 1);
    }

    #[tokio::test]
    async fn test_late_results_are_counted_not_recorded() {
        let collector = StatsCollector::new();
        collector.finalize().await;
        assert_eq!(collector.late_results().await, 0);

        for _ in 0..500 {
            collector.add_result(RequestResult::new(200, ms(1))).await;
        }

        assert_eq!(collector.late_results().await, 500);
        assert_eq!(collector.progress().await, ProgressSnapshot::default());

        // A fresh run starts with a clean slate
        collector.start().await;
        assert_eq!(collector.late_results().await, 0);
    }

    #[tokio::test]
    async fn test_requests_per_second() {
        let collector = StatsCollector::new();
        for _ in 0..50 {
            collector.add_result(RequestResult::new(200, ms(1))).await;
        }
        tokio::time::sleep(ms(100)).await;
        collector.finalize().await;

        let summary = collector.summary().await;
        assert!(summary.duration >= ms(100));
        assert!(summary.requests_per_second > 0.0);
        assert!(summary.requests_per_second <= 500.0);
        assert!(summary.ended_at >= summary.started_at);
    }

    #[tokio::test]
    async fn test_start_resets_state() {
        let collector = StatsCollector::new();
        collector.add_result(RequestResult::new(200, ms(1))).await;
        tokio::time::sleep(ms(30)).await;

        collector.start().await;
        assert_eq!(collector.progress().await, ProgressSnapshot::default());
        assert!(collector.elapsed().await < ms(30));
        assert!(!collector.is_finalized().await);
    }

    #[tokio::test]
    async fn test_progress_snapshot() {
        let collector = StatsCollector::new();
        assert_eq!(collector.progress().await, ProgressSnapshot::default());

        collector.add_result(RequestResult::new(200, ms(1))).await;
        collector.add_result(RequestResult::new(502, ms(1))).await;

        let progress = collector.progress().await;
        assert_eq!(progress.total_requests, 2);
        assert_eq!(progress.successful_requests, 1);
        assert_eq!(progress.failed_requests, 1);
    }
}
