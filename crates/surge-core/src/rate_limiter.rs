//! Global request rate limiting shared by all workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Granularity of the tokio timer wheel.
const TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Token source releasing one permit every `1s / max_rps`.
///
/// A background ticker task feeds a semaphore; workers take permits from it and
/// never give them back. The ticker is stopped when the limiter is stopped or
/// dropped.
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_rps: u32,
    interval: Duration,
    burst: usize,
    stop: CancellationToken,
    ticker: JoinHandle<()>,
}

impl RateLimiter {
    /// Create a limiter for `max_rps` requests per second.
    ///
    /// Returns `None` for 0, which means unlimited issuance. Must be called from
    /// within a tokio runtime.
    pub fn new(max_rps: u32) -> Option<Self> {
        if max_rps == 0 {
            return None;
        }

        let interval = Self::interval_for(max_rps);
        let burst = Self::burst_for(interval);
        let permits = Arc::new(Semaphore::new(0));
        let stop = CancellationToken::new();

        let ticker = tokio::spawn(run_ticker(
            permits.clone(),
            interval,
            burst,
            stop.clone(),
        ));

        tracing::debug!(
            max_rps,
            interval_ns = interval.as_nanos() as u64,
            burst,
            "Rate limiter started"
        );

        Some(Self {
            permits,
            max_rps,
            interval,
            burst,
            stop,
            ticker,
        })
    }

    /// Tick interval for a rate, rounded to the nearest nanosecond.
    pub fn interval_for(max_rps: u32) -> Duration {
        let nanos = (1_000_000_000f64 / max_rps.max(1) as f64).round() as u64;
        Duration::from_nanos(nanos.max(1))
    }

    /// Number of permits that may pile up between two timer wake-ups.
    ///
    /// Intervals shorter than the timer resolution are delivered in bursts;
    /// capping at one would silently lower the rate.
    fn burst_for(interval: Duration) -> usize {
        let per_wakeup = TIMER_RESOLUTION.as_nanos().div_ceil(interval.as_nanos());
        per_wakeup.max(1) as usize
    }

    /// Wait for a permit.
    ///
    /// Returns `true` once a permit was granted, `false` if `cancel` fired or
    /// the limiter was stopped first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = self.stop.cancelled() => false,
            permit = self.permits.acquire() => match permit {
                Ok(permit) => {
                    permit.forget();
                    true
                }
                Err(_) => false,
            },
        }
    }

    /// Stop the ticker and wake all waiters.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            self.stop.cancel();
            self.permits.close();
            tracing::debug!(max_rps = self.max_rps, "Rate limiter stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn max_rps(&self) -> u32 {
        self.max_rps
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn burst(&self) -> usize {
        self.burst
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.stop();
        self.ticker.abort();
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_rps", &self.max_rps)
            .field("interval", &self.interval)
            .field("burst", &self.burst)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

async fn run_ticker(
    permits: Arc<Semaphore>,
    interval: Duration,
    burst: usize,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if permits.available_permits() < burst {
                    permits.add_permits(1);
                }
            }
        }
    }
}
