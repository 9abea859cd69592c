//! Live progress bar fed from the run's statistics collector.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use surge_core::{ProgressSnapshot, StatsCollector};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::report::format_elapsed;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Text after the bar: timing, counters and live throughput.
pub fn progress_message(elapsed: Duration, total: Duration, progress: &ProgressSnapshot) -> String {
    let secs = elapsed.as_secs_f64();
    let rps = if secs > 0.0 {
        progress.total_requests as f64 / secs
    } else {
        0.0
    };
    format!(
        "{}/{} | Req: {} | ✓: {} | ✗: {} | RPS: {:.1}",
        format_elapsed(elapsed.min(total)),
        format_elapsed(total),
        progress.total_requests,
        progress.successful_requests,
        progress.failed_requests,
        rps
    )
}

/// Message shown while the final report is being rendered.
pub fn generating_message(progress: &ProgressSnapshot) -> String {
    format!(
        "Generating report... | Req: {} | ✓: {} | ✗: {}",
        progress.total_requests, progress.successful_requests, progress.failed_requests
    )
}

/// Handle to the background refresh task.
pub struct ProgressDisplay {
    bar: ProgressBar,
    stats: Arc<StatsCollector>,
    total: Duration,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ProgressDisplay {
    /// Start polling `stats` and drawing to stderr.
    pub fn spawn(stats: Arc<StatsCollector>, total: Duration) -> Self {
        Self::with_draw_target(stats, total, ProgressDrawTarget::stderr())
    }

    fn with_draw_target(
        stats: Arc<StatsCollector>,
        total: Duration,
        target: ProgressDrawTarget,
    ) -> Self {
        let (stop, mut stopped) = oneshot::channel();

        let bar = ProgressBar::with_draw_target(Some(total.as_millis() as u64), target);
        bar.set_style(
            ProgressStyle::with_template("[{bar:40.cyan/blue}] {percent:>3}% | {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█░"),
        );

        let task = {
            let bar = bar.clone();
            let stats = stats.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
                loop {
                    tokio::select! {
                        _ = &mut stopped => break,
                        _ = ticker.tick() => {
                            let elapsed = stats.elapsed().await;
                            let progress = stats.progress().await;
                            bar.set_position(elapsed.min(total).as_millis() as u64);
                            bar.set_message(progress_message(elapsed, total, &progress));
                        }
                    }
                }
            })
        };

        Self {
            bar,
            stats,
            total,
            stop,
            task,
        }
    }

    /// Stop refreshing and switch the bar to the "generating report" state.
    ///
    /// The returned bar stays on screen until the caller clears it once the
    /// report is rendered.
    pub async fn finish(self) -> ProgressBar {
        let _ = self.stop.send(());
        let _ = self.task.await;

        let progress = self.stats.progress().await;
        self.bar.set_position(self.total.as_millis() as u64);
        self.bar.set_message(generating_message(&progress));
        self.bar
    }
}
