//! Results reporting and formatting.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::Serialize;
use surge_core::{RunConfig, Summary};

/// Directory used when no output path is given.
const RESULTS_DIR: &str = "results";

/// Format a latency with a unit picked by magnitude.
pub fn format_latency(d: Duration) -> String {
    let nanos = d.as_nanos();
    if nanos < 1_000 {
        format!("{}ns", nanos)
    } else if nanos < 1_000_000 {
        format!("{:.2}µs", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", d.as_secs_f64())
    }
}

/// Compact elapsed-time format for the progress line.
pub fn format_elapsed(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else if d < Duration::from_secs(60) {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        format!("{}m{}s", d.as_secs() / 60, d.as_secs() % 60)
    }
}

/// Label for a status code bucket; 0 collects transport failures.
fn status_label(code: u16) -> String {
    if code == 0 {
        "error".to_string()
    } else {
        code.to_string()
    }
}

/// Banner shown before the run starts.
pub fn format_banner(config: &RunConfig) -> String {
    let mut out = String::from("Load Test Started\n");
    if let [url] = config.urls.as_slice() {
        out.push_str(&format!("URL: {}\n", url));
    } else {
        out.push_str(&format!("URLs ({} endpoints):\n", config.urls.len()));
        for (i, url) in config.urls.iter().enumerate() {
            out.push_str(&format!("  {}. {}\n", i + 1, url));
        }
    }
    out.push_str(&format!("Concurrency: {}\n", config.concurrency));
    out.push_str(&format!(
        "Duration: {}\n",
        humantime::format_duration(config.duration)
    ));
    if config.max_rps > 0 {
        out.push_str(&format!("Max RPS: {}\n", config.max_rps));
    }
    out
}

/// Format the summary as a console table.
pub fn format_table(summary: &Summary) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Results", ""]);

    table.add_row(vec![
        "Total Requests:".to_string(),
        summary.total_requests.to_string(),
    ]);
    table.add_row(vec![
        "Success:".to_string(),
        format!(
            "{} ({:.1}%)",
            summary.successful_requests,
            summary.success_rate()
        ),
    ]);
    table.add_row(vec![
        "Failed:".to_string(),
        summary.failed_requests.to_string(),
    ]);
    table.add_row(vec![
        "RPS:".to_string(),
        format!("{:.1}", summary.requests_per_second),
    ]);
    table.add_row(vec![
        "Duration:".to_string(),
        format!("{:.2}s", summary.duration.as_secs_f64()),
    ]);

    table.add_row(vec!["".to_string(), "".to_string()]);
    table.add_row(vec!["Latency".to_string(), "".to_string()]);
    for (label, value) in [
        ("  Min:", summary.latency_min),
        ("  Avg:", summary.latency_avg),
        ("  Max:", summary.latency_max),
        ("  p90:", summary.latency_p90),
        ("  p95:", summary.latency_p95),
        ("  p99:", summary.latency_p99),
    ] {
        table.add_row(vec![label.to_string(), format_latency(value)]);
    }

    if !summary.status_codes.is_empty() {
        table.add_row(vec!["".to_string(), "".to_string()]);
        table.add_row(vec!["Status Codes".to_string(), "".to_string()]);
        for (code, count) in &summary.status_codes {
            table.add_row(vec![format!("  {}:", status_label(*code)), count.to_string()]);
        }
    }

    table.to_string()
}

#[derive(Debug, Serialize)]
pub struct JsonReport {
    pub metadata: JsonMetadata,
    pub metrics: JsonMetrics,
}

#[derive(Debug, Serialize)]
pub struct JsonMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    pub method: String,
    pub concurrency: usize,
    pub duration: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize)]
pub struct JsonMetrics {
    pub requests: JsonRequests,
    pub latency: JsonLatency,
    pub status_codes: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct JsonRequests {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub rps: f64,
}

#[derive(Debug, Serialize)]
pub struct JsonLatency {
    pub min: JsonDuration,
    pub max: JsonDuration,
    pub avg: JsonDuration,
    pub p90: JsonDuration,
    pub p95: JsonDuration,
    pub p99: JsonDuration,
}

/// A duration as display text plus fractional milliseconds.
#[derive(Debug, Serialize)]
pub struct JsonDuration {
    pub value: String,
    pub ms: f64,
}

impl From<Duration> for JsonDuration {
    fn from(d: Duration) -> Self {
        Self {
            value: format_latency(d),
            ms: d.as_nanos() as f64 / 1_000_000.0,
        }
    }
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Local>::from(time).to_rfc3339()
}

impl JsonReport {
    pub fn new(config: &RunConfig, summary: &Summary) -> Self {
        let (url, urls) = match config.urls.as_slice() {
            [single] => (Some(single.clone()), None),
            many => (None, Some(many.to_vec())),
        };

        let status_codes = summary
            .status_codes
            .iter()
            .map(|(code, count)| (status_label(*code), *count))
            .collect();

        Self {
            metadata: JsonMetadata {
                url,
                urls,
                method: config.method.to_uppercase(),
                concurrency: config.concurrency,
                duration: humantime::format_duration(config.duration).to_string(),
                duration_ms: config.duration.as_millis() as u64,
                headers: config.headers.clone(),
                start_time: rfc3339(summary.started_at),
                end_time: rfc3339(summary.ended_at),
            },
            metrics: JsonMetrics {
                requests: JsonRequests {
                    total: summary.total_requests,
                    success: summary.successful_requests,
                    failed: summary.failed_requests,
                    rps: summary.requests_per_second,
                },
                latency: JsonLatency {
                    min: summary.latency_min.into(),
                    max: summary.latency_max.into(),
                    avg: summary.latency_avg.into(),
                    p90: summary.latency_p90.into(),
                    p95: summary.latency_p95.into(),
                    p99: summary.latency_p99.into(),
                },
                status_codes,
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report, creating parent directories as needed.
    ///
    /// Without an explicit path a timestamped file under `results/` is used.
    pub fn write(&self, output: Option<&Path>) -> Result<PathBuf> {
        let path = match output {
            Some(path) => path.to_path_buf(),
            None => default_output_path(Local::now()),
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        }

        std::fs::write(&path, self.to_json()?)
            .with_context(|| format!("failed to write JSON report {}", path.display()))?;
        Ok(path)
    }
}

fn default_output_path(now: DateTime<Local>) -> PathBuf {
    Path::new(RESULTS_DIR).join(format!("surge-result-{}.json", now.format("%Y%m%d-%H%M%S")))
}
