//! Common test fixtures for surge tests.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

/// Shorthand for a millisecond duration.
pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// `count` latencies stepping evenly: `step, 2*step, ..., count*step`.
pub fn latency_ramp(count: u64, step: Duration) -> Vec<Duration> {
    (1..=count).map(|i| step * i as u32).collect()
}

/// The same ramp in a scrambled but deterministic order.
///
/// Walks the ramp with a stride coprime to its length, so every sample
/// appears exactly once.
pub fn scrambled_ramp(count: u64, step: Duration) -> Vec<Duration> {
    let ramp = latency_ramp(count, step);
    if ramp.is_empty() {
        return ramp;
    }
    let len = ramp.len();
    let mut stride = 7 % len;
    while stride == 0 || gcd(stride, len) != 1 {
        stride += 1;
    }
    (0..len).map(|i| ramp[(i * stride) % len]).collect()
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// A minimal YAML run file.
pub const SAMPLE_RUN_FILE: &str = r#"
urls:
  - http://127.0.0.1:8080/a
  - http://127.0.0.1:8080/b
concurrency: 25
duration: 1m30s
method: post
body: '{"ping":true}'
headers:
  Content-Type: application/json
max_rps: 200
"#;

/// Write `contents` to a temporary `.yaml` file that lives as long as the handle.
pub fn write_run_file(contents: &str) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}
