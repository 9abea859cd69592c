//! Shared test utilities for the surge workspace.
//!
//! This crate provides common testing infrastructure including:
//! - An in-process mock HTTP target with per-path hit counters
//! - Latency fixtures and run file helpers
//! - Approximate equality macros for rates and durations
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{MockTarget, assert_duration_near};
//! ```

pub mod fixtures;
pub mod server;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use server::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(99.8_f64, 100.0_f64, 0.5_f64); // passes
/// assert_approx_eq!(90.0_f64, 100.0_f64, 0.5_f64); // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Assert that two `Duration`s differ by at most `tolerance`.
///
/// ```ignore
/// use test_utils::{assert_duration_near, ms};
///
/// assert_duration_near!(elapsed, ms(300), ms(50));
/// ```
#[macro_export]
macro_rules! assert_duration_near {
    ($actual:expr, $expected:expr, $tolerance:expr) => {{
        let actual: ::std::time::Duration = $actual;
        let expected: ::std::time::Duration = $expected;
        let tolerance: ::std::time::Duration = $tolerance;
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        if diff > tolerance {
            panic!(
                "assertion failed: `(actual ≈ expected)`\n  actual: `{:?}`,\nexpected: `{:?}`,\n    diff: `{:?}` > tolerance `{:?}`",
                actual, expected, diff, tolerance
            );
        }
    }};
}
