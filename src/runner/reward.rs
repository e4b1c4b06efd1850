//! Reward signal for a scored run.

use super::classify::ExecutionSummary;

/// Marker left in the log when a test caught an upstream 500.
pub const SERVER_ERROR_MARKER: &str = "500 Internal Server Error";

pub const ERROR_REWARD: f64 = -10.0;
pub const PASS_REWARD: f64 = 1.0;
pub const FAIL_PENALTY: f64 = 5.0;
pub const SERVER_ERROR_BONUS: f64 = 10.0;

/// Score a classified run.
///
/// Runs that did not execute sit below any failure count. A log showing a
/// detected 500 earns a bonus so exposing a real server bug is not punished.
pub fn score(summary: &ExecutionSummary, raw_output: &str) -> f64 {
    if summary.has_errors() {
        return ERROR_REWARD;
    }

    let mut reward =
        f64::from(summary.passed) * PASS_REWARD - f64::from(summary.failed) * FAIL_PENALTY;
    if raw_output.contains(SERVER_ERROR_MARKER) {
        reward += SERVER_ERROR_BONUS;
    }
    reward
}
