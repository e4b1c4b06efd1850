//! pytest output classification -- turns a raw run log into pass/fail/error counts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Log fragments meaning the suite could not even be collected.
pub const COLLECTION_FAILURE_MARKERS: [&str; 3] =
    ["SyntaxError", "collected 0 items", "ModuleNotFoundError"];

static PASSED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+passed").expect("valid regex"));
static FAILED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+failed").expect("valid regex"));
static ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s+error").expect("valid regex"));

/// Pass/fail/error counts for one test run.
///
/// `total` is always `passed + failed + error` when built through
/// [`ExecutionSummary::from_counts`] or [`classify`], saturating at
/// `u32::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub error: u32,
    #[serde(default)]
    pub total: u32,
}

impl ExecutionSummary {
    pub fn from_counts(passed: u32, failed: u32, error: u32) -> Self {
        Self {
            passed,
            failed,
            error,
            total: passed.saturating_add(failed).saturating_add(error),
        }
    }

    /// A single system error: the run did not produce usable results.
    pub fn system_error() -> Self {
        Self::from_counts(0, 0, 1)
    }

    pub fn has_errors(&self) -> bool {
        self.error > 0
    }
}

/// Classify raw runner output.
///
/// Collection failures win over any counts present in the same log.
pub fn classify(raw_output: &str) -> ExecutionSummary {
    if COLLECTION_FAILURE_MARKERS
        .iter()
        .any(|marker| raw_output.contains(marker))
    {
        return ExecutionSummary::system_error();
    }

    ExecutionSummary::from_counts(
        first_count(&PASSED, raw_output),
        first_count(&FAILED, raw_output),
        first_count(&ERROR, raw_output),
    )
}

/// The capture is all digits, so a parse failure can only be overflow.
fn first_count(pattern: &Regex, text: &str) -> u32 {
    let Some(digits) = pattern.captures(text).and_then(|caps| caps.get(1)) else {
        return 0;
    };
    digits.as_str().parse().unwrap_or_else(|_| {
        warn!(count = digits.as_str(), "count out of range, clamping");
        u32::MAX
    })
}
