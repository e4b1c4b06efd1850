//! Test execution engine: spawn the runner, enforce the timeout, classify and score.

pub mod classify;
pub mod reward;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;

pub use self::classify::{classify, ExecutionSummary};
pub use self::reward::score;

/// Log returned when the requested test file is absent.
pub const MISSING_FILE_LOG: &str = "File does not exist.";

/// Reward forced when a non-empty log yields no counts at all.
pub const UNPARSEABLE_RUN_REWARD: f64 = -5.0;

/// Reward attached when the runner could not be spawned or awaited.
pub const EXECUTOR_FAILURE_REWARD: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Error,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Failure => write!(f, "failure"),
            ExecutionStatus::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one runner invocation. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub summary: ExecutionSummary,
    /// Absent only when the test file did not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default)]
    pub logs: String,
    #[serde(default)]
    pub test_file: String,
}

impl ExecutionResult {
    /// Result for a path that does not reference an existing file.
    pub fn missing_file(test_file: &Path) -> Self {
        Self {
            status: ExecutionStatus::Error,
            summary: ExecutionSummary {
                passed: 0,
                failed: 0,
                error: 1,
                total: 0,
            },
            reward: None,
            logs: MISSING_FILE_LOG.to_string(),
            test_file: test_file.display().to_string(),
        }
    }

    /// Result for a spawn/wait failure, including the timeout.
    pub fn executor_failure(test_file: &Path, message: String) -> Self {
        Self {
            status: ExecutionStatus::Error,
            summary: ExecutionSummary::system_error(),
            reward: Some(EXECUTOR_FAILURE_REWARD),
            logs: message,
            test_file: test_file.display().to_string(),
        }
    }

    /// Classify and score the captured output of a finished run.
    pub fn from_output(exit_success: bool, logs: String, test_file: &Path) -> Self {
        let mut summary = classify(&logs);
        let mut reward = score(&summary, &logs);

        // A non-empty log without a single count means the runner died
        // before printing its summary line.
        if summary.total == 0 && !logs.is_empty() {
            summary = ExecutionSummary::system_error();
            reward = UNPARSEABLE_RUN_REWARD;
        }

        let status = if summary.has_errors() {
            ExecutionStatus::Error
        } else if exit_success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure
        };

        Self {
            status,
            summary,
            reward: Some(reward),
            logs,
            test_file: test_file.display().to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Anything that can execute a generated test file and score it.
#[async_trait::async_trait]
pub trait TestRunner: Send + Sync {
    /// Never fails: every problem is folded into the returned result.
    async fn run(&self, test_file: &Path) -> ExecutionResult;
}

/// Subprocess-backed runner (pytest by default).
#[derive(Debug, Clone)]
pub struct TestExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl TestExecutor {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Spawn `<program> <file> <args...>` and collect stdout followed by stderr.
    async fn spawn_and_wait(&self, test_file: &Path) -> Result<(bool, String)> {
        let child = Command::new(&self.program)
            .arg(test_file)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn test runner '{}'", self.program))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(waited) => waited.context("failed to wait for test runner")?,
            Err(_) => anyhow::bail!(
                "test run timed out after {} seconds",
                self.timeout.as_secs()
            ),
        };

        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), logs))
    }
}

#[async_trait::async_trait]
impl TestRunner for TestExecutor {
    async fn run(&self, test_file: &Path) -> ExecutionResult {
        let run_id = Uuid::new_v4().to_string();

        if !test_file.is_file() {
            warn!(run_id = run_id.as_str(), file = %test_file.display(), "test file not found");
            return ExecutionResult::missing_file(test_file);
        }

        info!(
            run_id = run_id.as_str(),
            file = %test_file.display(),
            program = self.program.as_str(),
            timeout_sec = self.timeout.as_secs(),
            "executing test suite"
        );

        match self.spawn_and_wait(test_file).await {
            Ok((exit_success, logs)) => {
                let result = ExecutionResult::from_output(exit_success, logs, test_file);
                info!(
                    run_id = run_id.as_str(),
                    status = %result.status,
                    passed = result.summary.passed,
                    failed = result.summary.failed,
                    errors = result.summary.error,
                    reward = ?result.reward,
                    "test suite finished"
                );
                result
            }
            Err(e) => {
                warn!(run_id = run_id.as_str(), error = %e, "test runner failed");
                ExecutionResult::executor_failure(test_file, format!("{e:#}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
