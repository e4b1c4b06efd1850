//! Run history -- a capped, append-only ledger of past executions per tenant.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{read_json, write_json_atomic};
use crate::runner::{ExecutionResult, ExecutionSummary};
use crate::tenant::{TenantId, TenantLayout};

/// Maximum number of entries kept per tenant.
pub const HISTORY_CAP: usize = 100;

/// Project name recorded when the tenant state has none.
pub const UNKNOWN_PROJECT: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed,
}

/// A record of one test-suite execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// RFC 3339 timestamp of when the run was archived.
    pub timestamp: String,
    #[serde(default)]
    pub project_name: String,
    pub status: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    #[serde(default)]
    pub summary: ExecutionSummary,
    #[serde(default)]
    pub test_file: String,
}

impl HistoryEntry {
    pub fn from_result(project_name: Option<&str>, result: &ExecutionResult) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            project_name: project_name.unwrap_or(UNKNOWN_PROJECT).to_string(),
            status: if result.is_success() {
                RunOutcome::Passed
            } else {
                RunOutcome::Failed
            },
            reward: Some(result.reward.unwrap_or(0.0)),
            summary: result.summary,
            test_file: result.test_file.clone(),
        }
    }
}

/// Dashboard aggregates over a tenant's ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_runs: usize,
    pub passed_runs: usize,
    pub avg_reward: f64,
    pub active_projects: usize,
}

impl RunStats {
    pub fn compute(entries: &[HistoryEntry]) -> Self {
        let rewards: Vec<f64> = entries.iter().filter_map(|e| e.reward).collect();
        let avg_reward = if rewards.is_empty() {
            0.0
        } else {
            rewards.iter().sum::<f64>() / rewards.len() as f64
        };

        let projects: HashSet<&str> = entries.iter().map(|e| e.project_name.as_str()).collect();

        Self {
            total_runs: entries.len(),
            passed_runs: entries
                .iter()
                .filter(|e| e.status == RunOutcome::Passed)
                .count(),
            avg_reward,
            active_projects: projects.len(),
        }
    }
}

/// Push `entry` and drop the oldest entries beyond [`HISTORY_CAP`].
pub fn push_capped(entries: &mut Vec<HistoryEntry>, entry: HistoryEntry) {
    entries.push(entry);
    if entries.len() > HISTORY_CAP {
        let excess = entries.len() - HISTORY_CAP;
        entries.drain(..excess);
    }
}

#[async_trait::async_trait]
pub trait HistoryLedger: Send + Sync {
    async fn append(&self, tenant: &TenantId, entry: HistoryEntry) -> Result<()>;

    /// Entries sorted by timestamp, newest first.
    async fn list(&self, tenant: &TenantId) -> Vec<HistoryEntry>;

    async fn stats(&self, tenant: &TenantId) -> RunStats;
}

/// [`HistoryLedger`] stored as `run_history.json`, oldest entry first on disk.
#[derive(Debug, Clone)]
pub struct FileHistoryLedger {
    layout: TenantLayout,
}

impl FileHistoryLedger {
    pub fn new(layout: TenantLayout) -> Self {
        Self { layout }
    }

    /// Entries in on-disk (append) order. Elements that no longer decode are
    /// skipped so one bad record does not cost the rest of the ledger.
    pub async fn load_raw(&self, tenant: &TenantId) -> Vec<HistoryEntry> {
        let raw: Vec<serde_json::Value> = read_json(&self.layout.history_file(tenant))
            .await
            .unwrap_or_default();
        let total = raw.len();
        let entries: Vec<HistoryEntry> = raw
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
        if entries.len() < total {
            warn!(
                tenant = %tenant,
                skipped = total - entries.len(),
                "skipping undecodable history entries"
            );
        }
        entries
    }
}

#[async_trait::async_trait]
impl HistoryLedger for FileHistoryLedger {
    async fn append(&self, tenant: &TenantId, entry: HistoryEntry) -> Result<()> {
        let mut entries = self.load_raw(tenant).await;
        push_capped(&mut entries, entry);
        write_json_atomic(&self.layout.history_file(tenant), &entries).await
    }

    async fn list(&self, tenant: &TenantId) -> Vec<HistoryEntry> {
        let mut entries = self.load_raw(tenant).await;
        // Stable: equal timestamps keep append order.
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    async fn stats(&self, tenant: &TenantId) -> RunStats {
        RunStats::compute(&self.load_raw(tenant).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ExecutionStatus;
    use tempfile::TempDir;

    fn entry(n: usize, project: &str, outcome: RunOutcome, reward: Option<f64>) -> HistoryEntry {
        HistoryEntry {
            timestamp: format!("2026-10-19T10:{:02}:{:02}+00:00", n / 60, n % 60),
            project_name: project.to_string(),
            status: outcome,
            reward,
            summary: ExecutionSummary::from_counts(1, 0, 0),
            test_file: format!("tests/generated/test_{n}.py"),
        }
    }

    #[test]
    fn test_from_result_maps_status() {
        let path = std::path::Path::new("a.py");
        let ok = ExecutionResult::from_output(true, "4 passed".into(), path);
        let e = HistoryEntry::from_result(Some("server.zip"), &ok);
        assert_eq!(e.status, RunOutcome::Passed);
        assert_eq!(e.reward, Some(4.0));
        assert_eq!(e.project_name, "server.zip");

        let missing = ExecutionResult::missing_file(std::path::Path::new("gone.py"));
        assert_eq!(missing.status, ExecutionStatus::Error);
        let e = HistoryEntry::from_result(None, &missing);
        assert_eq!(e.status, RunOutcome::Failed);
        assert_eq!(e.reward, Some(0.0));
        assert_eq!(e.project_name, UNKNOWN_PROJECT);
    }

    #[tokio::test]
    async fn test_append_caps_at_hundred_dropping_oldest() {
        let dir = TempDir::new().unwrap();
        let ledger = FileHistoryLedger::new(TenantLayout::new(dir.path()));
        let tenant = TenantId::parse("alice").unwrap();

        for n in 1..=105 {
            ledger
                .append(&tenant, entry(n, "server.zip", RunOutcome::Passed, Some(1.0)))
                .await
                .unwrap();
        }

        let raw = ledger.load_raw(&tenant).await;
        assert_eq!(raw.len(), HISTORY_CAP);
        let expected: Vec<String> = (6..=105)
            .map(|n| format!("tests/generated/test_{n}.py"))
            .collect();
        let actual: Vec<String> = raw.iter().map(|e| e.test_file.clone()).collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let ledger = FileHistoryLedger::new(TenantLayout::new(dir.path()));
        let tenant = TenantId::parse("alice").unwrap();

        for n in [3, 1, 2] {
            ledger
                .append(&tenant, entry(n, "p.zip", RunOutcome::Failed, Some(0.0)))
                .await
                .unwrap();
        }

        let listed: Vec<String> = ledger
            .list(&tenant)
            .await
            .into_iter()
            .map(|e| e.test_file)
            .collect();
        assert_eq!(
            listed,
            vec![
                "tests/generated/test_3.py",
                "tests/generated/test_2.py",
                "tests/generated/test_1.py"
            ]
        );
    }

    #[test]
    fn test_stats() {
        let entries = vec![
            entry(1, "server.zip", RunOutcome::Passed, Some(3.0)),
            entry(2, "server.zip", RunOutcome::Failed, Some(-10.0)),
            entry(3, "shop.zip", RunOutcome::Passed, None),
            entry(4, "todo.zip", RunOutcome::Failed, Some(1.0)),
        ];
        let stats = RunStats::compute(&entries);
        assert_eq!(stats.total_runs, 4);
        assert_eq!(stats.passed_runs, 2);
        assert_eq!(stats.avg_reward, -2.0);
        assert_eq!(stats.active_projects, 3);
    }

    #[tokio::test]
    async fn test_empty_and_corrupt_ledgers() {
        let dir = TempDir::new().unwrap();
        let layout = TenantLayout::new(dir.path());
        let ledger = FileHistoryLedger::new(layout.clone());
        let tenant = TenantId::parse("alice").unwrap();

        assert_eq!(ledger.stats(&tenant).await, RunStats::default());

        let path = layout.history_file(&tenant);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[{\"timestamp\": ").unwrap();
        assert!(ledger.list(&tenant).await.is_empty());

        ledger
            .append(&tenant, entry(1, "p.zip", RunOutcome::Passed, Some(2.0)))
            .await
            .unwrap();
        assert_eq!(ledger.list(&tenant).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_entry_does_not_discard_ledger() {
        let dir = TempDir::new().unwrap();
        let layout = TenantLayout::new(dir.path());
        let ledger = FileHistoryLedger::new(layout.clone());
        let tenant = TenantId::parse("alice").unwrap();

        let good = entry(1, "p.zip", RunOutcome::Passed, Some(2.0));
        let mut legacy = serde_json::to_value(&good).unwrap();
        legacy["status"] = serde_json::json!("skipped");
        let doc = serde_json::json!([good, legacy, entry(2, "p.zip", RunOutcome::Failed, None)]);

        let path = layout.history_file(&tenant);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, doc.to_string()).unwrap();

        assert_eq!(ledger.load_raw(&tenant).await.len(), 2);

        ledger
            .append(&tenant, entry(3, "p.zip", RunOutcome::Passed, Some(1.0)))
            .await
            .unwrap();
        let files: Vec<String> = ledger
            .load_raw(&tenant)
            .await
            .into_iter()
            .map(|e| e.test_file)
            .collect();
        assert_eq!(
            files,
            vec![
                "tests/generated/test_1.py",
                "tests/generated/test_2.py",
                "tests/generated/test_3.py"
            ]
        );
    }
}
