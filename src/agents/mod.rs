//! Collaborator boundary -- the agents that understand code live elsewhere.
//!
//! The pipeline never reads source semantically. It hands archives, endpoint
//! lists, test files and logs to these traits and stores what comes back.

pub mod policy;
pub mod remote;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::storage::Endpoint;

pub use self::policy::LoggingPolicy;
pub use self::remote::AgentServiceClient;

/// Discovers API endpoints in an uploaded project archive.
#[async_trait::async_trait]
pub trait Scanner: Send + Sync {
    /// `extract_dir` is inside the tenant namespace; the scanner unpacks there.
    async fn scan(&self, archive: &Path, extract_dir: &Path) -> Result<Vec<Endpoint>>;
}

/// Writes an executable test suite for a set of endpoints.
#[async_trait::async_trait]
pub trait Generator: Send + Sync {
    /// Returns the path of the written test file.
    async fn generate(
        &self,
        project_name: &str,
        endpoints: &[Endpoint],
        base_url: &str,
        output_dir: &Path,
    ) -> Result<PathBuf>;
}

/// Repairs failing tests or explains failing target code.
#[async_trait::async_trait]
pub trait Healer: Send + Sync {
    /// Rewrite `test_file` in place so it matches observed API behavior.
    async fn heal_test(&self, test_file: &Path, failure_logs: &str) -> Result<HealOutcome>;

    /// Explain a server-side crash without touching the source.
    async fn diagnose(&self, source_file: &Path, error_logs: &str) -> Result<Diagnosis>;
}

/// Receives one reward per endpoint after every run.
#[async_trait::async_trait]
pub trait PolicySink: Send + Sync {
    async fn update(&self, endpoint: &str, action: &str, reward: f64) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealOutcome {
    /// `healed` on success, `error` when the healer gave up.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// `diagnosed` on success, `error` when no analysis was produced.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

/// The full set of external collaborators, injected at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub scanner: Arc<dyn Scanner>,
    pub generator: Arc<dyn Generator>,
    pub healer: Arc<dyn Healer>,
    pub policy: Arc<dyn PolicySink>,
}

impl Collaborators {
    /// Scanner, generator and healer backed by one agent service; the policy
    /// sink is remote only when `remote_policy` is set.
    pub fn from_service(client: AgentServiceClient, remote_policy: bool) -> Self {
        let client = Arc::new(client);
        let policy: Arc<dyn PolicySink> = if remote_policy {
            client.clone() as Arc<dyn PolicySink>
        } else {
            Arc::new(LoggingPolicy)
        };
        Self {
            scanner: client.clone(),
            generator: client.clone(),
            healer: client,
            policy,
        }
    }
}
