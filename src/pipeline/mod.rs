//! Pipeline orchestrator -- drives a tenant through scan, generate, execute
//! and heal.
//!
//! Stages, per tenant: `Empty -> Scanned -> Generated -> Executed`, with
//! `Executed` revisited on every run. Heal and diagnose are side actions
//! available once a test file exists. Every mutation of a tenant's state runs
//! under that tenant's lock.

pub mod discovery;
pub mod locks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::agents::{AgentServiceClient, Collaborators, Diagnosis, HealOutcome};
use crate::config::{PipelineConfig, TesterConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::runner::{ExecutionResult, TestExecutor, TestRunner};
use crate::storage::{
    Endpoint, FileHistoryLedger, FileStateStore, HistoryEntry, HistoryLedger, RunStats,
    StateStore, TenantState,
};
use crate::tenant::{TenantId, TenantLayout};

use self::locks::TenantLocks;

pub const NO_ENDPOINTS: &str = "No endpoints found. Please upload project first.";
pub const NO_TEST_FILE: &str = "No test file found. Please generate tests first.";

/// What a scan produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub project_name: String,
    pub endpoints_found: usize,
    pub endpoints: Vec<Endpoint>,
}

pub struct Orchestrator {
    layout: TenantLayout,
    store: Arc<dyn StateStore>,
    ledger: Arc<dyn HistoryLedger>,
    runner: Arc<dyn TestRunner>,
    agents: Collaborators,
    settings: PipelineConfig,
    locks: TenantLocks,
}

impl Orchestrator {
    pub fn new(
        layout: TenantLayout,
        store: Arc<dyn StateStore>,
        ledger: Arc<dyn HistoryLedger>,
        runner: Arc<dyn TestRunner>,
        agents: Collaborators,
        settings: PipelineConfig,
    ) -> Self {
        Self {
            layout,
            store,
            ledger,
            runner,
            agents,
            settings,
            locks: TenantLocks::default(),
        }
    }

    /// File-backed stores, the subprocess runner and the remote agent service.
    pub fn from_config(config: &TesterConfig) -> Result<Self> {
        let layout = TenantLayout::new(config.storage.root.clone());
        let client = AgentServiceClient::new(&config.agent)?;
        Ok(Self::new(
            layout.clone(),
            Arc::new(FileStateStore::new(layout.clone())),
            Arc::new(FileHistoryLedger::new(layout)),
            Arc::new(TestExecutor::new(&config.runner)),
            Collaborators::from_service(client, config.agent.remote_policy),
            config.pipeline.clone(),
        ))
    }

    pub fn layout(&self) -> &TenantLayout {
        &self.layout
    }

    /// Scan an archive in the tenant namespace and replace the endpoint list.
    pub async fn scan(&self, tenant: &TenantId, archive: &str) -> PipelineResult<ScanReport> {
        let archive = self.layout.resolve_within(tenant, archive)?;
        let project_name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::guard("Archive path has no file name."))?;

        let _guard = self.locks.acquire(tenant).await;
        info!(tenant = %tenant, archive = %archive.display(), "scanning project");

        let endpoints = self
            .agents
            .scanner
            .scan(&archive, &self.layout.extracted_dir(tenant))
            .await
            .map_err(|e| PipelineError::collaborator("scan", e))?;

        let mut state = self.store.load(tenant).await;
        state.project_name = Some(project_name.clone());
        state.upload_path = Some(archive.display().to_string());
        state.endpoints = endpoints.clone();
        if self.settings.invalidate_on_rescan {
            state.test_file = None;
            state.latest_result = None;
        }
        self.save(tenant, &state).await?;

        info!(
            tenant = %tenant,
            project = %project_name,
            endpoints = endpoints.len(),
            "scan stored"
        );
        Ok(ScanReport {
            project_name,
            endpoints_found: endpoints.len(),
            endpoints,
        })
    }

    /// Generate a suite for the scanned endpoints and remember where it is.
    pub async fn generate_tests(
        &self,
        tenant: &TenantId,
        base_url: Option<&str>,
    ) -> PipelineResult<PathBuf> {
        let _guard = self.locks.acquire(tenant).await;
        let mut state = self.store.load(tenant).await;
        if state.endpoints.is_empty() {
            return Err(PipelineError::guard(NO_ENDPOINTS));
        }

        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(self.settings.default_base_url.as_str());
        let project = state.project_stem().unwrap_or("project").to_string();
        let output_dir = self.layout.generated_tests_dir(tenant);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("failed to create {}", output_dir.display()))
            .map_err(PipelineError::Storage)?;

        info!(
            tenant = %tenant,
            project = %project,
            %base_url,
            endpoints = state.endpoints.len(),
            "generating tests"
        );
        let generated = self
            .agents
            .generator
            .generate(&project, &state.endpoints, base_url, &output_dir)
            .await
            .map_err(|e| PipelineError::collaborator("test generation", e))?;
        let test_file = self
            .layout
            .resolve_within(tenant, &generated.to_string_lossy())
            .map_err(|e| PipelineError::collaborator("test generation", e.into()))?;

        state.test_file = Some(test_file.display().to_string());
        self.save(tenant, &state).await?;

        info!(tenant = %tenant, file = %test_file.display(), "test suite generated");
        Ok(test_file)
    }

    /// Execute the tenant's suite, archive the result and feed the policy.
    pub async fn run_tests(&self, tenant: &TenantId) -> PipelineResult<ExecutionResult> {
        let _guard = self.locks.acquire(tenant).await;
        let mut state = self.store.load(tenant).await;

        let test_file = self.resolve_test_file(tenant, &mut state).await?;
        let result = self.runner.run(&test_file).await;

        state.latest_result = Some(result.clone());
        self.save(tenant, &state).await?;

        self.ledger
            .append(
                tenant,
                HistoryEntry::from_result(state.project_name.as_deref(), &result),
            )
            .await
            .map_err(PipelineError::Storage)?;

        if let Some(reward) = result.reward {
            self.publish_reward(tenant, &state.endpoints, reward).await;
        }

        info!(tenant = %tenant, status = %result.status, reward = ?result.reward, "run recorded");
        Ok(result)
    }

    /// Ask the healer to rewrite a failing test. Does not re-run anything.
    pub async fn heal_test(
        &self,
        tenant: &TenantId,
        test_file: Option<&str>,
        failure_logs: &str,
    ) -> PipelineResult<HealOutcome> {
        let _guard = self.locks.acquire(tenant).await;
        let requested = match test_file.filter(|f| !f.trim().is_empty()) {
            Some(f) => f.to_string(),
            None => self
                .store
                .load(tenant)
                .await
                .test_file
                .ok_or_else(|| PipelineError::guard(NO_TEST_FILE))?,
        };
        let path = self.layout.resolve_within(tenant, &requested)?;

        info!(tenant = %tenant, file = %path.display(), "healing test");
        let outcome = self
            .agents
            .healer
            .heal_test(&path, failure_logs)
            .await
            .map_err(|e| PipelineError::collaborator("healing", e))?;
        info!(tenant = %tenant, status = %outcome.status, "heal finished");
        Ok(outcome)
    }

    /// Ask the healer to explain a server-side failure.
    pub async fn diagnose(
        &self,
        tenant: &TenantId,
        source_file: Option<&str>,
        error_logs: &str,
    ) -> PipelineResult<Diagnosis> {
        let path = match source_file.filter(|f| !f.trim().is_empty()) {
            Some(f) => self.layout.resolve_within(tenant, f)?,
            None => {
                let state = self.store.load(tenant).await;
                let stem = state
                    .project_stem()
                    .unwrap_or(discovery::DEFAULT_SOURCE_STEM)
                    .to_string();
                discovery::guess_source_file(&self.layout.extracted_dir(tenant), &stem).await
            }
        };

        info!(tenant = %tenant, file = %path.display(), "diagnosing backend");
        self.agents
            .healer
            .diagnose(&path, error_logs)
            .await
            .map_err(|e| PipelineError::collaborator("diagnosis", e))
    }

    pub async fn state(&self, tenant: &TenantId) -> TenantState {
        self.store.load(tenant).await
    }

    pub async fn history(&self, tenant: &TenantId) -> Vec<HistoryEntry> {
        self.ledger.list(tenant).await
    }

    pub async fn stats(&self, tenant: &TenantId) -> RunStats {
        self.ledger.stats(tenant).await
    }

    /// Stored test file if it still exists inside the tenant namespace, else
    /// auto-discovery. A discovered file is written back into the state
    /// before it is used.
    async fn resolve_test_file(
        &self,
        tenant: &TenantId,
        state: &mut TenantState,
    ) -> PipelineResult<PathBuf> {
        if let Some(stored) = state.test_file.as_deref() {
            match self.layout.resolve_within(tenant, stored) {
                Ok(path) if path.is_file() => return Ok(path),
                Ok(_) => {}
                Err(e) => warn!(tenant = %tenant, error = %e, "ignoring stored test file"),
            }
        }

        warn!(
            tenant = %tenant,
            stored = ?state.test_file,
            "test file missing from state, attempting auto-discovery"
        );
        let generated_dir = self.layout.generated_tests_dir(tenant);
        let found = discovery::find_test_file(&generated_dir, state.project_stem())
            .await
            .ok_or_else(|| PipelineError::guard(NO_TEST_FILE))?;

        state.test_file = Some(found.display().to_string());
        self.save(tenant, state).await?;
        info!(tenant = %tenant, file = %found.display(), "repaired test file reference");
        Ok(found)
    }

    /// Credit every known endpoint with the run's reward. Sink failures are
    /// logged, not returned: the run is already recorded.
    async fn publish_reward(&self, tenant: &TenantId, endpoints: &[Endpoint], reward: f64) {
        let action = self.settings.policy_action.as_str();
        for endpoint in endpoints {
            if let Err(e) = self
                .agents
                .policy
                .update(&endpoint.path, action, reward)
                .await
            {
                warn!(
                    tenant = %tenant,
                    endpoint = %endpoint.path,
                    error = %e,
                    "policy update failed"
                );
            }
        }
    }

    async fn save(&self, tenant: &TenantId, state: &TenantState) -> PipelineResult<()> {
        self.store
            .save(tenant, state)
            .await
            .map_err(PipelineError::Storage)
    }
}
