//! Orchestrator integration tests -- file-backed stores in a temp dir, fake
//! agents, and a runner that never spawns a process.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use agentic_tester::agents::{
    Collaborators, Diagnosis, Generator, HealOutcome, Healer, PolicySink, Scanner,
};
use agentic_tester::config::PipelineConfig;
use agentic_tester::error::PipelineError;
use agentic_tester::pipeline::{Orchestrator, NO_ENDPOINTS, NO_TEST_FILE};
use agentic_tester::runner::{ExecutionResult, ExecutionStatus, TestRunner};
use agentic_tester::storage::{
    Endpoint, FileHistoryLedger, FileStateStore, RunOutcome, StateStore, TenantState,
};
use agentic_tester::tenant::{TenantId, TenantLayout};
use anyhow::Result;
use tempfile::TempDir;

const PASSING_LOG: &str = "collected 3 items\n\n==== 3 passed in 0.08s ====\n";

struct FakeScanner;

#[async_trait::async_trait]
impl Scanner for FakeScanner {
    async fn scan(&self, _archive: &Path, _extract_dir: &Path) -> Result<Vec<Endpoint>> {
        Ok(vec![endpoint("/users", "GET"), endpoint("/login", "POST")])
    }
}

struct FakeGenerator;

#[async_trait::async_trait]
impl Generator for FakeGenerator {
    async fn generate(
        &self,
        project_name: &str,
        endpoints: &[Endpoint],
        _base_url: &str,
        output_dir: &Path,
    ) -> Result<PathBuf> {
        let path = output_dir.join(format!("test_{project_name}.py"));
        let body: String = endpoints
            .iter()
            .map(|e| format!("def test_{}():\n    pass\n", e.path.trim_matches('/')))
            .collect();
        tokio::fs::write(&path, body).await?;
        Ok(path)
    }
}

#[derive(Default)]
struct RecordingHealer {
    healed: Mutex<Vec<PathBuf>>,
    diagnosed: Mutex<Vec<PathBuf>>,
}

#[async_trait::async_trait]
impl Healer for RecordingHealer {
    async fn heal_test(&self, test_file: &Path, _failure_logs: &str) -> Result<HealOutcome> {
        self.healed.lock().unwrap().push(test_file.to_path_buf());
        Ok(HealOutcome {
            status: "healed".into(),
            message: None,
            fixed_code: Some("def test_ok():\n    assert True\n".into()),
        })
    }

    async fn diagnose(&self, source_file: &Path, _error_logs: &str) -> Result<Diagnosis> {
        self.diagnosed.lock().unwrap().push(source_file.to_path_buf());
        Ok(Diagnosis {
            status: "diagnosed".into(),
            message: None,
            analysis: Some("null dereference in handler".into()),
        })
    }
}

#[derive(Default)]
struct RecordingPolicy {
    updates: Mutex<Vec<(String, String, f64)>>,
}

#[async_trait::async_trait]
impl PolicySink for RecordingPolicy {
    async fn update(&self, endpoint: &str, action: &str, reward: f64) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((endpoint.to_string(), action.to_string(), reward));
        Ok(())
    }
}

struct FailingPolicy;

#[async_trait::async_trait]
impl PolicySink for FailingPolicy {
    async fn update(&self, _endpoint: &str, _action: &str, _reward: f64) -> Result<()> {
        anyhow::bail!("policy service unreachable")
    }
}

/// Scores a canned passing log for any file that exists.
struct CannedRunner;

#[async_trait::async_trait]
impl TestRunner for CannedRunner {
    async fn run(&self, test_file: &Path) -> ExecutionResult {
        if !test_file.is_file() {
            return ExecutionResult::missing_file(test_file);
        }
        ExecutionResult::from_output(true, PASSING_LOG.to_string(), test_file)
    }
}

fn endpoint(path: &str, method: &str) -> Endpoint {
    Endpoint {
        path: path.to_string(),
        method: method.to_string(),
        description: String::new(),
        payload_schema: serde_json::Value::Null,
        source_file: "routes.js".to_string(),
    }
}

struct Harness {
    _dir: TempDir,
    layout: TenantLayout,
    orchestrator: Orchestrator,
    healer: Arc<RecordingHealer>,
    policy: Arc<RecordingPolicy>,
}

fn harness_with(settings: PipelineConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let layout = TenantLayout::new(dir.path().join("users"));
    let healer = Arc::new(RecordingHealer::default());
    let policy = Arc::new(RecordingPolicy::default());
    let agents = Collaborators {
        scanner: Arc::new(FakeScanner),
        generator: Arc::new(FakeGenerator),
        healer: healer.clone(),
        policy: policy.clone(),
    };
    let orchestrator = Orchestrator::new(
        layout.clone(),
        Arc::new(FileStateStore::new(layout.clone())),
        Arc::new(FileHistoryLedger::new(layout.clone())),
        Arc::new(CannedRunner),
        agents,
        settings,
    );
    Harness {
        _dir: dir,
        layout,
        orchestrator,
        healer,
        policy,
    }
}

fn harness() -> Harness {
    harness_with(PipelineConfig::default())
}

fn tenant(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

fn assert_guard(err: PipelineError, expected: &str) {
    match err {
        PipelineError::Guard(msg) => assert_eq!(msg, expected),
        other => panic!("expected guard error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_generate_requires_scanned_endpoints() {
    let h = harness();
    let err = h
        .orchestrator
        .generate_tests(&tenant("alice"), None)
        .await
        .unwrap_err();
    assert_guard(err, NO_ENDPOINTS);
}

#[tokio::test]
async fn test_run_without_suite_is_rejected_and_not_recorded() {
    let h = harness();
    let alice = tenant("alice");

    let err = h.orchestrator.run_tests(&alice).await.unwrap_err();
    assert!(err.is_client_error());
    assert_guard(err, NO_TEST_FILE);
    assert!(h.orchestrator.history(&alice).await.is_empty());
}

#[tokio::test]
async fn test_full_pipeline_records_history_and_rewards() {
    let h = harness();
    let alice = tenant("alice");

    let report = h
        .orchestrator
        .scan(&alice, "uploads/server.zip")
        .await
        .unwrap();
    assert_eq!(report.project_name, "server.zip");
    assert_eq!(report.endpoints_found, 2);

    let suite = h
        .orchestrator
        .generate_tests(&alice, Some("http://localhost:5000"))
        .await
        .unwrap();
    assert_eq!(
        suite,
        h.layout.generated_tests_dir(&alice).join("test_server.py")
    );

    let result = h.orchestrator.run_tests(&alice).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.summary.passed, 3);
    assert_eq!(result.reward, Some(3.0));

    let state = h.orchestrator.state(&alice).await;
    assert_eq!(state.latest_result.as_ref(), Some(&result));

    let history = h.orchestrator.history(&alice).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].project_name, "server.zip");
    assert_eq!(history[0].status, RunOutcome::Passed);

    let stats = h.orchestrator.stats(&alice).await;
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.passed_runs, 1);
    assert_eq!(stats.avg_reward, 3.0);
    assert_eq!(stats.active_projects, 1);

    let updates = h.policy.updates.lock().unwrap().clone();
    assert_eq!(
        updates,
        vec![
            ("/users".to_string(), "standard".to_string(), 3.0),
            ("/login".to_string(), "standard".to_string(), 3.0),
        ]
    );
}

#[tokio::test]
async fn test_run_rediscovers_suite_lost_from_state() {
    let h = harness();
    let alice = tenant("alice");

    let generated = h.layout.generated_tests_dir(&alice);
    tokio::fs::create_dir_all(&generated).await.unwrap();
    tokio::fs::write(generated.join("test_server.py"), "def test_a(): pass\n")
        .await
        .unwrap();

    let store = FileStateStore::new(h.layout.clone());
    let state = TenantState {
        project_name: Some("server.zip".to_string()),
        endpoints: vec![endpoint("/health", "GET")],
        ..TenantState::default()
    };
    store.save(&alice, &state).await.unwrap();

    let result = h.orchestrator.run_tests(&alice).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);

    let repaired = h.orchestrator.state(&alice).await;
    assert_eq!(
        repaired.test_file,
        Some(generated.join("test_server.py").display().to_string())
    );
    assert!(repaired.latest_result.is_some());
}

#[tokio::test]
async fn test_stale_suite_path_falls_back_to_any_generated_file() {
    let h = harness();
    let alice = tenant("alice");

    let generated = h.layout.generated_tests_dir(&alice);
    tokio::fs::create_dir_all(&generated).await.unwrap();
    tokio::fs::write(generated.join("test_other.py"), "def test_b(): pass\n")
        .await
        .unwrap();

    let store = FileStateStore::new(h.layout.clone());
    let state = TenantState {
        test_file: Some("/gone/test_server.py".to_string()),
        ..TenantState::default()
    };
    store.save(&alice, &state).await.unwrap();

    let result = h.orchestrator.run_tests(&alice).await.unwrap();
    assert!(result.test_file.ends_with("test_other.py"));
}

#[tokio::test]
async fn test_policy_failure_does_not_fail_the_run() {
    let dir = TempDir::new().unwrap();
    let layout = TenantLayout::new(dir.path());
    let alice = tenant("alice");
    let orchestrator = Orchestrator::new(
        layout.clone(),
        Arc::new(FileStateStore::new(layout.clone())),
        Arc::new(FileHistoryLedger::new(layout)),
        Arc::new(CannedRunner),
        Collaborators {
            scanner: Arc::new(FakeScanner),
            generator: Arc::new(FakeGenerator),
            healer: Arc::new(RecordingHealer::default()),
            policy: Arc::new(FailingPolicy),
        },
        PipelineConfig::default(),
    );

    orchestrator.scan(&alice, "server.zip").await.unwrap();
    orchestrator.generate_tests(&alice, None).await.unwrap();
    let result = orchestrator.run_tests(&alice).await.unwrap();
    assert!(result.is_success());
    assert_eq!(orchestrator.history(&alice).await.len(), 1);
}

#[tokio::test]
async fn test_heal_uses_stored_suite_and_stays_in_namespace() {
    let h = harness();
    let alice = tenant("alice");

    let err = h
        .orchestrator
        .heal_test(&alice, None, "AssertionError")
        .await
        .unwrap_err();
    assert_guard(err, NO_TEST_FILE);

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    let suite = h.orchestrator.generate_tests(&alice, None).await.unwrap();

    let outcome = h
        .orchestrator
        .heal_test(&alice, None, "E   assert 404 == 200")
        .await
        .unwrap();
    assert_eq!(outcome.status, "healed");
    assert_eq!(h.healer.healed.lock().unwrap().as_slice(), &[suite]);

    let escape = h
        .orchestrator
        .heal_test(&alice, Some("../bob/tests/generated/test_x.py"), "logs")
        .await
        .unwrap_err();
    assert!(matches!(escape, PipelineError::OutsideNamespace(_)));
    assert_eq!(h.healer.healed.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_diagnose_guesses_backend_entry_point() {
    let h = harness();
    let alice = tenant("alice");

    h.orchestrator.scan(&alice, "shop.zip").await.unwrap();

    let estimated = h.layout.extracted_dir(&alice).join("shop").join("server.js");
    h.orchestrator
        .diagnose(&alice, None, "TypeError: cannot read property")
        .await
        .unwrap();

    let app = h.layout.extracted_dir(&alice).join("shop").join("app.js");
    tokio::fs::create_dir_all(app.parent().unwrap()).await.unwrap();
    tokio::fs::write(&app, "module.exports = {}\n").await.unwrap();
    let diagnosis = h
        .orchestrator
        .diagnose(&alice, None, "TypeError: cannot read property")
        .await
        .unwrap();
    assert_eq!(diagnosis.status, "diagnosed");

    assert_eq!(
        h.healer.diagnosed.lock().unwrap().as_slice(),
        &[estimated, app]
    );
}

#[tokio::test]
async fn test_rescan_keeps_downstream_fields_by_default() {
    let h = harness();
    let alice = tenant("alice");

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    h.orchestrator.generate_tests(&alice, None).await.unwrap();
    h.orchestrator.run_tests(&alice).await.unwrap();

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    let state = h.orchestrator.state(&alice).await;
    assert!(state.test_file.is_some());
    assert!(state.latest_result.is_some());
}

#[tokio::test]
async fn test_rescan_invalidation_clears_downstream_fields() {
    let h = harness_with(PipelineConfig {
        invalidate_on_rescan: true,
        ..PipelineConfig::default()
    });
    let alice = tenant("alice");

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    h.orchestrator.generate_tests(&alice, None).await.unwrap();
    h.orchestrator.run_tests(&alice).await.unwrap();

    h.orchestrator.scan(&alice, "shop.zip").await.unwrap();
    let state = h.orchestrator.state(&alice).await;
    assert_eq!(state.project_name.as_deref(), Some("shop.zip"));
    assert!(state.test_file.is_none());
    assert!(state.latest_result.is_none());
}

#[tokio::test]
async fn test_tenants_do_not_see_each_other() {
    let h = harness();
    let alice = tenant("alice");
    let bob = tenant("bob");

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    h.orchestrator.generate_tests(&alice, None).await.unwrap();
    h.orchestrator.run_tests(&alice).await.unwrap();

    assert!(h.orchestrator.history(&bob).await.is_empty());
    assert_eq!(h.orchestrator.stats(&bob).await.total_runs, 0);
    assert!(h.orchestrator.state(&bob).await.endpoints.is_empty());

    let err = h.orchestrator.run_tests(&bob).await.unwrap_err();
    assert_guard(err, NO_TEST_FILE);
}

#[tokio::test]
async fn test_concurrent_runs_for_one_tenant_all_land_in_history() {
    let h = Arc::new(harness());
    let alice = tenant("alice");

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    h.orchestrator.generate_tests(&alice, None).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            h.orchestrator.run_tests(&alice).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(h.orchestrator.history(&alice).await.len(), 8);
}

struct FailingScanner;

#[async_trait::async_trait]
impl Scanner for FailingScanner {
    async fn scan(&self, _archive: &Path, _extract_dir: &Path) -> Result<Vec<Endpoint>> {
        anyhow::bail!("archive is not a zip file")
    }
}

struct FailingGenerator;

#[async_trait::async_trait]
impl Generator for FailingGenerator {
    async fn generate(
        &self,
        _project_name: &str,
        _endpoints: &[Endpoint],
        _base_url: &str,
        _output_dir: &Path,
    ) -> Result<PathBuf> {
        anyhow::bail!("model returned no code")
    }
}

/// Writes its suite into another tenant's directory.
struct CrossTenantGenerator {
    target: PathBuf,
}

#[async_trait::async_trait]
impl Generator for CrossTenantGenerator {
    async fn generate(
        &self,
        _project_name: &str,
        _endpoints: &[Endpoint],
        _base_url: &str,
        _output_dir: &Path,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(self.target.parent().unwrap()).await?;
        tokio::fs::write(&self.target, "def test_secret(): pass\n").await?;
        Ok(self.target.clone())
    }
}

fn orchestrator_with(
    layout: &TenantLayout,
    scanner: Arc<dyn Scanner>,
    generator: Arc<dyn Generator>,
) -> Orchestrator {
    Orchestrator::new(
        layout.clone(),
        Arc::new(FileStateStore::new(layout.clone())),
        Arc::new(FileHistoryLedger::new(layout.clone())),
        Arc::new(CannedRunner),
        Collaborators {
            scanner,
            generator,
            healer: Arc::new(RecordingHealer::default()),
            policy: Arc::new(RecordingPolicy::default()),
        },
        PipelineConfig::default(),
    )
}

#[tokio::test]
async fn test_scanner_failure_leaves_state_unchanged() {
    let h = harness();
    let alice = tenant("alice");

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    let before = h.orchestrator.state(&alice).await;

    let broken = orchestrator_with(&h.layout, Arc::new(FailingScanner), Arc::new(FakeGenerator));
    let err = broken.scan(&alice, "shop.zip").await.unwrap_err();
    assert!(matches!(err, PipelineError::Collaborator { stage: "scan", .. }));
    assert!(!err.is_client_error());
    assert_eq!(broken.state(&alice).await, before);
}

#[tokio::test]
async fn test_generator_failure_leaves_state_unchanged() {
    let h = harness();
    let alice = tenant("alice");

    h.orchestrator.scan(&alice, "server.zip").await.unwrap();
    let before = h.orchestrator.state(&alice).await;

    let broken = orchestrator_with(&h.layout, Arc::new(FakeScanner), Arc::new(FailingGenerator));
    let err = broken.generate_tests(&alice, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Collaborator { .. }));
    assert!(!err.is_client_error());
    assert_eq!(broken.state(&alice).await, before);
}

#[tokio::test]
async fn test_generated_suite_outside_namespace_is_rejected() {
    let h = harness();
    let alice = tenant("alice");
    let bob = tenant("bob");

    let foreign = h.layout.generated_tests_dir(&bob).join("test_secret.py");
    let orchestrator = orchestrator_with(
        &h.layout,
        Arc::new(FakeScanner),
        Arc::new(CrossTenantGenerator {
            target: foreign.clone(),
        }),
    );

    orchestrator.scan(&alice, "server.zip").await.unwrap();
    let err = orchestrator.generate_tests(&alice, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Collaborator { .. }));
    assert!(orchestrator.state(&alice).await.test_file.is_none());

    let err = orchestrator.run_tests(&alice).await.unwrap_err();
    assert_guard(err, NO_TEST_FILE);
    assert!(orchestrator.history(&alice).await.is_empty());
}

#[tokio::test]
async fn test_stored_suite_of_another_tenant_is_never_run() {
    let h = harness();
    let alice = tenant("alice");
    let bob = tenant("bob");

    let foreign = h.layout.generated_tests_dir(&bob).join("test_secret.py");
    tokio::fs::create_dir_all(foreign.parent().unwrap()).await.unwrap();
    tokio::fs::write(&foreign, "def test_secret(): pass\n").await.unwrap();

    let store = FileStateStore::new(h.layout.clone());
    let tampered = TenantState {
        project_name: Some("server.zip".to_string()),
        test_file: Some(foreign.display().to_string()),
        ..TenantState::default()
    };
    store.save(&alice, &tampered).await.unwrap();

    let err = h.orchestrator.run_tests(&alice).await.unwrap_err();
    assert_guard(err, NO_TEST_FILE);

    let own = h.layout.generated_tests_dir(&alice).join("test_server.py");
    tokio::fs::create_dir_all(own.parent().unwrap()).await.unwrap();
    tokio::fs::write(&own, "def test_a(): pass\n").await.unwrap();

    let result = h.orchestrator.run_tests(&alice).await.unwrap();
    assert_eq!(result.test_file, own.display().to_string());

    let history = h.orchestrator.history(&alice).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].test_file, own.display().to_string());
    assert_eq!(
        h.orchestrator.state(&alice).await.test_file,
        Some(own.display().to_string())
    );
}
