//! API route definitions.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;
use super::{ApiError, Tenant};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/scan", post(scan))
        .route("/generate-tests", post(generate_tests))
        .route("/run-tests", post(run_tests))
        .route("/heal-test", post(heal_test))
        .route("/diagnose-code", post(diagnose_code))
        .route("/dashboard-stats", get(dashboard_stats))
        .route("/history", get(history))
        .route("/state", get(pipeline_state))
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    /// Archive path, relative to the tenant directory.
    archive_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GenerateRequest {
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealTestRequest {
    #[serde(default)]
    test_file: Option<String>,
    failure_logs: String,
}

#[derive(Debug, Deserialize)]
struct DiagnoseRequest {
    #[serde(default)]
    source_file: Option<String>,
    error_logs: String,
}

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": { "status": "ok" },
        "meta": meta()
    }))
}

async fn scan(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(req): Json<ScanRequest>,
) -> Result<Json<Value>, ApiError> {
    let report = state.orchestrator.scan(&tenant, &req.archive_path).await?;
    Ok(Json(json!({
        "data": report,
        "meta": { "message": "Project scanned successfully" }
    })))
}

async fn generate_tests(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<Value>, ApiError> {
    let path = state
        .orchestrator
        .generate_tests(&tenant, req.base_url.as_deref())
        .await?;
    Ok(Json(json!({
        "data": { "test_file_path": path.display().to_string() },
        "meta": { "message": "Test suite generated" }
    })))
}

async fn run_tests(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
) -> Result<Json<Value>, ApiError> {
    let result = state.orchestrator.run_tests(&tenant).await?;
    Ok(Json(json!({
        "data": result,
        "meta": { "message": "Execution Complete" }
    })))
}

async fn heal_test(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(req): Json<HealTestRequest>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .orchestrator
        .heal_test(&tenant, req.test_file.as_deref(), &req.failure_logs)
        .await?;
    Ok(Json(json!({ "data": outcome })))
}

async fn diagnose_code(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Json(req): Json<DiagnoseRequest>,
) -> Result<Json<Value>, ApiError> {
    let diagnosis = state
        .orchestrator
        .diagnose(&tenant, req.source_file.as_deref(), &req.error_logs)
        .await?;
    Ok(Json(json!({ "data": diagnosis })))
}

async fn dashboard_stats(State(state): State<AppState>, Tenant(tenant): Tenant) -> Json<Value> {
    let stats = state.orchestrator.stats(&tenant).await;
    Json(json!({ "data": stats, "meta": meta() }))
}

async fn history(State(state): State<AppState>, Tenant(tenant): Tenant) -> Json<Value> {
    let entries = state.orchestrator.history(&tenant).await;
    let total = entries.len();
    Json(json!({ "data": entries, "meta": { "total": total } }))
}

async fn pipeline_state(State(state): State<AppState>, Tenant(tenant): Tenant) -> Json<Value> {
    let tenant_state = state.orchestrator.state(&tenant).await;
    let stage = tenant_state.stage();
    Json(json!({ "data": tenant_state, "meta": { "stage": stage } }))
}
