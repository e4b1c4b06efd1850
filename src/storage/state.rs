//! Persisted pipeline state for one tenant.

use serde::{Deserialize, Serialize};

use crate::runner::ExecutionResult;

/// An API endpoint reported by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub description: String,
    /// Expected body/query parameters, shape decided by the scanner.
    #[serde(default)]
    pub payload_schema: serde_json::Value,
    /// Where the endpoint was found; used later to locate code for diagnosis.
    #[serde(default)]
    pub source_file: String,
}

/// Everything the pipeline remembers about a tenant between requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantState {
    pub project_name: Option<String>,
    pub upload_path: Option<String>,
    pub endpoints: Vec<Endpoint>,
    pub test_file: Option<String>,
    #[serde(rename = "latest_results")]
    pub latest_result: Option<ExecutionResult>,
}

impl TenantState {
    /// Project name with the archive extension stripped (`server.zip` -> `server`).
    pub fn project_stem(&self) -> Option<&str> {
        self.project_name.as_deref().map(strip_archive_ext)
    }

    /// Coarse pipeline position derived from which fields are populated.
    pub fn stage(&self) -> PipelineStage {
        if self.latest_result.is_some() {
            PipelineStage::Executed
        } else if self.test_file.is_some() {
            PipelineStage::Generated
        } else if !self.endpoints.is_empty() || self.project_name.is_some() {
            PipelineStage::Scanned
        } else {
            PipelineStage::Empty
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Empty,
    Scanned,
    Generated,
    Executed,
}

pub fn strip_archive_ext(name: &str) -> &str {
    name.strip_suffix(".zip").unwrap_or(name)
}
