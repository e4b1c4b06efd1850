//! Tenant identifiers and the on-disk namespace each one owns.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::PipelineError;

/// Tenant used when the caller does not identify itself.
pub const DEFAULT_TENANT: &str = "default";

pub const STATE_FILE: &str = "system_state.json";
pub const HISTORY_FILE: &str = "run_history.json";
pub const GENERATED_TESTS_DIR: &str = "tests/generated";
pub const EXTRACTED_DIR: &str = "extracted";

const MAX_TENANT_LEN: usize = 128;

/// A validated tenant identifier, safe to use as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_TENANT_LEN
            && raw != "."
            && raw != ".."
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
        if !valid {
            return Err(PipelineError::InvalidTenant(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Absent or blank identifiers map to [`DEFAULT_TENANT`].
    pub fn from_optional(raw: Option<&str>) -> Result<Self, PipelineError> {
        match raw.map(str::trim) {
            Some(id) if !id.is_empty() => Self::parse(id),
            _ => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self(DEFAULT_TENANT.to_string())
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves every per-tenant file under a shared storage root.
#[derive(Debug, Clone)]
pub struct TenantLayout {
    root: PathBuf,
}

impl TenantLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.root.join(tenant.as_str())
    }

    pub fn state_file(&self, tenant: &TenantId) -> PathBuf {
        self.tenant_dir(tenant).join(STATE_FILE)
    }

    pub fn history_file(&self, tenant: &TenantId) -> PathBuf {
        self.tenant_dir(tenant).join(HISTORY_FILE)
    }

    pub fn generated_tests_dir(&self, tenant: &TenantId) -> PathBuf {
        self.tenant_dir(tenant).join(GENERATED_TESTS_DIR)
    }

    pub fn extracted_dir(&self, tenant: &TenantId) -> PathBuf {
        self.tenant_dir(tenant).join(EXTRACTED_DIR)
    }

    /// Resolve a caller-supplied path inside the tenant namespace.
    ///
    /// Relative paths are taken relative to the tenant directory. Absolute
    /// paths must already live under it. `..` components are rejected
    /// outright so the check holds without touching the filesystem.
    pub fn resolve_within(&self, tenant: &TenantId, raw: &str) -> Result<PathBuf, PipelineError> {
        let candidate = Path::new(raw);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PipelineError::OutsideNamespace(raw.to_string()));
        }

        let tenant_dir = self.tenant_dir(tenant);
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else if candidate.starts_with(&tenant_dir) {
            candidate.to_path_buf()
        } else {
            tenant_dir.join(candidate)
        };

        if !resolved.starts_with(&tenant_dir) {
            return Err(PipelineError::OutsideNamespace(raw.to_string()));
        }
        Ok(resolved)
    }
}
