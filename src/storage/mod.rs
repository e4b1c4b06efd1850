//! File-backed tenant storage -- pipeline state and run history as JSON documents.
//!
//! Reads never fail: a missing or malformed document is replaced by its
//! default value. Writes go to a sibling temp file that is renamed over the
//! target, so a crash mid-write leaves either the old or the new document.

pub mod history;
pub mod state;

use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::tenant::{TenantId, TenantLayout};

pub use self::history::{FileHistoryLedger, HistoryEntry, HistoryLedger, RunOutcome, RunStats};
pub use self::state::{Endpoint, TenantState};

/// Durable key-value access to one [`TenantState`] per tenant.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Load a tenant's state, materializing the zero value on first access.
    async fn load(&self, tenant: &TenantId) -> TenantState;

    /// Replace a tenant's state.
    async fn save(&self, tenant: &TenantId, state: &TenantState) -> Result<()>;
}

/// [`StateStore`] writing `system_state.json` into each tenant directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    layout: TenantLayout,
}

impl FileStateStore {
    pub fn new(layout: TenantLayout) -> Self {
        Self { layout }
    }
}

#[async_trait::async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, tenant: &TenantId) -> TenantState {
        let path = self.layout.state_file(tenant);
        match read_json::<TenantState>(&path).await {
            Some(state) => state,
            None => {
                let state = TenantState::default();
                if let Err(e) = write_json_atomic(&path, &state).await {
                    warn!(tenant = %tenant, error = %e, "failed to persist default state");
                }
                state
            }
        }
    }

    async fn save(&self, tenant: &TenantId, state: &TenantState) -> Result<()> {
        write_json_atomic(&self.layout.state_file(tenant), state).await
    }
}

/// Read and decode a JSON document. `None` when absent or unreadable.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "document not found, using default");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read document, using default");
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed document, using default");
            None
        }
    }
}

/// Serialize `value` next to `path` and rename it into place.
pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let json = serde_json::to_vec_pretty(value).context("failed to serialize document")?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document");
    let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
