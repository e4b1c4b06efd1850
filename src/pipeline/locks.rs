//! Per-tenant mutual exclusion for load-mutate-save cycles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::tenant::TenantId;

/// One async mutex per tenant, created on first use.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: Mutex<HashMap<TenantId, Arc<AsyncMutex<()>>>>,
}

impl TenantLocks {
    /// Wait until no other operation holds `tenant`.
    pub async fn acquire(&self, tenant: &TenantId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(tenant.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
