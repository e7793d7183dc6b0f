//! Per-Tenant Serialization
//!
//! Every mutation of a tenant's grants or resources happens while holding
//! that tenant's guard. Tenants never contend with each other.

use crate::error::{LedgerError, LedgerResult};
use crate::model::TenantId;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-tenant lock table
pub struct TenantLocks {
    locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn slot(&self, tenant_id: TenantId) -> Arc<Mutex<()>> {
        self.locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait up to `timeout` for the tenant's lock
    pub async fn acquire(&self, tenant_id: TenantId, timeout: Duration) -> LedgerResult<TenantGuard> {
        let slot = self.slot(tenant_id);
        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(TenantGuard { tenant_id, _guard: guard }),
            Err(_) => {
                tracing::debug!(tenant_id = %tenant_id, ?timeout, "tenant lock wait timed out");
                Err(LedgerError::LockTimeout(tenant_id))
            }
        }
    }

    /// Take the tenant's lock only if it is free right now
    pub fn try_acquire(&self, tenant_id: TenantId) -> Option<TenantGuard> {
        self.slot(tenant_id)
            .try_lock_owned()
            .ok()
            .map(|guard| TenantGuard { tenant_id, _guard: guard })
    }

    /// Drop slots no one holds or waits on; returns how many were removed.
    ///
    /// A slot is only cloned under its shard's write lock and a guard keeps
    /// its slot alive, so a slot with a single reference is idle.
    pub fn prune(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, slot| Arc::strong_count(slot) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Number of tenants with a lock slot
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for TenantLocks {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the holder owns a tenant's lock.
///
/// Functions that mutate tenant state take `&TenantGuard` rather than
/// acquiring locks themselves.
pub struct TenantGuard {
    tenant_id: TenantId,
    _guard: OwnedMutexGuard<()>,
}

impl TenantGuard {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl std::fmt::Debug for TenantGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantGuard")
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}
