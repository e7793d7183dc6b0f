//! Entitlement Ledger
//!
//! Facade exposing the ledger to its callers: display surfaces, the resource
//! creation path, the webhook receiver and the sweep scheduler.

use crate::admission::{AdmissionGateway, AdmissionOutcome};
use crate::allocator::{QuotaAllocator, QuotaSummary};
use crate::collaborators::{BillingGateway, Notifier, Provisioner, ResourceParams};
use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::events::{BillingEvent, IngestOutcome};
use crate::lifecycle::{load_grants_with_baseline, CancelOutcome, LifecycleEngine};
use crate::locks::TenantLocks;
use crate::model::{Grant, GrantId, TenantId};
use crate::store::{GrantStore, InMemoryGrantStore, InMemoryResourceStore, ResourceStore};
use crate::sweep::{ExpirationSweep, SweepReport};
use std::sync::Arc;

/// Collaborators injected into the ledger
#[derive(Clone)]
pub struct Collaborators {
    pub provisioner: Arc<dyn Provisioner>,
    pub notifier: Arc<dyn Notifier>,
    pub billing: Arc<dyn BillingGateway>,
}

/// Entitlement ledger
pub struct EntitlementLedger {
    grants: Arc<dyn GrantStore>,
    resources: Arc<dyn ResourceStore>,
    locks: Arc<TenantLocks>,
    config: Arc<LedgerConfig>,
    lifecycle: LifecycleEngine,
    admission: AdmissionGateway,
    sweep: ExpirationSweep,
}

impl EntitlementLedger {
    pub fn new(
        config: LedgerConfig,
        grants: Arc<dyn GrantStore>,
        resources: Arc<dyn ResourceStore>,
        collaborators: Collaborators,
    ) -> Self {
        let config = Arc::new(config);
        let locks = Arc::new(TenantLocks::new());

        let lifecycle = LifecycleEngine::new(
            grants.clone(),
            locks.clone(),
            collaborators.billing,
            config.clone(),
        );
        let admission = AdmissionGateway::new(
            grants.clone(),
            resources.clone(),
            locks.clone(),
            collaborators.provisioner.clone(),
            config.clone(),
        );
        let sweep = ExpirationSweep::new(
            grants.clone(),
            resources.clone(),
            locks.clone(),
            collaborators.provisioner,
            collaborators.notifier,
            config.clone(),
        );

        Self {
            grants,
            resources,
            locks,
            config,
            lifecycle,
            admission,
            sweep,
        }
    }

    /// Ledger backed by in-memory stores
    pub fn in_memory(config: LedgerConfig, collaborators: Collaborators) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryGrantStore::new()),
            Arc::new(InMemoryResourceStore::new()),
            collaborators,
        )
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Total quota, usage and per-grant breakdown
    pub async fn get_quota_summary(&self, tenant_id: TenantId) -> LedgerResult<QuotaSummary> {
        let guard = self.locks.acquire(tenant_id, self.config.lock_timeout()).await?;

        let allocator = QuotaAllocator::new(self.config.baseline_capacity);
        let grants = load_grants_with_baseline(self.grants.as_ref(), &guard, allocator.baseline_capacity()).await?;
        let active = self.resources.active_count(&tenant_id).await?;

        Ok(allocator.summarize(tenant_id, &grants, active))
    }

    /// Every grant of a tenant, newest first
    pub async fn list_grants(&self, tenant_id: TenantId) -> LedgerResult<Vec<Grant>> {
        let guard = self.locks.acquire(tenant_id, self.config.lock_timeout()).await?;

        let mut grants =
            load_grants_with_baseline(self.grants.as_ref(), &guard, self.config.baseline_capacity).await?;
        grants.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(grants)
    }

    pub async fn try_create_resource(
        &self,
        tenant_id: TenantId,
        params: ResourceParams,
    ) -> LedgerResult<AdmissionOutcome> {
        self.admission.try_create_resource(tenant_id, params).await
    }

    pub async fn ingest_billing_event(&self, event: BillingEvent) -> LedgerResult<IngestOutcome> {
        self.lifecycle.ingest(event).await
    }

    pub async fn cancel_grant(&self, tenant_id: TenantId, grant_id: GrantId) -> LedgerResult<CancelOutcome> {
        self.lifecycle.cancel_grant(tenant_id, grant_id).await
    }

    pub async fn run_expiration_sweep(&self) -> LedgerResult<SweepReport> {
        self.sweep.run().await
    }
}
