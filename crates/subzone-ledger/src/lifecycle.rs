//! Grant Lifecycle
//!
//! Owns every grant status transition driven by the billing provider and by
//! tenants, plus baseline auto-provisioning. Expiry lives in [`crate::sweep`].

use crate::collaborators::BillingGateway;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{map_provider_status, BillingEvent, IngestOutcome};
use crate::locks::{TenantGuard, TenantLocks};
use crate::model::{Grant, GrantId, GrantStatus, GrantTier, TenantId};
use crate::store::GrantStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Load a tenant's grants, creating the baseline grant if none is live.
///
/// Returns every grant of the tenant, including terminal ones.
pub(crate) async fn load_grants_with_baseline(
    store: &dyn GrantStore,
    guard: &TenantGuard,
    baseline_capacity: u32,
) -> LedgerResult<Vec<Grant>> {
    let tenant_id = guard.tenant_id();
    let mut grants = store.list_for_tenant(&tenant_id).await?;

    if !grants.iter().any(Grant::is_live_baseline) {
        let baseline = Grant::baseline(tenant_id, baseline_capacity);
        store.insert(&baseline).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            grant_id = %baseline.id,
            capacity = baseline_capacity,
            "provisioned baseline grant"
        );
        grants.push(baseline);
    }

    Ok(grants)
}

/// Lifecycle engine
pub struct LifecycleEngine {
    grants: Arc<dyn GrantStore>,
    locks: Arc<TenantLocks>,
    billing: Arc<dyn BillingGateway>,
    config: Arc<LedgerConfig>,
}

impl LifecycleEngine {
    pub fn new(
        grants: Arc<dyn GrantStore>,
        locks: Arc<TenantLocks>,
        billing: Arc<dyn BillingGateway>,
        config: Arc<LedgerConfig>,
    ) -> Self {
        Self {
            grants,
            locks,
            billing,
            config,
        }
    }

    /// Apply a billing-provider event
    pub async fn ingest(&self, event: BillingEvent) -> LedgerResult<IngestOutcome> {
        let kind = event.kind();
        let outcome = match event {
            BillingEvent::PurchaseCompleted {
                tenant_id,
                external_ref,
                tier,
                period_start,
                period_end,
            } => {
                self.purchase_completed(tenant_id, external_ref, tier, period_start, period_end)
                    .await?
            }
            BillingEvent::GrantUpdated {
                external_ref,
                status,
                period_start,
                period_end,
                cancel_at_period_end,
                cancel_at,
            } => {
                let update = ProviderUpdate {
                    status,
                    period_start,
                    period_end,
                    cancel_at_period_end,
                    cancel_at,
                };
                self.grant_updated(&external_ref, update).await?
            }
            BillingEvent::GrantEnded { external_ref } => self.grant_ended(&external_ref).await?,
        };

        tracing::debug!(event = kind, ?outcome, "billing event ingested");
        Ok(outcome)
    }

    async fn purchase_completed(
        &self,
        tenant_id: TenantId,
        external_ref: String,
        tier: GrantTier,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> LedgerResult<IngestOutcome> {
        if tier.is_baseline() {
            tracing::warn!(
                tenant_id = %tenant_id,
                external_ref = %external_ref,
                "purchase of baseline tier ignored"
            );
            return Ok(IngestOutcome::UnsupportedTier(tier));
        }

        let _guard = self.locks.acquire(tenant_id, self.config.lock_timeout()).await?;

        if let Some(existing) = self.grants.find_by_external_ref(&external_ref).await? {
            if existing.tenant_id != tenant_id {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    owner = %existing.tenant_id,
                    external_ref = %external_ref,
                    "purchase references a grant owned by another tenant"
                );
            }
            return Ok(IngestOutcome::Unchanged(existing.id));
        }

        let capacity = self.config.capacity_for(tier);
        let grant = Grant::purchased(tenant_id, tier, capacity, external_ref, period_start, period_end);
        self.grants.insert(&grant).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            grant_id = %grant.id,
            tier = %tier,
            capacity,
            "purchased grant created"
        );
        Ok(IngestOutcome::Created(grant.id))
    }

    /// Resolve a provider reference and lock its tenant, then re-read the
    /// grant under the lock.
    async fn lock_by_reference(&self, external_ref: &str) -> LedgerResult<Option<(TenantGuard, Grant)>> {
        let Some(found) = self.grants.find_by_external_ref(external_ref).await? else {
            tracing::warn!(external_ref = %external_ref, "event for unknown reference ignored");
            return Ok(None);
        };

        let guard = self
            .locks
            .acquire(found.tenant_id, self.config.lock_timeout())
            .await?;
        let grant = self
            .grants
            .get(&found.id)
            .await?
            .ok_or(LedgerError::GrantNotFound {
                tenant_id: found.tenant_id,
                grant_id: found.id,
            })?;

        Ok(Some((guard, grant)))
    }

    async fn grant_updated(&self, external_ref: &str, update: ProviderUpdate) -> LedgerResult<IngestOutcome> {
        let Some((_guard, grant)) = self.lock_by_reference(external_ref).await? else {
            return Ok(IngestOutcome::UnknownReference);
        };

        if grant.status.is_terminal() {
            return Ok(IngestOutcome::Unchanged(grant.id));
        }

        let mut next = grant.clone();
        if let Some(start) = update.period_start {
            next.period_start = Some(start);
        }
        if let Some(end) = update.period_end {
            next.period_end = Some(end);
        }
        next.cancel_at_period_end = update.cancel_at_period_end;
        next.cancel_at = update.cancel_at;

        let mapped = map_provider_status(&update.status);
        match mapped {
            Some(status) if grant.status.accepts_provider_transition(status) => {
                if status == GrantStatus::Canceled {
                    next.cancel(Utc::now());
                } else {
                    next.status = status;
                }
            }
            Some(status) => {
                tracing::debug!(
                    grant_id = %grant.id,
                    from = ?grant.status,
                    to = ?status,
                    "provider transition not permitted, status kept"
                );
            }
            None => {
                tracing::warn!(
                    grant_id = %grant.id,
                    provider_status = %update.status,
                    "unmapped provider status, status kept"
                );
            }
        }

        if next != grant {
            self.grants.update(&next).await?;
            tracing::info!(
                tenant_id = %next.tenant_id,
                grant_id = %next.id,
                status = ?next.status,
                period_end = ?next.period_end,
                "grant updated from billing provider"
            );
        }

        Ok(match mapped {
            None => IngestOutcome::UnmappedStatus {
                grant_id: grant.id,
                status: update.status,
            },
            Some(_) if next != grant => IngestOutcome::Applied(grant.id),
            Some(_) => IngestOutcome::Unchanged(grant.id),
        })
    }

    async fn grant_ended(&self, external_ref: &str) -> LedgerResult<IngestOutcome> {
        let Some((_guard, mut grant)) = self.lock_by_reference(external_ref).await? else {
            return Ok(IngestOutcome::UnknownReference);
        };

        if !grant.cancel(Utc::now()) {
            return Ok(IngestOutcome::Unchanged(grant.id));
        }
        self.grants.update(&grant).await?;

        tracing::info!(
            tenant_id = %grant.tenant_id,
            grant_id = %grant.id,
            tier = %grant.tier,
            "grant canceled by billing provider"
        );
        Ok(IngestOutcome::Applied(grant.id))
    }

    /// Tenant-initiated cancellation.
    ///
    /// Free grants end immediately. Paid grants are canceled at the billing
    /// provider, which confirms with a `GrantEnded` event.
    pub async fn cancel_grant(&self, tenant_id: TenantId, grant_id: GrantId) -> LedgerResult<CancelOutcome> {
        let guard = self.locks.acquire(tenant_id, self.config.lock_timeout()).await?;

        let mut grant = self
            .grants
            .get(&grant_id)
            .await?
            .filter(|g| g.tenant_id == tenant_id)
            .ok_or(LedgerError::GrantNotFound { tenant_id, grant_id })?;

        if grant.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(grant.status));
        }

        let paid_ref = grant.external_ref.clone().filter(|_| !grant.tier.is_baseline());
        let Some(external_ref) = paid_ref else {
            grant.cancel(Utc::now());
            self.grants.update(&grant).await?;
            tracing::info!(tenant_id = %tenant_id, grant_id = %grant_id, "grant canceled by tenant");
            return Ok(CancelOutcome::Canceled);
        };

        // The provider call happens outside the tenant lock
        drop(guard);
        self.billing
            .request_cancellation(&external_ref)
            .await
            .map_err(LedgerError::Billing)?;

        tracing::info!(
            tenant_id = %tenant_id,
            grant_id = %grant_id,
            external_ref = %external_ref,
            "cancellation requested from billing provider"
        );
        Ok(CancelOutcome::CancellationRequested)
    }
}

/// Field values carried by a `GrantUpdated` event
struct ProviderUpdate {
    status: String,
    period_start: Option<DateTime<Utc>>,
    period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    cancel_at: Option<DateTime<Utc>>,
}

/// Result of a tenant-initiated cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Grant ended immediately
    Canceled,
    /// Billing provider will end the grant
    CancellationRequested,
    /// Grant was already terminal; nothing changed
    AlreadyTerminal(GrantStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::RecordingBilling;
    use crate::store::InMemoryGrantStore;
    use chrono::Duration;
    use uuid::Uuid;

    struct Fixture {
        engine: LifecycleEngine,
        store: Arc<InMemoryGrantStore>,
        locks: Arc<TenantLocks>,
        billing: Arc<RecordingBilling>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryGrantStore::new());
        let locks = Arc::new(TenantLocks::new());
        let billing = Arc::new(RecordingBilling::default());
        let engine = LifecycleEngine::new(
            store.clone(),
            locks.clone(),
            billing.clone(),
            Arc::new(LedgerConfig::default()),
        );
        Fixture { engine, store, locks, billing }
    }

    fn purchase(tenant_id: TenantId, external_ref: &str, tier: GrantTier) -> BillingEvent {
        let now = Utc::now();
        BillingEvent::PurchaseCompleted {
            tenant_id,
            external_ref: external_ref.into(),
            tier,
            period_start: Some(now),
            period_end: Some(now + Duration::days(30)),
        }
    }

    fn update(external_ref: &str, status: &str, period_end: DateTime<Utc>) -> BillingEvent {
        BillingEvent::GrantUpdated {
            external_ref: external_ref.into(),
            status: status.into(),
            period_start: Some(period_end - Duration::days(30)),
            period_end: Some(period_end),
            cancel_at_period_end: false,
            cancel_at: None,
        }
    }

    #[tokio::test]
    async fn test_purchase_creates_active_grant() {
        let fx = fixture();
        let tenant = Uuid::new_v4();

        let outcome = fx.engine.ingest(purchase(tenant, "sub_1", GrantTier::AddonLarge)).await.unwrap();
        let IngestOutcome::Created(id) = outcome else {
            panic!("expected a new grant");
        };

        let grant = fx.store.get(&id).await.unwrap().unwrap();
        assert_eq!(grant.status, GrantStatus::Active);
        assert_eq!(grant.capacity, 52);

        // Redelivery does not create a second grant
        let again = fx.engine.ingest(purchase(tenant, "sub_1", GrantTier::AddonLarge)).await.unwrap();
        assert_eq!(again, IngestOutcome::Unchanged(id));
        assert_eq!(fx.store.list_for_tenant(&tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let fx = fixture();
        let tenant = Uuid::new_v4();
        fx.engine.ingest(purchase(tenant, "sub_1", GrantTier::AddonSmall)).await.unwrap();

        let period_end = Utc::now() + Duration::days(2);
        let first = fx.engine.ingest(update("sub_1", "past_due", period_end)).await.unwrap();
        assert!(matches!(first, IngestOutcome::Applied(_)));
        let after_once = fx.store.find_by_external_ref("sub_1").await.unwrap().unwrap();

        let second = fx.engine.ingest(update("sub_1", "past_due", period_end)).await.unwrap();
        assert!(matches!(second, IngestOutcome::Unchanged(_)));
        let after_twice = fx.store.find_by_external_ref("sub_1").await.unwrap().unwrap();

        assert_eq!(after_once, after_twice);
        assert_eq!(after_twice.status, GrantStatus::PastDue);
        assert_eq!(after_twice.period_end, Some(period_end));
    }

    #[tokio::test]
    async fn test_unmapped_status_keeps_status() {
        let fx = fixture();
        let tenant = Uuid::new_v4();
        fx.engine.ingest(purchase(tenant, "sub_1", GrantTier::AddonSmall)).await.unwrap();

        let period_end = Utc::now() + Duration::days(60);
        let outcome = fx.engine.ingest(update("sub_1", "incomplete_expired", period_end)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::UnmappedStatus { ref status, .. } if status == "incomplete_expired"));

        let grant = fx.store.find_by_external_ref("sub_1").await.unwrap().unwrap();
        assert_eq!(grant.status, GrantStatus::Active);
        assert_eq!(grant.period_end, Some(period_end));
    }

    #[tokio::test]
    async fn test_webhook_cannot_expire_or_revive() {
        let fx = fixture();
        let tenant = Uuid::new_v4();
        fx.engine.ingest(purchase(tenant, "sub_1", GrantTier::AddonSmall)).await.unwrap();

        let period_end = Utc::now() + Duration::days(30);
        fx.engine.ingest(update("sub_1", "canceled", period_end)).await.unwrap();
        let canceled = fx.store.find_by_external_ref("sub_1").await.unwrap().unwrap();
        assert_eq!(canceled.status, GrantStatus::Canceled);
        assert!(canceled.ended_at.is_some());

        let revive = fx.engine.ingest(update("sub_1", "active", period_end)).await.unwrap();
        assert_eq!(revive, IngestOutcome::Unchanged(canceled.id));
        let still = fx.store.get(&canceled.id).await.unwrap().unwrap();
        assert_eq!(still, canceled);
    }

    #[tokio::test]
    async fn test_unknown_reference_ignored() {
        let fx = fixture();

        let updated = fx.engine.ingest(update("sub_missing", "active", Utc::now())).await.unwrap();
        let ended = fx
            .engine
            .ingest(BillingEvent::GrantEnded { external_ref: "sub_missing".into() })
            .await
            .unwrap();

        assert_eq!(updated, IngestOutcome::UnknownReference);
        assert_eq!(ended, IngestOutcome::UnknownReference);
    }

    #[tokio::test]
    async fn test_grant_ended_twice() {
        let fx = fixture();
        let tenant = Uuid::new_v4();
        fx.engine.ingest(purchase(tenant, "sub_1", GrantTier::AddonSmall)).await.unwrap();

        let ended = BillingEvent::GrantEnded { external_ref: "sub_1".into() };
        assert!(matches!(fx.engine.ingest(ended.clone()).await.unwrap(), IngestOutcome::Applied(_)));
        let first = fx.store.find_by_external_ref("sub_1").await.unwrap().unwrap();

        assert!(matches!(fx.engine.ingest(ended).await.unwrap(), IngestOutcome::Unchanged(_)));
        let second = fx.store.find_by_external_ref("sub_1").await.unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_baseline_provisioned_once() {
        let fx = fixture();
        let tenant = Uuid::new_v4();

        let guard = fx.locks.acquire(tenant, std::time::Duration::from_millis(100)).await.unwrap();
        let first = load_grants_with_baseline(fx.store.as_ref(), &guard, 2).await.unwrap();
        let second = load_grants_with_baseline(fx.store.as_ref(), &guard, 2).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert!(first[0].is_live_baseline());
        assert_eq!(first[0].period_end, None);
    }

    #[tokio::test]
    async fn test_cancel_paths() {
        let fx = fixture();
        let tenant = Uuid::new_v4();

        let Ok(IngestOutcome::Created(paid)) =
            fx.engine.ingest(purchase(tenant, "sub_1", GrantTier::AddonSmall)).await
        else {
            panic!("purchase failed");
        };
        let outcome = fx.engine.cancel_grant(tenant, paid).await.unwrap();
        assert_eq!(outcome, CancelOutcome::CancellationRequested);
        assert_eq!(*fx.billing.cancellations.lock(), vec!["sub_1".to_string()]);
        assert_eq!(fx.store.get(&paid).await.unwrap().unwrap().status, GrantStatus::Active);

        let baseline = {
            let guard = fx.locks.acquire(tenant, std::time::Duration::from_millis(100)).await.unwrap();
            load_grants_with_baseline(fx.store.as_ref(), &guard, 2)
                .await
                .unwrap()
                .into_iter()
                .find(|g| g.tier.is_baseline())
                .unwrap()
        };
        assert_eq!(fx.engine.cancel_grant(tenant, baseline.id).await.unwrap(), CancelOutcome::Canceled);
        assert_eq!(
            fx.engine.cancel_grant(tenant, baseline.id).await.unwrap(),
            CancelOutcome::AlreadyTerminal(GrantStatus::Canceled)
        );

        let err = fx.engine.cancel_grant(Uuid::new_v4(), paid).await.unwrap_err();
        assert!(matches!(err, LedgerError::GrantNotFound { .. }));
        assert!(!err.is_retryable());
    }
}
