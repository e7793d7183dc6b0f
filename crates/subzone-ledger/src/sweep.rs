//! Expiration Sweep
//!
//! Finalizes past-due grants once their grace period has elapsed and applies
//! the deactivation policy. Each grant is handled under its tenant's lock;
//! tenants whose lock is held elsewhere are left for the next run.
//!
//! Deactivation is all-or-nothing: when the remaining quota no longer covers
//! the active resources, every active resource of the tenant is deactivated,
//! not only the overflow.
//!
//! The `Expired` status is the last write of a grant's step. A failure before
//! it leaves the grant past-due and the next run redoes the whole step.
//! Candidates are read in `(period_end, id)` order from a cursor that
//! advances between runs, so grants that keep failing cannot starve the rest.

use crate::allocator::QuotaAllocator;
use crate::collaborators::{Notifier, Provisioner, ResourceParams};
use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::lifecycle::load_grants_with_baseline;
use crate::locks::{TenantGuard, TenantLocks};
use crate::model::{GrantId, GrantStatus, GrantTier, Resource, TenantId};
use crate::store::{DueCursor, GrantStore, ResourceStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Expiration sweep
pub struct ExpirationSweep {
    grants: Arc<dyn GrantStore>,
    resources: Arc<dyn ResourceStore>,
    locks: Arc<TenantLocks>,
    provisioner: Arc<dyn Provisioner>,
    notifier: Arc<dyn Notifier>,
    config: Arc<LedgerConfig>,
    cursor: Mutex<Option<DueCursor>>,
}

impl ExpirationSweep {
    pub fn new(
        grants: Arc<dyn GrantStore>,
        resources: Arc<dyn ResourceStore>,
        locks: Arc<TenantLocks>,
        provisioner: Arc<dyn Provisioner>,
        notifier: Arc<dyn Notifier>,
        config: Arc<LedgerConfig>,
    ) -> Self {
        Self {
            grants,
            resources,
            locks,
            provisioner,
            notifier,
            config,
            cursor: Mutex::new(None),
        }
    }

    /// Run one bounded sweep
    pub async fn run(&self) -> LedgerResult<SweepReport> {
        let now = Utc::now();
        let cutoff = now - self.config.grace_period();
        let batch_size = self.config.sweep_batch_size;

        let after = *self.cursor.lock();
        let mut candidates = self.grants.past_due_ended_before(cutoff, after, batch_size).await?;
        if candidates.is_empty() && after.is_some() {
            // End of the scan; wrap around
            candidates = self.grants.past_due_ended_before(cutoff, None, batch_size).await?;
        }
        *self.cursor.lock() = if candidates.len() < batch_size {
            None
        } else {
            candidates
                .last()
                .and_then(|g| g.period_end.map(|end| (end, g.id)))
        };

        let mut report = SweepReport {
            examined: candidates.len(),
            ..Default::default()
        };

        for candidate in candidates {
            let Some(guard) = self.locks.try_acquire(candidate.tenant_id) else {
                tracing::debug!(
                    tenant_id = %candidate.tenant_id,
                    grant_id = %candidate.id,
                    "tenant busy, expiry deferred"
                );
                report.deferred += 1;
                continue;
            };

            let expiry = match self.expire_grant(&guard, candidate.id, cutoff, now).await {
                Ok(Some(expiry)) => expiry,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %candidate.tenant_id,
                        grant_id = %candidate.id,
                        error = %e,
                        "grant expiry failed"
                    );
                    report.failed += 1;
                    continue;
                }
            };
            drop(guard);

            report.expired += 1;
            report.resources_deactivated += expiry.deactivated.len();
            self.after_expiry(expiry).await;
        }

        let pruned = self.locks.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "idle tenant locks dropped");
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                expired = report.expired,
                deferred = report.deferred,
                failed = report.failed,
                resources_deactivated = report.resources_deactivated,
                "expiration sweep finished"
            );
        }
        Ok(report)
    }

    /// Expire one grant and apply the deactivation policy.
    ///
    /// Re-derives everything from the stores so a retried sweep converges.
    async fn expire_grant(
        &self,
        guard: &TenantGuard,
        grant_id: GrantId,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Option<Expiry>> {
        let tenant_id = guard.tenant_id();

        let Some(mut grant) = self.grants.get(&grant_id).await? else {
            return Ok(None);
        };
        let still_due = grant.status == GrantStatus::PastDue
            && grant.period_end.is_some_and(|end| end <= cutoff);
        if !still_due {
            return Ok(None);
        }

        let allocator = QuotaAllocator::new(self.config.baseline_capacity);
        let mut grants =
            load_grants_with_baseline(self.grants.as_ref(), guard, allocator.baseline_capacity()).await?;
        grants.retain(|g| g.id != grant_id);
        let remaining = allocator.total_quota(&grants);
        let active = self.resources.active_count(&tenant_id).await?;

        let deactivated = if active > remaining {
            self.resources.deactivate_all(&tenant_id, now).await?
        } else {
            Vec::new()
        };

        grant.expire(now);
        self.grants.update(&grant).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            grant_id = %grant.id,
            tier = %grant.tier,
            remaining_quota = remaining,
            active,
            deactivated = deactivated.len(),
            "grant expired"
        );

        Ok(Some(Expiry {
            tenant_id,
            tier: grant.tier,
            deactivated,
        }))
    }

    /// Best-effort DNS cleanup and notification, outside the tenant lock
    async fn after_expiry(&self, expiry: Expiry) {
        for resource in &expiry.deactivated {
            let params = ResourceParams::new(resource.subdomain.clone());
            if let Err(e) = self.provisioner.deprovision(expiry.tenant_id, &params).await {
                tracing::warn!(
                    tenant_id = %expiry.tenant_id,
                    subdomain = %resource.subdomain,
                    error = %e,
                    "deprovision failed, resource stays deactivated"
                );
            }
        }

        let count = u32::try_from(expiry.deactivated.len()).unwrap_or(u32::MAX);
        if let Err(e) = self.notifier.notify_expired(expiry.tenant_id, expiry.tier, count).await {
            tracing::warn!(tenant_id = %expiry.tenant_id, error = %e, "expiry notification failed");
        }
    }
}

struct Expiry {
    tenant_id: TenantId,
    tier: GrantTier,
    deactivated: Vec<Resource>,
}

/// Outcome of one sweep run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Candidates selected
    pub examined: usize,
    /// Grants moved to expired
    pub expired: usize,
    /// Skipped because the tenant was busy
    pub deferred: usize,
    /// Failed; retried on the next run
    pub failed: usize,
    pub resources_deactivated: usize,
}
