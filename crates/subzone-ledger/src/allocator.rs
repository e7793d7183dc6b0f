//! Quota Allocation
//!
//! Pure computation over a snapshot of a tenant's grants and active resource
//! count. Nothing here touches a store, and nothing here creates grants: the
//! lifecycle engine guarantees a live baseline exists before a snapshot is
//! handed over.
//!
//! Addon capacities are priced inclusive of the baseline amount, so an
//! addon's contribution to the total is its capacity minus the baseline
//! capacity, clamped at zero.

use crate::model::{Grant, GrantId, GrantStatus, GrantTier, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quota allocator
#[derive(Debug, Clone, Copy)]
pub struct QuotaAllocator {
    baseline_capacity: u32,
}

impl QuotaAllocator {
    pub fn new(baseline_capacity: u32) -> Self {
        Self { baseline_capacity }
    }

    pub fn baseline_capacity(&self) -> u32 {
        self.baseline_capacity
    }

    /// Contribution of a single grant to total quota
    pub fn effective_capacity(&self, grant: &Grant) -> u32 {
        if grant.tier.is_baseline() {
            grant.capacity
        } else {
            grant.capacity.saturating_sub(self.baseline_capacity)
        }
    }

    /// Total quota across live grants
    pub fn total_quota(&self, grants: &[Grant]) -> u32 {
        grants
            .iter()
            .filter(|g| g.is_live())
            .fold(0u32, |total, g| total.saturating_add(self.effective_capacity(g)))
    }

    /// Live grants in allocation order: baseline first, then by creation
    pub fn ordered_live_grants<'a>(&self, grants: &'a [Grant]) -> Vec<&'a Grant> {
        let mut live: Vec<&Grant> = grants.iter().filter(|g| g.is_live()).collect();
        live.sort_by_key(|g| allocation_key(g));
        live
    }

    /// Greedy attribution of usage across ordered grants.
    ///
    /// Usage beyond the summed effective capacity is left unattributed.
    pub fn attribute_usage(&self, ordered: &[&Grant], active_count: u32) -> Vec<GrantUsage> {
        let mut remaining = active_count;

        ordered
            .iter()
            .map(|grant| {
                let effective = self.effective_capacity(grant);
                let used = remaining.min(effective);
                remaining -= used;

                GrantUsage {
                    grant_id: grant.id,
                    tier: grant.tier,
                    status: grant.status,
                    capacity: grant.capacity,
                    effective_capacity: effective,
                    used,
                    period_end: grant.period_end,
                    cancel_at_period_end: grant.cancel_at_period_end,
                }
            })
            .collect()
    }

    /// Admission check against the current snapshot
    pub fn can_admit(&self, grants: &[Grant], active_count: u32) -> AdmissionCheck {
        let quota = self.total_quota(grants);
        AdmissionCheck {
            allowed: active_count < quota,
            used: active_count,
            quota,
        }
    }

    /// Display summary with per-grant breakdown
    pub fn summarize(&self, tenant_id: TenantId, grants: &[Grant], active_count: u32) -> QuotaSummary {
        let total_quota = self.total_quota(grants);
        let ordered = self.ordered_live_grants(grants);

        QuotaSummary {
            tenant_id,
            total_quota,
            used: active_count,
            remaining: total_quota.saturating_sub(active_count),
            grants: self.attribute_usage(&ordered, active_count),
        }
    }
}

/// Sort key for allocation order.
///
/// Baseline ranks ahead of every addon whatever its creation time; within a
/// rank, creation time then ID decide.
fn allocation_key(grant: &Grant) -> (u8, DateTime<Utc>, GrantId) {
    let rank = match grant.tier {
        GrantTier::Baseline => 0,
        GrantTier::AddonSmall | GrantTier::AddonLarge => 1,
    };
    (rank, grant.created_at, grant.id)
}

/// Usage attributed to one grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantUsage {
    pub grant_id: GrantId,
    pub tier: GrantTier,
    pub status: GrantStatus,
    pub capacity: u32,
    pub effective_capacity: u32,
    pub used: u32,
    pub period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionCheck {
    pub allowed: bool,
    pub used: u32,
    pub quota: u32,
}

/// Tenant quota summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSummary {
    pub tenant_id: TenantId,
    pub total_quota: u32,
    pub used: u32,
    pub remaining: u32,
    /// Live grants in allocation order
    pub grants: Vec<GrantUsage>,
}
