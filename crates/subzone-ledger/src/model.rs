//! Ledger Data Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tenant ID
pub type TenantId = Uuid;

/// Grant ID
pub type GrantId = Uuid;

/// Resource ID
pub type ResourceId = Uuid;

/// Entitlement tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantTier {
    /// Free tier every tenant holds
    Baseline,
    /// Small purchased addon
    AddonSmall,
    /// Large purchased addon
    AddonLarge,
}

impl GrantTier {
    /// Whether this is the free baseline tier
    pub fn is_baseline(&self) -> bool {
        matches!(self, Self::Baseline)
    }

    /// Stable identifier used in logs and notifications
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::AddonSmall => "addon_small",
            Self::AddonLarge => "addon_large",
        }
    }
}

impl std::fmt::Display for GrantTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grant status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Expired,
}

impl GrantStatus {
    /// Live grants contribute capacity
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing | Self::PastDue)
    }

    /// No transitions leave a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Expired)
    }

    /// Transitions a billing-provider update may apply.
    ///
    /// `PastDue -> Expired` is deliberately absent: only the sweep expires
    /// grants, after the grace period.
    pub fn accepts_provider_transition(&self, next: GrantStatus) -> bool {
        use GrantStatus::*;
        match (*self, next) {
            (current, next) if current == next => true,
            (Trialing, Active) | (Active, PastDue) | (PastDue, Active) => true,
            (current, Canceled) => current.is_live(),
            _ => false,
        }
    }
}

/// Entitlement grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Unique grant ID
    pub id: GrantId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Tier
    pub tier: GrantTier,
    /// Lifecycle status
    pub status: GrantStatus,
    /// Total capacity; addon capacity includes the baseline amount
    pub capacity: u32,
    /// Allocation ordering key
    pub created_at: DateTime<Utc>,
    /// Current billing period start
    pub period_start: Option<DateTime<Utc>>,
    /// Current billing period end (`None` for baseline)
    pub period_end: Option<DateTime<Utc>>,
    /// Provider will cancel at period end
    pub cancel_at_period_end: bool,
    /// Scheduled cancellation reported by the provider
    pub cancel_at: Option<DateTime<Utc>>,
    /// When the grant was canceled
    pub canceled_at: Option<DateTime<Utc>>,
    /// When the grant stopped contributing capacity
    pub ended_at: Option<DateTime<Utc>>,
    /// Billing-provider subscription reference
    pub external_ref: Option<String>,
}

impl Grant {
    /// New free baseline grant
    pub fn baseline(tenant_id: TenantId, capacity: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            tier: GrantTier::Baseline,
            status: GrantStatus::Active,
            capacity,
            created_at: Utc::now(),
            period_start: None,
            period_end: None,
            cancel_at_period_end: false,
            cancel_at: None,
            canceled_at: None,
            ended_at: None,
            external_ref: None,
        }
    }

    /// New purchased grant, active from creation
    pub fn purchased(
        tenant_id: TenantId,
        tier: GrantTier,
        capacity: u32,
        external_ref: impl Into<String>,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            tier,
            status: GrantStatus::Active,
            capacity,
            created_at: Utc::now(),
            period_start,
            period_end,
            cancel_at_period_end: false,
            cancel_at: None,
            canceled_at: None,
            ended_at: None,
            external_ref: Some(external_ref.into()),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }

    pub fn is_live_baseline(&self) -> bool {
        self.tier.is_baseline() && self.is_live()
    }

    /// Terminal cancellation; returns false when already terminal
    pub fn cancel(&mut self, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = GrantStatus::Canceled;
        self.canceled_at = Some(at);
        self.ended_at = Some(at);
        true
    }

    /// Terminal expiry; only a past-due grant can expire
    pub fn expire(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != GrantStatus::PastDue {
            return false;
        }
        self.status = GrantStatus::Expired;
        self.ended_at = Some(at);
        true
    }
}

/// Consumable resource (a provisioned subdomain)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub tenant_id: TenantId,
    /// Subdomain label under the shared zone
    pub subdomain: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(tenant_id: TenantId, subdomain: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            subdomain: subdomain.into(),
            active: true,
            created_at: Utc::now(),
            deactivated_at: None,
        }
    }
}
