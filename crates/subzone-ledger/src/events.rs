//! Billing-Provider Events
//!
//! Typed events handed over by the webhook receiver after it has verified
//! their signature. Delivery is at-least-once and unordered.

use crate::model::{GrantId, GrantStatus, GrantTier, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing-provider event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BillingEvent {
    /// Checkout finished; a new paid grant exists
    PurchaseCompleted {
        tenant_id: TenantId,
        external_ref: String,
        tier: GrantTier,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    },
    /// Subscription status or period changed
    GrantUpdated {
        external_ref: String,
        /// Provider status vocabulary, mapped by [`map_provider_status`]
        status: String,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        cancel_at_period_end: bool,
        cancel_at: Option<DateTime<Utc>>,
    },
    /// Subscription deleted at the provider
    GrantEnded { external_ref: String },
}

impl BillingEvent {
    pub fn external_ref(&self) -> &str {
        match self {
            Self::PurchaseCompleted { external_ref, .. }
            | Self::GrantUpdated { external_ref, .. }
            | Self::GrantEnded { external_ref } => external_ref,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PurchaseCompleted { .. } => "purchase_completed",
            Self::GrantUpdated { .. } => "grant_updated",
            Self::GrantEnded { .. } => "grant_ended",
        }
    }
}

/// Map a provider subscription status onto a local grant status.
///
/// Anything not listed returns `None` and leaves the local status alone.
pub fn map_provider_status(status: &str) -> Option<GrantStatus> {
    match status {
        "active" => Some(GrantStatus::Active),
        "trialing" => Some(GrantStatus::Trialing),
        "past_due" => Some(GrantStatus::PastDue),
        "canceled" => Some(GrantStatus::Canceled),
        _ => None,
    }
}

/// What ingesting an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new grant was created
    Created(GrantId),
    /// An existing grant changed
    Applied(GrantId),
    /// Event carried nothing new (redelivery or terminal grant)
    Unchanged(GrantId),
    /// No grant references this provider object
    UnknownReference,
    /// Provider status has no local mapping; status left unchanged
    UnmappedStatus { grant_id: GrantId, status: String },
    /// Tier cannot be purchased
    UnsupportedTier(GrantTier),
}
