//! External Collaborators
//!
//! DNS provisioning, tenant notification and the billing provider sit
//! outside the ledger. They are injected at construction.

use crate::error::CollaboratorError;
use crate::model::{GrantTier, TenantId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Parameters of a resource to provision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceParams {
    /// Subdomain label under the shared zone
    pub subdomain: String,
    /// Record target (address or hostname)
    pub target: Option<String>,
}

impl ResourceParams {
    pub fn new(subdomain: impl Into<String>) -> Self {
        Self {
            subdomain: subdomain.into(),
            target: None,
        }
    }
}

/// DNS record provisioning
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(&self, tenant_id: TenantId, params: &ResourceParams) -> Result<(), CollaboratorError>;

    /// Best effort; failure never blocks a ledger state change
    async fn deprovision(&self, tenant_id: TenantId, params: &ResourceParams) -> Result<(), CollaboratorError>;
}

/// Lifecycle notifications to tenants
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_expired(
        &self,
        tenant_id: TenantId,
        tier: GrantTier,
        deactivated_count: u32,
    ) -> Result<(), CollaboratorError>;
}

/// Billing-provider operations the ledger initiates
#[async_trait]
pub trait BillingGateway: Send + Sync {
    /// Ask the provider to cancel a subscription; the provider confirms
    /// later with a `GrantEnded` event.
    async fn request_cancellation(&self, external_ref: &str) -> Result<(), CollaboratorError>;
}
