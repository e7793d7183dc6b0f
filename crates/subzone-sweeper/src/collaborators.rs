//! Log-only collaborators
//!
//! Stand-ins used until the DNS, mail and billing integrations are wired in:
//! every call succeeds and leaves a log line.

use async_trait::async_trait;
use subzone_ledger::{
    BillingGateway, CollaboratorError, GrantTier, Notifier, Provisioner, ResourceParams, TenantId,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunProvisioner;

#[async_trait]
impl Provisioner for DryRunProvisioner {
    async fn provision(&self, tenant_id: TenantId, params: &ResourceParams) -> Result<(), CollaboratorError> {
        tracing::info!(tenant_id = %tenant_id, subdomain = %params.subdomain, "dry-run provision");
        Ok(())
    }

    async fn deprovision(&self, tenant_id: TenantId, params: &ResourceParams) -> Result<(), CollaboratorError> {
        tracing::info!(tenant_id = %tenant_id, subdomain = %params.subdomain, "dry-run deprovision");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_expired(
        &self,
        tenant_id: TenantId,
        tier: GrantTier,
        deactivated_count: u32,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            tenant_id = %tenant_id,
            tier = %tier,
            deactivated_count,
            "expiry notice"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunBilling;

#[async_trait]
impl BillingGateway for DryRunBilling {
    async fn request_cancellation(&self, external_ref: &str) -> Result<(), CollaboratorError> {
        tracing::info!(external_ref = %external_ref, "dry-run cancellation request");
        Ok(())
    }
}
