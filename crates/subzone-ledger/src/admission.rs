//! Admission Gateway
//!
//! Check-then-create for new resources, serialized per tenant so two
//! concurrent requests can never both take the last free slot.

use crate::allocator::QuotaAllocator;
use crate::collaborators::{Provisioner, ResourceParams};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::lifecycle::load_grants_with_baseline;
use crate::locks::TenantLocks;
use crate::model::{Resource, TenantId};
use crate::store::{GrantStore, ResourceStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Admission gateway
pub struct AdmissionGateway {
    grants: Arc<dyn GrantStore>,
    resources: Arc<dyn ResourceStore>,
    locks: Arc<TenantLocks>,
    provisioner: Arc<dyn Provisioner>,
    config: Arc<LedgerConfig>,
}

impl AdmissionGateway {
    pub fn new(
        grants: Arc<dyn GrantStore>,
        resources: Arc<dyn ResourceStore>,
        locks: Arc<TenantLocks>,
        provisioner: Arc<dyn Provisioner>,
        config: Arc<LedgerConfig>,
    ) -> Self {
        Self {
            grants,
            resources,
            locks,
            provisioner,
            config,
        }
    }

    /// Create a resource if the tenant has a free slot.
    ///
    /// A denial is a normal outcome carrying `used` and `quota`. A failed
    /// provisioning call records nothing and returns a retryable error.
    pub async fn try_create_resource(
        &self,
        tenant_id: TenantId,
        params: ResourceParams,
    ) -> LedgerResult<AdmissionOutcome> {
        let guard = self.locks.acquire(tenant_id, self.config.lock_timeout()).await?;

        let allocator = QuotaAllocator::new(self.config.baseline_capacity);
        let grants = load_grants_with_baseline(self.grants.as_ref(), &guard, allocator.baseline_capacity()).await?;
        let active = self.resources.active_count(&tenant_id).await?;
        let check = allocator.can_admit(&grants, active);

        if !check.allowed {
            tracing::info!(
                tenant_id = %tenant_id,
                used = check.used,
                quota = check.quota,
                "resource creation denied, quota exhausted"
            );
            return Ok(AdmissionOutcome {
                admitted: false,
                used: check.used,
                quota: check.quota,
                resource: None,
            });
        }

        if let Err(e) = self.provisioner.provision(tenant_id, &params).await {
            tracing::warn!(
                tenant_id = %tenant_id,
                subdomain = %params.subdomain,
                error = %e,
                "provisioning failed, nothing recorded"
            );
            return Err(LedgerError::Provisioning(e));
        }

        let resource = Resource::new(tenant_id, params.subdomain.clone());
        if let Err(e) = self.resources.insert(&resource).await {
            // Undo the DNS record so it is not left unaccounted for
            if let Err(undo) = self.provisioner.deprovision(tenant_id, &params).await {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    subdomain = %params.subdomain,
                    error = %undo,
                    "rollback deprovision failed"
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            tenant_id = %tenant_id,
            resource_id = %resource.id,
            subdomain = %resource.subdomain,
            used = check.used + 1,
            quota = check.quota,
            "resource created"
        );
        Ok(AdmissionOutcome {
            admitted: true,
            used: check.used + 1,
            quota: check.quota,
            resource: Some(resource),
        })
    }
}

/// Result of an admission attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionOutcome {
    pub admitted: bool,
    /// Active resources after the attempt
    pub used: u32,
    pub quota: u32,
    /// The created resource when admitted
    pub resource: Option<Resource>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::testing::RecordingProvisioner;
    use crate::model::{Grant, GrantTier};
    use crate::store::{InMemoryGrantStore, InMemoryResourceStore};
    use uuid::Uuid;

    struct Fixture {
        gateway: Arc<AdmissionGateway>,
        grants: Arc<InMemoryGrantStore>,
        resources: Arc<InMemoryResourceStore>,
        provisioner: Arc<RecordingProvisioner>,
        locks: Arc<TenantLocks>,
    }

    fn fixture() -> Fixture {
        fixture_with(LedgerConfig::default())
    }

    fn fixture_with(config: LedgerConfig) -> Fixture {
        let grants = Arc::new(InMemoryGrantStore::new());
        let resources = Arc::new(InMemoryResourceStore::new());
        let provisioner = Arc::new(RecordingProvisioner::default());
        let locks = Arc::new(TenantLocks::new());
        let gateway = Arc::new(AdmissionGateway::new(
            grants.clone(),
            resources.clone(),
            locks.clone(),
            provisioner.clone(),
            Arc::new(config),
        ));
        Fixture { gateway, grants, resources, provisioner, locks }
    }

    #[tokio::test]
    async fn test_first_request_provisions_baseline() {
        let fx = fixture();
        let tenant = Uuid::new_v4();

        let outcome = fx.gateway.try_create_resource(tenant, ResourceParams::new("blog")).await.unwrap();
        assert!(outcome.admitted);
        assert_eq!((outcome.used, outcome.quota), (1, 2));

        let grants = fx.grants.list_for_tenant(&tenant).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert!(grants[0].is_live_baseline());
    }

    #[tokio::test]
    async fn test_denial_payload() {
        let fx = fixture();
        let tenant = Uuid::new_v4();

        for name in ["a", "b"] {
            assert!(fx.gateway.try_create_resource(tenant, ResourceParams::new(name)).await.unwrap().admitted);
        }

        let denied = fx.gateway.try_create_resource(tenant, ResourceParams::new("c")).await.unwrap();
        assert_eq!(
            denied,
            AdmissionOutcome { admitted: false, used: 2, quota: 2, resource: None }
        );
        assert_eq!(fx.resources.active_count(&tenant).await.unwrap(), 2);
        assert_eq!(fx.provisioner.provisioned.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_provisioning_failure_records_nothing() {
        let fx = fixture();
        let tenant = Uuid::new_v4();
        fx.provisioner.set_failing(true);

        let err = fx
            .gateway
            .try_create_resource(tenant, ResourceParams::new("shop"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Provisioning(_)));
        assert!(err.is_retryable());
        assert_eq!(fx.resources.active_count(&tenant).await.unwrap(), 0);

        fx.provisioner.set_failing(false);
        let retried = fx.gateway.try_create_resource(tenant, ResourceParams::new("shop")).await.unwrap();
        assert!(retried.admitted);
        assert_eq!(retried.used, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_exact() {
        let fx = fixture();
        let tenant = Uuid::new_v4();
        fx.grants.insert(&Grant::baseline(tenant, 2)).await.unwrap();
        fx.grants
            .insert(&Grant::purchased(tenant, GrantTier::AddonSmall, 7, "sub_1", None, None))
            .await
            .unwrap();
        let quota = 7;

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let gateway = fx.gateway.clone();
                tokio::spawn(async move {
                    gateway
                        .try_create_resource(tenant, ResourceParams::new(format!("site-{i}")))
                        .await
                })
            })
            .collect();

        let mut admitted = 0;
        let mut denied = 0;
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            if outcome.admitted {
                admitted += 1;
            } else {
                denied += 1;
                assert_eq!(outcome.quota, quota);
            }
        }

        assert_eq!(admitted, quota);
        assert_eq!(denied, 25 - quota);
        assert_eq!(fx.resources.active_count(&tenant).await.unwrap(), quota);
    }

    #[tokio::test]
    async fn test_busy_tenant_times_out_retryable() {
        let fx = fixture_with(LedgerConfig {
            lock_timeout_ms: 20,
            ..LedgerConfig::default()
        });
        let tenant = Uuid::new_v4();

        let held = fx.locks.try_acquire(tenant).unwrap();
        let err = fx
            .gateway
            .try_create_resource(tenant, ResourceParams::new("blog"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout(id) if id == tenant));
        assert!(err.is_retryable());
        assert!(fx.provisioner.provisioned.lock().is_empty());
        assert_eq!(fx.resources.active_count(&tenant).await.unwrap(), 0);

        drop(held);
        let retried = fx.gateway.try_create_resource(tenant, ResourceParams::new("blog")).await.unwrap();
        assert!(retried.admitted);
    }
}
