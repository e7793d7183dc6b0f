//! Grant and Resource Stores
//!
//! Persistence seams for the ledger. Stores are plain record keepers: every
//! business rule lives in the engines, and every mutating call is made while
//! the caller holds the owning tenant's lock.

use crate::model::{Grant, GrantId, GrantStatus, Resource, TenantId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Position in the past-due scan: `(period_end, id)` of the last grant seen
pub type DueCursor = (DateTime<Utc>, GrantId);

/// Store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable grant records
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Insert a new grant; `external_ref` must be unique when present
    async fn insert(&self, grant: &Grant) -> StoreResult<()>;

    /// Overwrite an existing grant
    async fn update(&self, grant: &Grant) -> StoreResult<()>;

    /// Get grant by ID
    async fn get(&self, id: &GrantId) -> StoreResult<Option<Grant>>;

    /// All grants of a tenant, any status
    async fn list_for_tenant(&self, tenant_id: &TenantId) -> StoreResult<Vec<Grant>>;

    /// Look up the grant backing a billing-provider object
    async fn find_by_external_ref(&self, external_ref: &str) -> StoreResult<Option<Grant>>;

    /// Past-due grants whose period ended at or before `cutoff`, ordered by
    /// `(period_end, id)` and starting strictly after `after` when given
    async fn past_due_ended_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Grant>>;
}

/// Durable resource records
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Record a newly provisioned resource
    async fn insert(&self, resource: &Resource) -> StoreResult<()>;

    /// Number of active resources held by a tenant
    async fn active_count(&self, tenant_id: &TenantId) -> StoreResult<u32>;

    /// Active resources held by a tenant
    async fn list_active(&self, tenant_id: &TenantId) -> StoreResult<Vec<Resource>>;

    /// Deactivate every active resource of a tenant, returning them
    async fn deactivate_all(
        &self,
        tenant_id: &TenantId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<Resource>>;
}

/// In-memory grant store (for testing and development)
pub struct InMemoryGrantStore {
    grants: RwLock<HashMap<GrantId, Grant>>,
    by_external_ref: RwLock<HashMap<String, GrantId>>,
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            by_external_ref: RwLock::new(HashMap::new()),
        }
    }

    /// Every stored grant, ordered by creation
    pub fn all(&self) -> Vec<Grant> {
        let mut grants: Vec<Grant> = self.grants.read().values().cloned().collect();
        grants.sort_by_key(|g| (g.created_at, g.id));
        grants
    }
}

impl Default for InMemoryGrantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn insert(&self, grant: &Grant) -> StoreResult<()> {
        let mut grants = self.grants.write();
        let mut refs = self.by_external_ref.write();

        if grants.contains_key(&grant.id) {
            return Err(StoreError::Conflict(format!("grant {}", grant.id)));
        }
        if let Some(external_ref) = &grant.external_ref {
            if refs.contains_key(external_ref) {
                return Err(StoreError::Conflict(format!("external ref {external_ref}")));
            }
            refs.insert(external_ref.clone(), grant.id);
        }
        grants.insert(grant.id, grant.clone());
        Ok(())
    }

    async fn update(&self, grant: &Grant) -> StoreResult<()> {
        let mut grants = self.grants.write();
        let existing = grants
            .get_mut(&grant.id)
            .ok_or_else(|| StoreError::NotFound(format!("grant {}", grant.id)))?;

        if existing.external_ref != grant.external_ref {
            return Err(StoreError::Conflict(format!(
                "external ref of grant {} is immutable",
                grant.id
            )));
        }
        *existing = grant.clone();
        Ok(())
    }

    async fn get(&self, id: &GrantId) -> StoreResult<Option<Grant>> {
        Ok(self.grants.read().get(id).cloned())
    }

    async fn list_for_tenant(&self, tenant_id: &TenantId) -> StoreResult<Vec<Grant>> {
        Ok(self
            .grants
            .read()
            .values()
            .filter(|g| g.tenant_id == *tenant_id)
            .cloned()
            .collect())
    }

    async fn find_by_external_ref(&self, external_ref: &str) -> StoreResult<Option<Grant>> {
        let id = match self.by_external_ref.read().get(external_ref) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(self.grants.read().get(&id).cloned())
    }

    async fn past_due_ended_before(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<DueCursor>,
        limit: usize,
    ) -> StoreResult<Vec<Grant>> {
        let mut due: Vec<(DueCursor, Grant)> = self
            .grants
            .read()
            .values()
            .filter(|g| g.status == GrantStatus::PastDue)
            .filter_map(|g| g.period_end.map(|end| ((end, g.id), g)))
            .filter(|(key, _)| key.0 <= cutoff)
            .filter(|(key, _)| after.map_or(true, |cursor| *key > cursor))
            .map(|(key, g)| (key, g.clone()))
            .collect();

        due.sort_by_key(|(key, _)| *key);
        let mut due: Vec<Grant> = due.into_iter().map(|(_, g)| g).collect();
        due.truncate(limit);
        Ok(due)
    }
}

/// In-memory resource store (for testing and development)
pub struct InMemoryResourceStore {
    resources: RwLock<HashMap<TenantId, Vec<Resource>>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Every stored resource, active or not, ordered by creation
    pub fn all(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self.resources.read().values().flatten().cloned().collect();
        resources.sort_by_key(|r| (r.created_at, r.id));
        resources
    }
}

impl Default for InMemoryResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn insert(&self, resource: &Resource) -> StoreResult<()> {
        let mut resources = self.resources.write();
        let owned = resources.entry(resource.tenant_id).or_default();

        if owned.iter().any(|r| r.id == resource.id) {
            return Err(StoreError::Conflict(format!("resource {}", resource.id)));
        }
        owned.push(resource.clone());
        Ok(())
    }

    async fn active_count(&self, tenant_id: &TenantId) -> StoreResult<u32> {
        let count = self
            .resources
            .read()
            .get(tenant_id)
            .map(|owned| owned.iter().filter(|r| r.active).count())
            .unwrap_or(0);
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn list_active(&self, tenant_id: &TenantId) -> StoreResult<Vec<Resource>> {
        Ok(self
            .resources
            .read()
            .get(tenant_id)
            .map(|owned| owned.iter().filter(|r| r.active).cloned().collect())
            .unwrap_or_default())
    }

    async fn deactivate_all(
        &self,
        tenant_id: &TenantId,
        at: DateTime<Utc>,
    ) -> StoreResult<Vec<Resource>> {
        let mut resources = self.resources.write();
        let Some(owned) = resources.get_mut(tenant_id) else {
            return Ok(Vec::new());
        };

        let mut deactivated = Vec::new();
        for resource in owned.iter_mut().filter(|r| r.active) {
            resource.active = false;
            resource.deactivated_at = Some(at);
            deactivated.push(resource.clone());
        }
        Ok(deactivated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GrantTier;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_external_ref_unique() {
        let store = InMemoryGrantStore::new();
        let tenant = Uuid::new_v4();

        let first = Grant::purchased(tenant, GrantTier::AddonSmall, 7, "sub_1", None, None);
        let second = Grant::purchased(tenant, GrantTier::AddonLarge, 52, "sub_1", None, None);

        store.insert(&first).await.unwrap();
        assert!(matches!(
            store.insert(&second).await,
            Err(StoreError::Conflict(_))
        ));

        let found = store.find_by_external_ref("sub_1").await.unwrap().unwrap();
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_past_due_selection() {
        let store = InMemoryGrantStore::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        let mut old = Grant::purchased(tenant, GrantTier::AddonSmall, 7, "sub_old", None, Some(now - Duration::days(5)));
        old.status = GrantStatus::PastDue;
        let mut recent = Grant::purchased(tenant, GrantTier::AddonSmall, 7, "sub_new", None, Some(now - Duration::hours(1)));
        recent.status = GrantStatus::PastDue;
        let active = Grant::purchased(tenant, GrantTier::AddonLarge, 52, "sub_ok", None, Some(now - Duration::days(5)));

        for grant in [&old, &recent, &active] {
            store.insert(grant).await.unwrap();
        }

        let due = store
            .past_due_ended_before(now - Duration::hours(48), None, 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, old.id);

        let none = store.past_due_ended_before(now, None, 0).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_past_due_resumes_after_cursor() {
        let store = InMemoryGrantStore::new();
        let tenant = Uuid::new_v4();
        let now = Utc::now();

        let mut ids = Vec::new();
        for days in [9, 7, 5] {
            let mut grant = Grant::purchased(
                tenant,
                GrantTier::AddonSmall,
                7,
                format!("sub_{days}"),
                None,
                Some(now - Duration::days(days)),
            );
            grant.status = GrantStatus::PastDue;
            store.insert(&grant).await.unwrap();
            ids.push(grant.id);
        }

        let first = store.past_due_ended_before(now, None, 2).await.unwrap();
        assert_eq!(first.iter().map(|g| g.id).collect::<Vec<_>>(), ids[..2]);

        let last = &first[1];
        let cursor = (last.period_end.unwrap(), last.id);
        let rest = store.past_due_ended_before(now, Some(cursor), 2).await.unwrap();
        assert_eq!(rest.iter().map(|g| g.id).collect::<Vec<_>>(), ids[2..]);
    }

    #[tokio::test]
    async fn test_deactivate_all() {
        let store = InMemoryResourceStore::new();
        let tenant = Uuid::new_v4();

        store.insert(&Resource::new(tenant, "alpha")).await.unwrap();
        store.insert(&Resource::new(tenant, "beta")).await.unwrap();
        assert_eq!(store.active_count(&tenant).await.unwrap(), 2);

        let gone = store.deactivate_all(&tenant, Utc::now()).await.unwrap();
        assert_eq!(gone.len(), 2);
        assert!(gone.iter().all(|r| !r.active && r.deactivated_at.is_some()));
        assert_eq!(store.active_count(&tenant).await.unwrap(), 0);

        // Nothing left to deactivate
        assert!(store.deactivate_all(&tenant, Utc::now()).await.unwrap().is_empty());
    }
}
