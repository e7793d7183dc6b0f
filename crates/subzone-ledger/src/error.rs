//! Error types for the ledger

use crate::model::{GrantId, TenantId};
use crate::store::StoreError;
use thiserror::Error;

/// Failure reported by an external collaborator
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    /// Upstream rejected or failed the call
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Upstream did not answer in time
    #[error("upstream timeout")]
    Timeout,
}

/// Ledger error type
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Grant not found for tenant
    #[error("grant {grant_id} not found for tenant {tenant_id}")]
    GrantNotFound { tenant_id: TenantId, grant_id: GrantId },

    /// Tenant lock not acquired in time
    #[error("tenant {0} is busy, retry later")]
    LockTimeout(TenantId),

    /// Resource provisioning failed; nothing was recorded
    #[error("provisioning failed: {0}")]
    Provisioning(#[source] CollaboratorError),

    /// Billing provider call failed
    #[error("billing provider error: {0}")]
    Billing(#[source] CollaboratorError),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Whether the caller should back off and retry
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::LockTimeout(_) | Self::Provisioning(_) | Self::Billing(_) => true,
            Self::Store(StoreError::Storage(_)) => true,
            Self::Store(_) | Self::GrantNotFound { .. } => false,
        }
    }
}

/// Result type for the ledger
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_retry_classification() {
        assert!(LedgerError::LockTimeout(Uuid::new_v4()).is_retryable());
        assert!(LedgerError::Provisioning(CollaboratorError::Timeout).is_retryable());
        assert!(LedgerError::Store(StoreError::Storage("disk".into())).is_retryable());

        assert!(!LedgerError::Store(StoreError::Conflict("dup".into())).is_retryable());
        assert!(!LedgerError::GrantNotFound {
            tenant_id: Uuid::new_v4(),
            grant_id: Uuid::new_v4(),
        }
        .is_retryable());
    }
}
