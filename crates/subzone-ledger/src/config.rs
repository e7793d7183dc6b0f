//! Ledger Configuration

use crate::model::GrantTier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Capacity of the free baseline grant
    pub baseline_capacity: u32,
    /// Capacity of each purchasable tier
    pub tiers: TierCatalog,
    /// Delay after a billing period ends before a past-due grant expires
    pub grace_period_hours: u32,
    /// Interval between scheduled sweeps
    pub sweep_interval_secs: u64,
    /// Maximum grants examined per sweep
    pub sweep_batch_size: usize,
    /// Maximum wait for a tenant lock on interactive paths
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            baseline_capacity: 2,
            tiers: TierCatalog::default(),
            grace_period_hours: 48,
            sweep_interval_secs: 3600,
            sweep_batch_size: 500,
            lock_timeout_ms: 2000,
        }
    }
}

impl LedgerConfig {
    /// Load from a JSON file
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the sweep or the admission path
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        if self.sweep_batch_size == 0 {
            return Err(ConfigError::Invalid("sweep_batch_size must be positive".into()));
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("lock_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Capacity for a tier; baseline uses `baseline_capacity`
    pub fn capacity_for(&self, tier: GrantTier) -> u32 {
        match tier {
            GrantTier::Baseline => self.baseline_capacity,
            GrantTier::AddonSmall => self.tiers.addon_small,
            GrantTier::AddonLarge => self.tiers.addon_large,
        }
    }

    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.grace_period_hours))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Purchasable tier capacities, inclusive of the baseline amount
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCatalog {
    pub addon_small: u32,
    pub addon_large: u32,
}

impl Default for TierCatalog {
    fn default() -> Self {
        Self {
            addon_small: 7,
            addon_large: 52,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
