//! Ledger state file
//!
//! JSON snapshot of every grant and resource record. The sweeper loads it
//! into the in-memory stores at startup and writes it back after sweeping.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use subzone_ledger::{Grant, GrantStore, InMemoryGrantStore, InMemoryResourceStore, Resource, ResourceStore};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub grants: Vec<Grant>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// In-memory stores seeded from a snapshot
pub struct LoadedState {
    pub grants: Arc<InMemoryGrantStore>,
    pub resources: Arc<InMemoryResourceStore>,
}

impl StateSnapshot {
    /// Read a snapshot; a missing file is an empty ledger
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "state file not found, starting empty");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading state file {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("parsing state file {}", path.display()))
    }

    pub async fn into_stores(self) -> anyhow::Result<LoadedState> {
        let grants = Arc::new(InMemoryGrantStore::new());
        let resources = Arc::new(InMemoryResourceStore::new());

        for grant in &self.grants {
            grants
                .insert(grant)
                .await
                .with_context(|| format!("loading grant {}", grant.id))?;
        }
        for resource in &self.resources {
            resources
                .insert(resource)
                .await
                .with_context(|| format!("loading resource {}", resource.id))?;
        }

        tracing::info!(
            grants = self.grants.len(),
            resources = self.resources.len(),
            "ledger state loaded"
        );
        Ok(LoadedState { grants, resources })
    }

    pub fn capture(state: &LoadedState) -> Self {
        Self {
            grants: state.grants.all(),
            resources: state.resources.all(),
        }
    }

    /// Write atomically: temp file in the same directory, then rename
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}
