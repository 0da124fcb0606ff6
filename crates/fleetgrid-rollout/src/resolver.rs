//! Fleet resolver: who is in the group right now.
//!
//! Membership changes out-of-band (scale events, instance replacement), so
//! it is asked for fresh on every run and never cached.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use fleetgrid_core::Target;

use crate::error::{DeployError, DeployResult};

/// Source of truth for group membership.
#[async_trait]
pub trait FleetRegistry: Send + Sync {
    async fn list_healthy(&self, group: &str) -> anyhow::Result<Vec<Target>>;
}

pub struct FleetResolver {
    registry: Arc<dyn FleetRegistry>,
}

impl FleetResolver {
    pub fn new(registry: Arc<dyn FleetRegistry>) -> Self {
        Self { registry }
    }

    /// Healthy, de-duplicated members of `group`, in registry order.
    ///
    /// An empty list is a valid answer, not an error.
    pub async fn resolve(&self, group: &str) -> DeployResult<Vec<Target>> {
        let members = self
            .registry
            .list_healthy(group)
            .await
            .map_err(|e| DeployError::Registry(format!("{e:#}")))?;

        let reported = members.len();
        let mut seen = HashSet::new();
        let targets: Vec<Target> = members
            .into_iter()
            .filter(|t| t.is_healthy())
            .filter(|t| seen.insert(t.id.clone()))
            .collect();

        if targets.len() != reported {
            debug!(%group, reported, eligible = targets.len(), "dropped ineligible registry entries");
        }
        info!(%group, targets = targets.len(), "fleet resolved");
        Ok(targets)
    }
}
