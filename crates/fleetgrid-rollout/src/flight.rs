//! Single-flight enforcement: at most one active run per target group.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use fleetgrid_core::ConflictPolicy;

use crate::error::{DeployError, DeployResult};

/// Held for the lifetime of a run; dropping it lets the next trigger in.
#[derive(Debug)]
pub struct FlightGuard {
    group: String,
    _slot: OwnedMutexGuard<()>,
}

impl FlightGuard {
    pub fn group(&self) -> &str {
        &self.group
    }
}

/// Per-group run serialization.
pub struct SingleFlight {
    policy: ConflictPolicy,
    slots: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl SingleFlight {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    async fn slot(&self, group: &str) -> Arc<Mutex<()>> {
        if let Some(slot) = self.slots.read().await.get(group) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Claim the group. Waits for the active run (queue) or fails fast (reject).
    pub async fn acquire(&self, group: &str) -> DeployResult<FlightGuard> {
        let slot = self.slot(group).await;
        let guard = match self.policy {
            ConflictPolicy::Queue => match slot.clone().try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    info!(%group, "deployment already active, queueing");
                    slot.lock_owned().await
                }
            },
            ConflictPolicy::Reject => slot
                .try_lock_owned()
                .map_err(|_| DeployError::AlreadyActive(group.to_string()))?,
        };
        debug!(%group, "flight acquired");
        Ok(FlightGuard {
            group: group.to_string(),
            _slot: guard,
        })
    }

    /// Whether a run currently holds the group.
    pub async fn is_active(&self, group: &str) -> bool {
        match self.slots.read().await.get(group) {
            Some(slot) => slot.try_lock().is_err(),
            None => false,
        }
    }
}
