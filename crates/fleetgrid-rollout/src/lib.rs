//! FleetGrid deployment orchestrator: ship, verify, revert.
//!
//! This crate holds the deployment state machine and the collaborators it
//! sequences. A run moves strictly through
//! `Gated → Resolving → BackingUp → Deploying → Verifying → Succeeded`,
//! and any failure from `Deploying` on goes through one shared
//! `RollingBack` path ending in `RolledBack` (or `Failed` when a restore
//! itself fails). An empty fleet ends the run as `NoOp`.
//!
//! # Components
//!
//! - **`publisher`**: versioned artifact writes and the "current" pointer
//! - **`resolver`**: healthy members of a target group, read fresh per run
//! - **`executor`**: dispatch command sets, poll to an aggregate verdict
//! - **`backup`**: per-target snapshots before mutation, restore on rollback
//! - **`probe`**: command-based health probes over the executor
//! - **`gate`**: build-signal admission policy
//! - **`flight`**: one active run per group (queue or reject)
//! - **`notify`**: one structured record per terminal run
//! - **`orchestrator`**: the state machine tying it together

pub mod backup;
pub mod error;
pub mod executor;
pub mod flight;
pub mod gate;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod publisher;
pub mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use backup::{BackupController, EMPTY_BACKUP_MARKER, RestoreOutcome};
pub use error::{DeployError, DeployResult};
pub use executor::{CommandExecutor, DispatchPolicy, InvocationOutcome, RemoteCommandApi};
pub use flight::{FlightGuard, SingleFlight};
pub use gate::{GateSignal, GateStatus};
pub use notify::{FanoutNotifier, LogNotifier, Notifier, RunNotification};
pub use orchestrator::{ArtifactSource, DeployRequest, Orchestrator};
pub use probe::{CommandProbe, FleetProber};
pub use publisher::{Artifact, ArtifactPublisher, ObjectStore};
pub use resolver::{FleetRegistry, FleetResolver};
