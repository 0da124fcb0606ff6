//! Domain types for the FleetGrid state store.
//!
//! These types are the persisted record of deployment runs and backups.
//! All are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use fleetgrid_core::{ArtifactVersion, GroupName, TargetId};

/// Unique identifier for a deployment run (UUID v4).
pub type RunId = String;

/// Identifier handed out by the remote command service.
pub type InvocationId = String;

// ── Commands ──────────────────────────────────────────────────────

/// Per-target status of a command invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommandStatus::Pending | CommandStatus::InProgress)
    }

    /// Terminal and not `Succeeded`.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            CommandStatus::Failed | CommandStatus::Cancelled | CommandStatus::TimedOut
        )
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandStatus::Pending => "pending",
            CommandStatus::InProgress => "in_progress",
            CommandStatus::Succeeded => "succeeded",
            CommandStatus::Failed => "failed",
            CommandStatus::Cancelled => "cancelled",
            CommandStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

/// Why a command set was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationPurpose {
    Backup,
    Deploy,
    Probe,
    Restore,
}

/// One dispatch of a command set, with the final per-target statuses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub id: InvocationId,
    pub purpose: InvocationPurpose,
    pub statuses: BTreeMap<TargetId, CommandStatus>,
    /// Number of polls it took to reach a verdict.
    pub polls: u32,
    pub dispatched_at: u64,
    pub completed_at: u64,
}

impl InvocationRecord {
    /// Whole-invocation verdict: every target must have succeeded.
    pub fn succeeded(&self) -> bool {
        !self.statuses.is_empty()
            && self
                .statuses
                .values()
                .all(|s| *s == CommandStatus::Succeeded)
    }

    /// Targets whose status is a failure, in key order.
    pub fn failed_targets(&self) -> Vec<TargetId> {
        self.statuses
            .iter()
            .filter(|(_, s)| s.is_failure())
            .map(|(t, _)| t.clone())
            .collect()
    }
}

// ── Runs ──────────────────────────────────────────────────────────

/// Orchestrator stage a run is in (or ended in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Gated,
    Resolving,
    BackingUp,
    Deploying,
    Verifying,
    RollingBack,
    Succeeded,
    RolledBack,
    Failed,
    NoOp,
}

impl RunStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStage::Succeeded | RunStage::RolledBack | RunStage::Failed | RunStage::NoOp
        )
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStage::Gated => "gated",
            RunStage::Resolving => "resolving",
            RunStage::BackingUp => "backing_up",
            RunStage::Deploying => "deploying",
            RunStage::Verifying => "verifying",
            RunStage::RollingBack => "rolling_back",
            RunStage::Succeeded => "succeeded",
            RunStage::RolledBack => "rolled_back",
            RunStage::Failed => "failed",
            RunStage::NoOp => "no_op",
        };
        f.write_str(s)
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Success,
    Failed,
    RolledBack,
    NoOp,
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunVerdict::Success => "success",
            RunVerdict::Failed => "failed",
            RunVerdict::RolledBack => "rolled_back",
            RunVerdict::NoOp => "no_op",
        };
        f.write_str(s)
    }
}

/// Failure category recorded on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ArtifactUnavailable,
    RegistryUnavailable,
    BackupFailed,
    CommandDispatchFailed,
    PartialFleetFailure,
    Timeout,
    HealthCheckFailed,
    RollbackFailed,
    Interrupted,
    StoreUnavailable,
}

/// Where and why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: RunStage,
    pub kind: FailureKind,
    pub targets: Vec<TargetId>,
    pub message: String,
}

/// Result of the health probe on the representative target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    pub target: TargetId,
    pub passed: bool,
    pub attempts: u32,
    pub detail: String,
    pub checked_at: u64,
}

/// A recorded stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: RunStage,
    pub at: u64,
}

/// Aggregate record of one orchestration attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRun {
    pub id: RunId,
    pub group: GroupName,
    pub artifact_version: Option<ArtifactVersion>,
    pub artifact_digest: Option<String>,
    pub stage: RunStage,
    pub verdict: Option<RunVerdict>,
    /// Targets resolved for this run (empty for a no-op).
    pub targets: Vec<TargetId>,
    /// Backups taken during this run, in target order.
    pub backups: Vec<BackupRecord>,
    pub invocations: Vec<InvocationRecord>,
    pub health: Option<HealthResult>,
    /// The failure that ended (or rolled back) the run.
    pub failure: Option<RunFailure>,
    /// Set when rollback itself failed; needs manual intervention.
    pub escalation: Option<RunFailure>,
    pub triggered_by: String,
    pub run_ref: Option<String>,
    pub transitions: Vec<StageTransition>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
}

impl DeploymentRun {
    /// Build the composite key for the runs table.
    pub fn table_key(&self) -> String {
        run_key(&self.group, self.started_at, &self.id)
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Targets that were sent the deploy command set.
    pub fn deployed_targets(&self) -> Vec<TargetId> {
        self.invocations
            .iter()
            .filter(|i| i.purpose == InvocationPurpose::Deploy)
            .flat_map(|i| i.statuses.keys().cloned())
            .collect()
    }
}

pub(crate) fn run_key(group: &str, started_at: u64, id: &str) -> String {
    format!("{group}:{started_at:020}:{id}")
}

// ── Backups ───────────────────────────────────────────────────────

/// What a backup holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    /// A snapshot of the live state.
    Snapshot,
    /// The target had nothing deployed yet; restoring clears it.
    Empty,
}

/// A confirmed pre-deployment snapshot of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub name: String,
    pub target: TargetId,
    pub group: GroupName,
    pub run_id: RunId,
    pub kind: BackupKind,
    pub created_at: u64,
}

impl BackupRecord {
    /// Build the composite key for the backups table.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}:{}", self.target, self.created_at, self.name)
    }
}
