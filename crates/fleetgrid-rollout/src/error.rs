//! Deployment error taxonomy.

use thiserror::Error;

use fleetgrid_state::{FailureKind, StateError, TargetId};

use crate::gate::GateStatus;

/// Errors that can end (or prevent) a deployment run.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("gate rejected deployment of {group}: build signal was {status}")]
    GateRejected { group: String, status: GateStatus },

    #[error("a deployment of {0} is already active")]
    AlreadyActive(String),

    #[error("unknown target group: {0}")]
    UnknownGroup(String),

    #[error("no eligible targets in {0}")]
    NoEligibleTargets(String),

    #[error("backup failed on {target}: {reason}")]
    BackupFailed { target: TargetId, reason: String },

    #[error("command dispatch failed after {attempts} attempt(s): {reason}")]
    CommandDispatchFailed { attempts: u32, reason: String },

    #[error("command failed on {}", .targets.join(", "))]
    PartialFleetFailure { targets: Vec<TargetId> },

    #[error("timed out waiting for {}", .targets.join(", "))]
    Timeout { targets: Vec<TargetId> },

    #[error("health check failed on {target}: {detail}")]
    HealthCheckFailed { target: TargetId, detail: String },

    #[error("rollback failed on {}", .targets.join(", "))]
    RollbackFailed { targets: Vec<TargetId> },

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("fleet registry error: {0}")]
    Registry(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type DeployResult<T> = Result<T, DeployError>;

impl DeployError {
    /// Category recorded on the run, for errors that happen inside one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            DeployError::BackupFailed { .. } => Some(FailureKind::BackupFailed),
            DeployError::CommandDispatchFailed { .. } => Some(FailureKind::CommandDispatchFailed),
            DeployError::PartialFleetFailure { .. } => Some(FailureKind::PartialFleetFailure),
            DeployError::Timeout { .. } => Some(FailureKind::Timeout),
            DeployError::HealthCheckFailed { .. } => Some(FailureKind::HealthCheckFailed),
            DeployError::RollbackFailed { .. } => Some(FailureKind::RollbackFailed),
            DeployError::Artifact(_) => Some(FailureKind::ArtifactUnavailable),
            DeployError::Registry(_) => Some(FailureKind::RegistryUnavailable),
            DeployError::State(_) => Some(FailureKind::StoreUnavailable),
            DeployError::GateRejected { .. }
            | DeployError::AlreadyActive(_)
            | DeployError::UnknownGroup(_)
            | DeployError::NoEligibleTargets(_) => None,
        }
    }

    /// Targets the error is about.
    pub fn targets(&self) -> Vec<TargetId> {
        match self {
            DeployError::BackupFailed { target, .. }
            | DeployError::HealthCheckFailed { target, .. } => vec![target.clone()],
            DeployError::PartialFleetFailure { targets }
            | DeployError::Timeout { targets }
            | DeployError::RollbackFailed { targets } => targets.clone(),
            _ => Vec::new(),
        }
    }
}
