//! Shared types used across FleetGrid crates.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of a target group (e.g. `frontend`, `backend`).
pub type GroupName = String;

/// Opaque identity of a single addressable compute unit.
pub type TargetId = String;

/// Liveness of a target as reported by the fleet registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Healthy,
    NotReady,
}

/// A member of a target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub state: TargetState,
    /// Network address (`host` or `host:port`) used by HTTP probes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Target {
    pub fn healthy(id: &str) -> Self {
        Self {
            id: id.to_string(),
            state: TargetState::Healthy,
            address: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.state == TargetState::Healthy
    }
}

/// Artifact version: a millisecond timestamp, strictly increasing per publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactVersion(pub u64);

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtifactVersion {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(ArtifactVersion)
    }
}

/// Hex-encoded SHA-256 of an artifact payload.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
