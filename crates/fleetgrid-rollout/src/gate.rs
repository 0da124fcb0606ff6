//! Build-signal gate: decides whether a trigger may start a run.

use std::fmt;

use serde::{Deserialize, Serialize};

use fleetgrid_core::GatePolicy;

/// Outcome reported by the upstream build/test pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Success,
    Failure,
    Cancelled,
    /// Triggered by hand, with no build signal behind it.
    Manual,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateStatus::Success => "success",
            GateStatus::Failure => "failure",
            GateStatus::Cancelled => "cancelled",
            GateStatus::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// The trigger that asks for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSignal {
    pub status: GateStatus,
    /// Identifier of the upstream build run, if any.
    #[serde(default)]
    pub run_ref: Option<String>,
    pub triggered_by: String,
}

impl GateSignal {
    pub fn success(run_ref: &str, triggered_by: &str) -> Self {
        Self {
            status: GateStatus::Success,
            run_ref: Some(run_ref.to_string()),
            triggered_by: triggered_by.to_string(),
        }
    }

    pub fn manual(triggered_by: &str) -> Self {
        Self {
            status: GateStatus::Manual,
            run_ref: None,
            triggered_by: triggered_by.to_string(),
        }
    }

    /// Whether `policy` lets this signal start a run.
    pub fn admits(&self, policy: &GatePolicy) -> bool {
        match self.status {
            GateStatus::Success => true,
            GateStatus::Manual => policy.allow_manual,
            GateStatus::Failure | GateStatus::Cancelled => policy.allow_unsuccessful,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(status: GateStatus) -> GateSignal {
        GateSignal {
            status,
            run_ref: None,
            triggered_by: "ci".to_string(),
        }
    }

    #[test]
    fn default_policy() {
        let policy = GatePolicy::default();
        assert!(signal(GateStatus::Success).admits(&policy));
        assert!(signal(GateStatus::Manual).admits(&policy));
        assert!(!signal(GateStatus::Failure).admits(&policy));
        assert!(!signal(GateStatus::Cancelled).admits(&policy));
    }

    #[test]
    fn strict_policy_rejects_manual() {
        let policy = GatePolicy {
            allow_manual: false,
            allow_unsuccessful: false,
        };
        assert!(!signal(GateStatus::Manual).admits(&policy));
        assert!(signal(GateStatus::Success).admits(&policy));
    }

    #[test]
    fn permissive_policy_admits_failures() {
        let policy = GatePolicy {
            allow_manual: true,
            allow_unsuccessful: true,
        };
        assert!(signal(GateStatus::Failure).admits(&policy));
    }

    #[test]
    fn deserializes_without_run_ref() {
        let json = r#"{"status":"manual","triggered_by":"alice"}"#;
        let signal: GateSignal = serde_json::from_str(json).unwrap();
        assert_eq!(signal, GateSignal::manual("alice"));
    }
}
