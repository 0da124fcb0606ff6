//! Terminal-run notifications.
//!
//! Every run that reaches a terminal stage produces exactly one
//! [`RunNotification`]. Delivery failures are logged and never change the
//! run's verdict.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use fleetgrid_state::{ArtifactVersion, DeploymentRun, RunFailure, RunId, RunVerdict};

/// Structured record sent to the notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunNotification {
    pub run_id: RunId,
    pub group: String,
    pub artifact_version: Option<ArtifactVersion>,
    pub verdict: Option<RunVerdict>,
    pub target_count: usize,
    pub triggered_by: String,
    pub run_ref: Option<String>,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub failure: Option<RunFailure>,
    /// Present when a rollback could not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<RunFailure>,
}

impl From<&DeploymentRun> for RunNotification {
    fn from(run: &DeploymentRun) -> Self {
        Self {
            run_id: run.id.clone(),
            group: run.group.clone(),
            artifact_version: run.artifact_version,
            verdict: run.verdict,
            target_count: run.targets.len(),
            triggered_by: run.triggered_by.clone(),
            run_ref: run.run_ref.clone(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            failure: run.failure.clone(),
            escalation: run.escalation.clone(),
        }
    }
}

/// A notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &RunNotification) -> anyhow::Result<()>;
}

/// Writes every notification to the log. Always configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, n: &RunNotification) -> anyhow::Result<()> {
        let verdict = n.verdict.map(|v| v.to_string()).unwrap_or_default();
        match (&n.escalation, &n.failure) {
            (Some(escalation), _) => error!(
                run_id = %n.run_id,
                group = %n.group,
                %verdict,
                targets = ?escalation.targets,
                message = %escalation.message,
                "deployment needs manual intervention"
            ),
            (None, Some(failure)) => warn!(
                run_id = %n.run_id,
                group = %n.group,
                %verdict,
                stage = %failure.stage,
                kind = ?failure.kind,
                targets = ?failure.targets,
                message = %failure.message,
                "deployment finished"
            ),
            (None, None) => info!(
                run_id = %n.run_id,
                group = %n.group,
                %verdict,
                target_count = n.target_count,
                "deployment finished"
            ),
        }
        Ok(())
    }
}

/// Delivers to several channels; one failing channel does not stop the rest.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, notification: &RunNotification) -> anyhow::Result<()> {
        let mut failed = 0;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(notification).await {
                failed += 1;
                warn!(run_id = %notification.run_id, error = %format!("{e:#}"), "notification delivery failed");
            }
        }
        if failed > 0 {
            anyhow::bail!("{failed} of {} notification sink(s) failed", self.sinks.len());
        }
        Ok(())
    }
}
