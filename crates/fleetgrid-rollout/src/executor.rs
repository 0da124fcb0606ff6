//! Remote command executor: dispatch a command set, poll to a verdict.
//!
//! The remote service fans a command set out to its targets in parallel;
//! here that is observed as one invocation that is polled at a fixed
//! interval until every target is terminal or the attempt budget runs out.
//! The wait is a `tokio::time::sleep`, so tests drive it with a paused clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use fleetgrid_core::{PollConfig, epoch_millis};
use fleetgrid_state::{CommandStatus, InvocationId, InvocationPurpose, InvocationRecord, TargetId};

use crate::error::{DeployError, DeployResult};

/// The remote "run this on these targets" service.
#[async_trait]
pub trait RemoteCommandApi: Send + Sync {
    /// Start `commands` on `targets`; returns without waiting for them.
    async fn send(
        &self,
        targets: &[TargetId],
        commands: &[String],
        timeout: Duration,
    ) -> anyhow::Result<InvocationId>;

    /// Current per-target status. Targets may be missing early on.
    async fn get_status(&self, invocation: &str) -> anyhow::Result<HashMap<TargetId, CommandStatus>>;

    /// Captured output of one target, when the service keeps it.
    async fn get_output(&self, _invocation: &str, _target: &str) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Bounded retry of transport-level dispatch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Substitute `{name}` placeholders in every command.
pub fn render(commands: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    commands
        .iter()
        .map(|command| {
            vars.iter().fold(command.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{name}}}"), value)
            })
        })
        .collect()
}

/// Final state of one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    pub record: InvocationRecord,
}

impl InvocationOutcome {
    /// Every target succeeded. Partial success never counts.
    pub fn succeeded(&self) -> bool {
        self.record.succeeded()
    }

    /// The aggregate failure, if any target did not succeed.
    ///
    /// Any `failed` or `cancelled` target makes it a fleet failure (naming
    /// every unsuccessful target); only-`timed_out` makes it a timeout.
    pub fn failure(&self) -> Option<DeployError> {
        if self.succeeded() {
            return None;
        }
        let failed = self.record.failed_targets();
        let hard_failure = self
            .record
            .statuses
            .values()
            .any(|s| matches!(s, CommandStatus::Failed | CommandStatus::Cancelled));
        if hard_failure {
            Some(DeployError::PartialFleetFailure { targets: failed })
        } else {
            Some(DeployError::Timeout { targets: failed })
        }
    }
}

/// Dispatches command sets and waits for them.
#[derive(Clone)]
pub struct CommandExecutor {
    api: Arc<dyn RemoteCommandApi>,
    dispatch: DispatchPolicy,
}

impl CommandExecutor {
    pub fn new(api: Arc<dyn RemoteCommandApi>, dispatch: DispatchPolicy) -> Self {
        Self { api, dispatch }
    }

    /// Send a command set, retrying transport errors a bounded number of times.
    pub async fn dispatch(
        &self,
        targets: &[TargetId],
        commands: &[String],
        timeout: Duration,
    ) -> DeployResult<InvocationId> {
        let attempts = self.dispatch.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.api.send(targets, commands, timeout).await {
                Ok(id) => {
                    debug!(invocation = %id, targets = targets.len(), attempt, "command set dispatched");
                    return Ok(id);
                }
                Err(e) => {
                    last_error = format!("{e:#}");
                    warn!(attempt, attempts, error = %last_error, "command dispatch failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.dispatch.backoff).await;
                    }
                }
            }
        }
        Err(DeployError::CommandDispatchFailed {
            attempts,
            reason: last_error,
        })
    }

    /// One status read.
    pub async fn poll(&self, invocation: &str) -> anyhow::Result<HashMap<TargetId, CommandStatus>> {
        self.api.get_status(invocation).await
    }

    /// Poll until every target is terminal or `poll.max_attempts` polls are spent.
    ///
    /// Targets still pending or in progress after the budget are marked
    /// `timed_out`. A terminal status is never overwritten by a later poll.
    pub async fn await_completion(
        &self,
        purpose: InvocationPurpose,
        invocation: &str,
        targets: &[TargetId],
        poll: &PollConfig,
        dispatched_at: u64,
    ) -> InvocationOutcome {
        let mut statuses: BTreeMap<TargetId, CommandStatus> = targets
            .iter()
            .map(|t| (t.clone(), CommandStatus::Pending))
            .collect();
        let max_attempts = poll.max_attempts.max(1);
        let mut polls = 0;

        for attempt in 1..=max_attempts {
            polls = attempt;
            match self.poll(invocation).await {
                Ok(reported) => {
                    for (target, status) in statuses.iter_mut() {
                        if status.is_terminal() {
                            continue;
                        }
                        if let Some(new) = reported.get(target) {
                            *status = *new;
                        }
                    }
                }
                Err(e) => {
                    warn!(%invocation, attempt, error = %format!("{e:#}"), "status poll failed");
                }
            }

            let pending = statuses.values().filter(|s| !s.is_terminal()).count();
            debug!(%invocation, attempt, pending, "polled invocation");
            if pending == 0 {
                break;
            }
            if attempt < max_attempts {
                tokio::time::sleep(poll.interval()).await;
            }
        }

        for (target, status) in statuses.iter_mut() {
            if !status.is_terminal() {
                warn!(%invocation, %target, "no terminal status within budget");
                *status = CommandStatus::TimedOut;
            }
        }

        let record = InvocationRecord {
            id: invocation.to_string(),
            purpose,
            statuses,
            polls,
            dispatched_at,
            completed_at: epoch_millis(),
        };
        if record.succeeded() {
            info!(%invocation, ?purpose, polls, "invocation succeeded");
        } else {
            warn!(%invocation, ?purpose, failed = ?record.failed_targets(), "invocation failed");
        }
        InvocationOutcome { record }
    }

    /// Dispatch and wait. Errors only when the dispatch itself never got through.
    pub async fn run(
        &self,
        purpose: InvocationPurpose,
        targets: &[TargetId],
        commands: &[String],
        poll: &PollConfig,
    ) -> DeployResult<InvocationOutcome> {
        let dispatched_at = epoch_millis();
        let id = self.dispatch(targets, commands, poll.budget()).await?;
        Ok(self
            .await_completion(purpose, &id, targets, poll, dispatched_at)
            .await)
    }

    /// Output of one target, if the remote service offers it.
    pub async fn output(&self, invocation: &str, target: &str) -> Option<String> {
        match self.api.get_output(invocation, target).await {
            Ok(output) => output,
            Err(e) => {
                debug!(%invocation, %target, error = %format!("{e:#}"), "output unavailable");
                None
            }
        }
    }
}
