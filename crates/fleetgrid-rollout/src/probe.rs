//! Probes that need the remote command executor.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use fleetgrid_core::{ProbeSpec, Target};
use fleetgrid_health::{HttpProber, Probe, ProbeResult};
use fleetgrid_state::{CommandStatus, InvocationPurpose};

use crate::executor::{CommandExecutor, render};

/// Runs `ProbeSpec::Command` probes as a one-target invocation.
#[derive(Clone)]
pub struct CommandProbe {
    executor: CommandExecutor,
}

impl CommandProbe {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn probe(&self, target: &Target, spec: &ProbeSpec) -> ProbeResult {
        let ProbeSpec::Command { commands, poll, .. } = spec else {
            warn!(target = %target.id, "command prober handed a non-command probe");
            return ProbeResult::Failed;
        };
        let commands = render(commands, &[("target", target.id.as_str())]);
        let targets = [target.id.clone()];
        match self
            .executor
            .run(InvocationPurpose::Probe, &targets, &commands, poll)
            .await
        {
            Ok(outcome) => match outcome.record.statuses.get(&target.id) {
                Some(CommandStatus::Succeeded) => ProbeResult::Healthy,
                Some(CommandStatus::Failed) => ProbeResult::Unhealthy,
                status => {
                    debug!(target = %target.id, ?status, "probe command did not complete");
                    ProbeResult::Failed
                }
            },
            Err(e) => {
                debug!(target = %target.id, error = %e, "probe command not dispatched");
                ProbeResult::Failed
            }
        }
    }
}

/// Routes each probe kind to the prober that can run it.
pub struct FleetProber {
    http: Arc<dyn Probe>,
    command: Arc<dyn Probe>,
}

impl FleetProber {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            http: Arc::new(HttpProber),
            command: Arc::new(CommandProbe::new(executor)),
        }
    }
}

#[async_trait]
impl Probe for FleetProber {
    async fn probe(&self, target: &Target, spec: &ProbeSpec) -> ProbeResult {
        match spec {
            ProbeSpec::Http { .. } => self.http.probe(target, spec).await,
            ProbeSpec::Command { .. } => self.command.probe(target, spec).await,
        }
    }
}
