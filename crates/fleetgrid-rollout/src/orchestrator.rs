//! Deployment orchestrator: drives one run through the stage machine.
//!
//! ```text
//! Gated → Resolving → BackingUp → Deploying → Verifying → Succeeded
//!            │            │            │           │
//!            ▼            ▼            └─────┬─────┘
//!          NoOp         Failed          RollingBack → RolledBack | Failed
//! ```
//!
//! Failures before `Deploying` end the run with nothing on the fleet
//! touched. Failures from `Deploying` on all go through the same rollback
//! path. Every run that got a record ends with exactly one notification.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fleetgrid_core::{
    ArtifactVersion, ConflictPolicy, FleetConfig, GroupConfig, Target, TargetId, epoch_millis,
};
use fleetgrid_health::{HealthVerifier, Probe};
use fleetgrid_state::{
    DeploymentRun, FailureKind, InvocationPurpose, RunFailure, RunStage, RunVerdict,
    StageTransition, StateStore,
};

use crate::backup::{BackupController, RestoreOutcome};
use crate::error::{DeployError, DeployResult};
use crate::executor::{CommandExecutor, DispatchPolicy, RemoteCommandApi, render};
use crate::flight::{FlightGuard, SingleFlight};
use crate::gate::GateSignal;
use crate::notify::{Notifier, RunNotification};
use crate::probe::FleetProber;
use crate::publisher::{ArtifactPublisher, ObjectStore};
use crate::resolver::{FleetRegistry, FleetResolver};

/// What to ship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Fresh build output; staged as a new version by the run.
    Bytes(Vec<u8>),
    /// A version staged earlier.
    Staged(ArtifactVersion),
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub group: String,
    pub artifact: ArtifactSource,
    pub gate: GateSignal,
}

pub struct Orchestrator {
    config: FleetConfig,
    store: StateStore,
    publisher: ArtifactPublisher,
    resolver: FleetResolver,
    backups: BackupController,
    executor: CommandExecutor,
    verifier: HealthVerifier,
    flights: SingleFlight,
    notifier: Arc<dyn Notifier>,
    tasks: TaskTracker,
}

impl Orchestrator {
    pub fn new(
        config: FleetConfig,
        store: StateStore,
        objects: Arc<dyn ObjectStore>,
        registry: Arc<dyn FleetRegistry>,
        commands: Arc<dyn RemoteCommandApi>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let dispatch = match &config.commands {
            Some(c) => DispatchPolicy {
                attempts: c.dispatch_attempts,
                backoff: c.dispatch_backoff(),
            },
            None => DispatchPolicy::default(),
        };
        let executor = CommandExecutor::new(commands, dispatch);
        let verifier = HealthVerifier::new(Arc::new(FleetProber::new(executor.clone())));
        Self {
            flights: SingleFlight::new(config.orchestrator.on_conflict),
            publisher: ArtifactPublisher::new(objects),
            resolver: FleetResolver::new(registry),
            backups: BackupController::new(executor.clone(), store.clone()),
            executor,
            verifier,
            store,
            notifier,
            config,
            tasks: TaskTracker::new(),
        }
    }

    /// Replace the health prober.
    pub fn with_prober(mut self, prober: Arc<dyn Probe>) -> Self {
        self.verifier = HealthVerifier::new(prober);
        self
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn publisher(&self) -> &ArtifactPublisher {
        &self.publisher
    }

    pub fn backups(&self) -> &BackupController {
        &self.backups
    }

    pub async fn is_active(&self, group: &str) -> bool {
        self.flights.is_active(group).await
    }

    /// Run history of a group, newest first.
    pub fn history(&self, group: &str, limit: usize) -> DeployResult<Vec<DeploymentRun>> {
        Ok(self.store.list_runs_for_group(group, limit)?)
    }

    /// Checks that need no run record: known group and an admitting gate.
    fn admit(&self, request: &DeployRequest) -> DeployResult<()> {
        if self.config.group(&request.group).is_none() {
            return Err(DeployError::UnknownGroup(request.group.clone()));
        }
        if !request.gate.admits(&self.config.orchestrator.gate) {
            info!(
                group = %request.group,
                status = %request.gate.status,
                triggered_by = %request.gate.triggered_by,
                "gate rejected deployment"
            );
            return Err(DeployError::GateRejected {
                group: request.group.clone(),
                status: request.gate.status,
            });
        }
        Ok(())
    }

    /// Run a deployment to completion.
    ///
    /// Returns the finished run whatever its verdict; errors are reserved
    /// for triggers that never became a run.
    pub async fn deploy(&self, request: DeployRequest) -> DeployResult<DeploymentRun> {
        self.admit(&request)?;
        let guard = self.flights.acquire(&request.group).await?;
        self.execute(request, guard).await
    }

    /// Admit a deployment and run it on a detached task.
    ///
    /// Under the reject policy the group is claimed before this returns, so
    /// a conflict is reported to the caller rather than to the task.
    pub async fn spawn(
        self: &Arc<Self>,
        request: DeployRequest,
    ) -> DeployResult<JoinHandle<DeployResult<DeploymentRun>>> {
        self.admit(&request)?;
        let claimed = match self.flights.policy() {
            ConflictPolicy::Reject => Some(self.flights.acquire(&request.group).await?),
            ConflictPolicy::Queue => None,
        };
        let this = Arc::clone(self);
        Ok(self.tasks.spawn(async move {
            let guard = match claimed {
                Some(guard) => guard,
                None => this.flights.acquire(&request.group).await?,
            };
            this.execute(request, guard).await
        }))
    }

    /// Wait for every run started by [`Orchestrator::spawn`] to end.
    pub async fn drain(&self) {
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(runs = self.tasks.len(), "waiting for in-flight runs");
        }
        self.tasks.wait().await;
    }

    /// Finalize runs left non-terminal by a previous process.
    ///
    /// A run that stopped after deploy dispatch may have left the fleet on
    /// mixed versions, so it goes through rollback from its recorded
    /// backups. Earlier runs touched nothing and are only marked failed.
    pub async fn recover_interrupted(&self) -> DeployResult<Vec<DeploymentRun>> {
        let mut recovered = Vec::new();
        for mut run in self.store.list_unfinished_runs()? {
            let targets = match run.deployed_targets() {
                deployed if deployed.is_empty() => run.targets.clone(),
                deployed => deployed,
            };
            let reached = run.stage;
            warn!(run_id = %run.id, group = %run.group, stage = %reached, "run was interrupted");
            run.failure = Some(RunFailure {
                stage: reached,
                kind: FailureKind::Interrupted,
                targets,
                message: format!("orchestrator stopped during {reached}"),
            });

            let mutated = matches!(
                reached,
                RunStage::Deploying | RunStage::Verifying | RunStage::RollingBack
            );
            if mutated && !run.backups.is_empty() {
                match self.config.group(&run.group).cloned() {
                    Some(config) => {
                        recovered.push(self.restore_backups(run, &config).await);
                        continue;
                    }
                    None => {
                        let targets: Vec<TargetId> =
                            run.backups.iter().map(|b| b.target.clone()).collect();
                        error!(
                            run_id = %run.id,
                            group = %run.group,
                            "interrupted run belongs to a group no longer configured"
                        );
                        run.escalation = Some(RunFailure {
                            stage: reached,
                            kind: FailureKind::RollbackFailed,
                            targets,
                            message: format!("group {} has no restore commands configured", run.group),
                        });
                    }
                }
            }
            self.finish(&mut run, RunStage::Failed, RunVerdict::Failed).await;
            recovered.push(run);
        }
        Ok(recovered)
    }

    async fn execute(
        &self,
        request: DeployRequest,
        _guard: FlightGuard,
    ) -> DeployResult<DeploymentRun> {
        let group = request.group.clone();
        let config = self
            .config
            .group(&group)
            .cloned()
            .ok_or_else(|| DeployError::UnknownGroup(group.clone()))?;

        let started_at = epoch_millis();
        let mut run = DeploymentRun {
            id: Uuid::new_v4().to_string(),
            group: group.clone(),
            artifact_version: None,
            artifact_digest: None,
            stage: RunStage::Gated,
            verdict: None,
            targets: Vec::new(),
            backups: Vec::new(),
            invocations: Vec::new(),
            health: None,
            failure: None,
            escalation: None,
            triggered_by: request.gate.triggered_by.clone(),
            run_ref: request.gate.run_ref.clone(),
            transitions: vec![StageTransition {
                stage: RunStage::Gated,
                at: started_at,
            }],
            started_at,
            finished_at: None,
        };
        // Nothing has been touched yet; without a record there is no run.
        self.store.put_run(&run)?;
        info!(run_id = %run.id, %group, triggered_by = %run.triggered_by, "deployment started");

        // ── Gated: pin the artifact ───────────────────────────────
        let artifact = match &request.artifact {
            ArtifactSource::Bytes(bytes) => self.publisher.stage(&group, bytes).await,
            ArtifactSource::Staged(version) => self.publisher.describe(&group, *version).await,
        };
        let artifact = match artifact {
            Ok(artifact) => artifact,
            Err(e) => return Ok(self.abort(run, e).await),
        };
        run.artifact_version = Some(artifact.version);
        run.artifact_digest = Some(artifact.digest.clone());

        // ── Resolving ─────────────────────────────────────────────
        self.enter(&mut run, RunStage::Resolving);
        let targets = match self.resolver.resolve(&group).await {
            Ok(targets) => targets,
            Err(e) => return Ok(self.abort(run, e).await),
        };
        if targets.is_empty() {
            info!(run_id = %run.id, %group, "no eligible targets");
            self.finish(&mut run, RunStage::NoOp, RunVerdict::NoOp).await;
            return Ok(run);
        }
        let ids: Vec<TargetId> = targets.iter().map(|t| t.id.clone()).collect();
        run.targets = ids.clone();

        // ── BackingUp ─────────────────────────────────────────────
        self.enter(&mut run, RunStage::BackingUp);
        for target in &ids {
            let attempt = self.backups.backup(&group, &config, target, &run.id).await;
            run.invocations.extend(attempt.invocation);
            match attempt.outcome {
                Ok(record) => run.backups.push(record),
                Err(e) => return Ok(self.abort(run, e).await),
            }
        }
        self.persist(&run);

        // ── Deploying ─────────────────────────────────────────────
        self.enter(&mut run, RunStage::Deploying);
        let version = artifact.version.to_string();
        let artifact_key = artifact.key();
        let commands = render(
            &config.deploy,
            &[
                ("group", group.as_str()),
                ("version", version.as_str()),
                ("artifact_key", artifact_key.as_str()),
            ],
        );
        match self
            .executor
            .run(InvocationPurpose::Deploy, &ids, &commands, &config.deploy_poll)
            .await
        {
            Ok(outcome) => {
                let failure = outcome.failure();
                run.invocations.push(outcome.record);
                if let Some(e) = failure {
                    return Ok(self.roll_back(run, &config, e).await);
                }
            }
            Err(e) => return Ok(self.roll_back(run, &config, e).await),
        }

        // ── Verifying ─────────────────────────────────────────────
        self.enter(&mut run, RunStage::Verifying);
        if let Err(e) = self.verify(&mut run, &config, &targets).await {
            return Ok(self.roll_back(run, &config, e).await);
        }
        if let Err(e) = self.publisher.promote(&group, artifact.version).await {
            return Ok(self.roll_back(run, &config, e).await);
        }

        // ── Succeeded ─────────────────────────────────────────────
        self.finish(&mut run, RunStage::Succeeded, RunVerdict::Success).await;
        self.prune(&run);
        Ok(run)
    }

    async fn verify(
        &self,
        run: &mut DeploymentRun,
        config: &GroupConfig,
        targets: &[Target],
    ) -> DeployResult<()> {
        let Some(representative) = HealthVerifier::representative(targets) else {
            return Err(DeployError::NoEligibleTargets(run.group.clone()));
        };
        let result = self
            .verifier
            .verify(representative, &config.probe, config.settle_delay())
            .await;
        let passed = result.passed;
        let detail = result.detail.clone();
        run.health = Some(result);
        if passed {
            Ok(())
        } else {
            Err(DeployError::HealthCheckFailed {
                target: representative.id.clone(),
                detail,
            })
        }
    }

    async fn roll_back(
        &self,
        mut run: DeploymentRun,
        config: &GroupConfig,
        cause: DeployError,
    ) -> DeploymentRun {
        warn!(run_id = %run.id, group = %run.group, stage = %run.stage, error = %cause, "rolling back");
        run.failure = Some(failure_at(run.stage, &cause));
        self.restore_backups(run, config).await
    }

    /// The shared rollback path: restore every target backed up by the run,
    /// one at a time. The run's failure is already recorded.
    async fn restore_backups(&self, mut run: DeploymentRun, config: &GroupConfig) -> DeploymentRun {
        self.enter(&mut run, RunStage::RollingBack);

        let mut unrecoverable = Vec::new();
        let mut reasons = Vec::new();
        let to_restore: Vec<TargetId> = run.backups.iter().map(|b| b.target.clone()).collect();
        for target in &to_restore {
            let attempt = self.backups.restore_for_run(config, target, &run.id).await;
            run.invocations.extend(attempt.invocation);
            if let RestoreOutcome::Unrecoverable { reason } = attempt.outcome {
                reasons.push(format!("{target}: {reason}"));
                unrecoverable.push(target.clone());
            }
        }

        if unrecoverable.is_empty() {
            info!(run_id = %run.id, restored = to_restore.len(), "rollback complete");
            self.finish(&mut run, RunStage::RolledBack, RunVerdict::RolledBack)
                .await;
        } else {
            let escalation = DeployError::RollbackFailed {
                targets: unrecoverable.clone(),
            };
            error!(
                run_id = %run.id,
                group = %run.group,
                targets = ?unrecoverable,
                "rollback failed, manual intervention required"
            );
            run.escalation = Some(RunFailure {
                stage: RunStage::RollingBack,
                kind: FailureKind::RollbackFailed,
                targets: unrecoverable,
                message: format!("{escalation}: {}", reasons.join("; ")),
            });
            self.finish(&mut run, RunStage::Failed, RunVerdict::Failed).await;
        }
        run
    }

    /// End a run that failed before anything on the fleet changed.
    async fn abort(&self, mut run: DeploymentRun, cause: DeployError) -> DeploymentRun {
        warn!(run_id = %run.id, group = %run.group, stage = %run.stage, error = %cause, "deployment aborted");
        run.failure = Some(failure_at(run.stage, &cause));
        self.finish(&mut run, RunStage::Failed, RunVerdict::Failed).await;
        run
    }

    fn enter(&self, run: &mut DeploymentRun, stage: RunStage) {
        run.stage = stage;
        run.transitions.push(StageTransition {
            stage,
            at: epoch_millis(),
        });
        info!(run_id = %run.id, group = %run.group, %stage, "stage entered");
        self.persist(run);
    }

    /// Terminal transition: record it, persist it, notify once.
    async fn finish(&self, run: &mut DeploymentRun, stage: RunStage, verdict: RunVerdict) {
        run.verdict = Some(verdict);
        run.finished_at = Some(epoch_millis());
        self.enter(run, stage);
        if let Err(e) = self.notifier.notify(&RunNotification::from(&*run)).await {
            warn!(run_id = %run.id, error = %format!("{e:#}"), "run notification not delivered");
        }
    }

    /// Later writes are best-effort: the run keeps going on the fleet
    /// regardless, and the final write retries the full record.
    fn persist(&self, run: &DeploymentRun) {
        if let Err(e) = self.store.put_run(run) {
            warn!(run_id = %run.id, stage = %run.stage, error = %e, "failed to persist run");
        }
    }

    fn prune(&self, run: &DeploymentRun) {
        let keep = self.config.orchestrator.backup_retention;
        for target in &run.targets {
            match self.backups.prune(target, keep) {
                Ok(0) => {}
                Ok(deleted) => debug!(%target, deleted, "pruned after successful run"),
                Err(e) => warn!(%target, error = %e, "backup pruning failed"),
            }
        }
    }
}

fn failure_at(stage: RunStage, cause: &DeployError) -> RunFailure {
    RunFailure {
        stage,
        kind: cause.kind().unwrap_or(FailureKind::StoreUnavailable),
        targets: cause.targets(),
        message: cause.to_string(),
    }
}
