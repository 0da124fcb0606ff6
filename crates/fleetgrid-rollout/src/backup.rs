//! Backup & rollback controller.
//!
//! A backup is only recorded once the remote backup command set has
//! succeeded on the target, so a recorded backup is a confirmed one. A
//! target with nothing deployed yet reports [`EMPTY_BACKUP_MARKER`] in its
//! output; that is still a confirmed backup, of kind `empty`.

use tracing::{debug, error, info, warn};

use fleetgrid_core::{GroupConfig, epoch_millis};
use fleetgrid_state::{
    BackupKind, BackupRecord, InvocationPurpose, InvocationRecord, RunId, StateStore, TargetId,
};

use crate::error::{DeployError, DeployResult};
use crate::executor::{CommandExecutor, render};

/// Printed by a backup command set when the target holds no prior state.
pub const EMPTY_BACKUP_MARKER: &str = "FLEETGRID_NO_STATE";

/// Result of one backup, with the invocation it took (if one was sent).
#[derive(Debug)]
pub struct BackupAttempt {
    pub invocation: Option<InvocationRecord>,
    pub outcome: DeployResult<BackupRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// The target could not be put back; needs a human.
    Unrecoverable { reason: String },
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, RestoreOutcome::Restored)
    }
}

#[derive(Debug)]
pub struct RestoreAttempt {
    pub invocation: Option<InvocationRecord>,
    pub outcome: RestoreOutcome,
}

pub struct BackupController {
    executor: CommandExecutor,
    store: StateStore,
}

impl BackupController {
    pub fn new(executor: CommandExecutor, store: StateStore) -> Self {
        Self { executor, store }
    }

    fn backup_name(group: &str, created_at: u64, run_id: &str) -> String {
        let short: String = run_id.chars().take(8).collect();
        format!("{group}-{created_at}-{short}")
    }

    /// Snapshot `target` and record the backup once the remote side confirms it.
    pub async fn backup(
        &self,
        group: &str,
        config: &GroupConfig,
        target: &TargetId,
        run_id: &RunId,
    ) -> BackupAttempt {
        let created_at = epoch_millis();
        let name = Self::backup_name(group, created_at, run_id);
        let commands = render(
            &config.backup,
            &[("group", group), ("target", target.as_str()), ("backup", name.as_str())],
        );

        let outcome = match self
            .executor
            .run(
                InvocationPurpose::Backup,
                std::slice::from_ref(target),
                &commands,
                &config.backup_poll,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                return BackupAttempt {
                    invocation: None,
                    outcome: Err(DeployError::BackupFailed {
                        target: target.clone(),
                        reason: e.to_string(),
                    }),
                };
            }
        };

        if !outcome.succeeded() {
            let status = outcome
                .record
                .statuses
                .get(target)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "missing".to_string());
            warn!(%group, %target, %status, "backup not confirmed");
            return BackupAttempt {
                invocation: Some(outcome.record),
                outcome: Err(DeployError::BackupFailed {
                    target: target.clone(),
                    reason: format!("backup command {status}"),
                }),
            };
        }

        let output = self.executor.output(&outcome.record.id, target).await;
        let kind = match output {
            Some(text) if text.contains(EMPTY_BACKUP_MARKER) => BackupKind::Empty,
            _ => BackupKind::Snapshot,
        };
        let record = BackupRecord {
            name,
            target: target.clone(),
            group: group.to_string(),
            run_id: run_id.clone(),
            kind,
            created_at,
        };
        if let Err(e) = self.store.put_backup(&record) {
            return BackupAttempt {
                invocation: Some(outcome.record),
                outcome: Err(DeployError::BackupFailed {
                    target: target.clone(),
                    reason: format!("recording backup: {e}"),
                }),
            };
        }
        info!(%group, %target, backup = %record.name, ?kind, "backup confirmed");
        BackupAttempt {
            invocation: Some(outcome.record),
            outcome: Ok(record),
        }
    }

    /// The backup a rollback of `run_id` restores `target` from.
    pub fn resolve_for_rollback(
        &self,
        target: &str,
        run_id: &str,
    ) -> DeployResult<Option<BackupRecord>> {
        Ok(self
            .store
            .list_backups_for_target(target)?
            .into_iter()
            .find(|b| b.run_id == run_id))
    }

    /// Run the restore command set for `backup` on its target.
    pub async fn restore(&self, config: &GroupConfig, backup: &BackupRecord) -> RestoreAttempt {
        let commands = render(
            &config.restore,
            &[
                ("group", backup.group.as_str()),
                ("target", backup.target.as_str()),
                ("backup", backup.name.as_str()),
            ],
        );
        let targets = [backup.target.clone()];
        match self
            .executor
            .run(InvocationPurpose::Restore, &targets, &commands, &config.restore_poll)
            .await
        {
            Ok(outcome) if outcome.succeeded() => {
                info!(target = %backup.target, backup = %backup.name, "target restored");
                RestoreAttempt {
                    invocation: Some(outcome.record),
                    outcome: RestoreOutcome::Restored,
                }
            }
            Ok(outcome) => {
                let reason = outcome
                    .failure()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "restore did not succeed".to_string());
                error!(target = %backup.target, backup = %backup.name, %reason, "restore failed");
                RestoreAttempt {
                    invocation: Some(outcome.record),
                    outcome: RestoreOutcome::Unrecoverable { reason },
                }
            }
            Err(e) => {
                error!(target = %backup.target, error = %e, "restore not dispatched");
                RestoreAttempt {
                    invocation: None,
                    outcome: RestoreOutcome::Unrecoverable {
                        reason: e.to_string(),
                    },
                }
            }
        }
    }

    /// Restore `target` from the backup taken for `run_id`.
    pub async fn restore_for_run(
        &self,
        config: &GroupConfig,
        target: &str,
        run_id: &str,
    ) -> RestoreAttempt {
        match self.resolve_for_rollback(target, run_id) {
            Ok(Some(backup)) => self.restore(config, &backup).await,
            Ok(None) => {
                error!(%target, %run_id, "no backup to restore from");
                RestoreAttempt {
                    invocation: None,
                    outcome: RestoreOutcome::Unrecoverable {
                        reason: format!("no backup of {target} for this run"),
                    },
                }
            }
            Err(e) => RestoreAttempt {
                invocation: None,
                outcome: RestoreOutcome::Unrecoverable {
                    reason: e.to_string(),
                },
            },
        }
    }

    /// Newest backup of `target`.
    pub fn latest(&self, target: &str) -> DeployResult<Option<BackupRecord>> {
        Ok(self.store.latest_backup(target)?)
    }

    /// Keep the newest `keep` backups of `target`.
    pub fn prune(&self, target: &str, keep: usize) -> DeployResult<u32> {
        let deleted = self.store.prune_backups(target, keep)?;
        if deleted > 0 {
            debug!(%target, deleted, keep, "old backups pruned");
        }
        Ok(deleted)
    }
}
