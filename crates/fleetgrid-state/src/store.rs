//! StateStore: redb-backed state persistence for FleetGrid.
//!
//! Provides typed operations over deployment runs, backups, and raw
//! objects. Records are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RUNS).map_err(map_err!(Table))?;
        txn.open_table(BACKUPS).map_err(map_err!(Table))?;
        txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn insert_raw(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &[u8],
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table.insert(key, value).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn insert_json<T: Serialize>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        self.insert_raw(table, key, &bytes)
    }

    /// All records whose key starts with `prefix`, in ascending key order.
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        prefix: &str,
    ) -> StateResult<Vec<(String, T)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                let record: T =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push((key.value().to_string(), record));
            }
        }
        Ok(results)
    }

    fn remove_keys(&self, table: TableDefinition<&str, &[u8]>, keys: &[String]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    // ── Runs ───────────────────────────────────────────────────────

    /// Insert or update a deployment run.
    pub fn put_run(&self, run: &DeploymentRun) -> StateResult<()> {
        let key = run.table_key();
        self.insert_json(RUNS, &key, run)?;
        debug!(%key, stage = %run.stage, "run stored");
        Ok(())
    }

    /// Get a run of a group by its ID.
    pub fn get_run(&self, group: &str, run_id: &str) -> StateResult<Option<DeploymentRun>> {
        let prefix = format!("{group}:");
        let found = self
            .scan_prefix::<DeploymentRun>(RUNS, &prefix)?
            .into_iter()
            .map(|(_, run)| run)
            .find(|run| run.group == group && run.id == run_id);
        Ok(found)
    }

    /// Run history for a group, newest first, at most `limit` entries.
    pub fn list_runs_for_group(&self, group: &str, limit: usize) -> StateResult<Vec<DeploymentRun>> {
        let prefix = format!("{group}:");
        let runs = self
            .scan_prefix::<DeploymentRun>(RUNS, &prefix)?
            .into_iter()
            .rev()
            .map(|(_, run)| run)
            .filter(|run| run.group == group)
            .take(limit)
            .collect();
        Ok(runs)
    }

    /// Runs persisted in a non-terminal stage, across all groups.
    pub fn list_unfinished_runs(&self) -> StateResult<Vec<DeploymentRun>> {
        let runs = self
            .scan_prefix::<DeploymentRun>(RUNS, "")?
            .into_iter()
            .map(|(_, run)| run)
            .filter(|run| !run.is_terminal())
            .collect();
        Ok(runs)
    }

    // ── Backups ────────────────────────────────────────────────────

    /// Record a confirmed backup.
    pub fn put_backup(&self, backup: &BackupRecord) -> StateResult<()> {
        let key = backup.table_key();
        self.insert_json(BACKUPS, &key, backup)?;
        debug!(%key, "backup recorded");
        Ok(())
    }

    /// All backups of a target, newest first.
    pub fn list_backups_for_target(&self, target: &str) -> StateResult<Vec<BackupRecord>> {
        Ok(self
            .backups_with_keys(target)?
            .into_iter()
            .map(|(_, b)| b)
            .collect())
    }

    /// The newest backup of a target, if any.
    pub fn latest_backup(&self, target: &str) -> StateResult<Option<BackupRecord>> {
        Ok(self.backups_with_keys(target)?.into_iter().next().map(|(_, b)| b))
    }

    /// Delete all but the newest `keep` backups of a target. Returns number deleted.
    pub fn prune_backups(&self, target: &str, keep: usize) -> StateResult<u32> {
        let stale: Vec<String> = self
            .backups_with_keys(target)?
            .into_iter()
            .skip(keep)
            .map(|(key, _)| key)
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        let deleted = self.remove_keys(BACKUPS, &stale)?;
        debug!(%target, deleted, keep, "backups pruned");
        Ok(deleted)
    }

    fn backups_with_keys(&self, target: &str) -> StateResult<Vec<(String, BackupRecord)>> {
        let prefix = format!("{target}:");
        Ok(self
            .scan_prefix::<BackupRecord>(BACKUPS, &prefix)?
            .into_iter()
            .rev()
            .filter(|(_, b)| b.target == target)
            .collect())
    }

    // ── Objects ────────────────────────────────────────────────────

    /// Store raw bytes under an object key, replacing any previous value.
    pub fn put_object(&self, key: &str, bytes: &[u8]) -> StateResult<()> {
        self.insert_raw(OBJECTS, key, bytes)?;
        debug!(%key, size = bytes.len(), "object stored");
        Ok(())
    }

    /// Fetch the bytes stored under an object key.
    pub fn get_object(&self, key: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OBJECTS).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(guard.value().to_vec())),
            None => Ok(None),
        }
    }
}
