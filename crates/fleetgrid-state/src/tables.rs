//! redb table definitions for the FleetGrid state store.
//!
//! Every table uses `&str` keys and `&[u8]` values.

use redb::TableDefinition;

/// Deployment runs keyed by `{group}:{started_at:020}:{run_id}`.
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Backup records keyed by `{target}:{created_at:020}:{name}`.
pub const BACKUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("backups");

/// Raw object bytes keyed by object-store key (`{group}/{version}/artifact`).
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
