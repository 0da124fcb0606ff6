//! fleetgrid-state: embedded state store for FleetGrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds the audit trail of
//! deployment runs, the per-target backup index, and the built-in object
//! store the artifact publisher writes to.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns; objects
//! are stored as raw bytes. Composite keys embed zero-padded millisecond
//! timestamps (`{group}:{started_at}:{run_id}`, `{target}:{created_at}:{name}`)
//! so key order is time order and newest-first reads are a reversed scan.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
