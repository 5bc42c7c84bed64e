//! Event Store (C1) and Task Queue (C3), both Postgres-backed.
//!
//! The claim and record-attempt primitives use the same `UPDATE ...
//! RETURNING` conditional-write idiom, fed by a `FOR UPDATE SKIP LOCKED`
//! subquery for the claim — the canonical way to get an atomic
//! compare-and-set plus safe concurrent polling out of Postgres without a
//! separate locking service.

pub mod error;
pub mod event_store;
pub mod task_queue;

pub use error::StoreError;
pub use event_store::{EventStore, NewEvent, PostgresEventStore};
pub use task_queue::{PostgresTaskQueue, TaskQueue};

/// Embeds the SQL migration set for `events` and `queue_items`. Resolved at
/// compile time relative to this crate, independent of the process's
/// working directory.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
