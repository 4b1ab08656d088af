//! Persistence backends for threadloom.
//!
//! Two implementations of [`threadloom_core::store::ThreadStore`]:
//! - [`MemoryStore`] — a single-lock in-process store for tests and
//!   ephemeral embedding
//! - [`SqliteStore`] — sqlx-backed, WAL-mode SQLite with snapshot reads
//!   and an atomic metadata-flag compare-and-set
//!
//! Both enforce the same boundary invariants: per-thread sequence
//! assignment, status-machine transitions, parent-existence at thread
//! creation, and chunked cascade-ordered purge.

mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
