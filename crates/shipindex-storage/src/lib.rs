//! shipindex-storage: durable stores for the ingestion pipeline.
//!
//! Backends:
//! - [`memory`]: in-memory (tests, dry runs)
//! - [`sqlite`]: SQLite via `sqlx` (single-file persistence)
//!
//! Both implement [`shipindex_core::ChainStore`]; every block is written
//! through one [`shipindex_core::StoreTransaction`].

use shipindex_core::FlattenedAction;

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// An action row with its assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAction {
    pub id: i64,
    pub action: FlattenedAction,
}
