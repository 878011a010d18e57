//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named partitions holding immutable response snapshots, durable in SQLite
//! - A static partition primed all-or-nothing at install time
//! - A dynamic partition filled opportunistically at runtime
//! - Activation-time garbage collection of every other version's partitions

mod manager;
mod storage;
mod traits;

pub use manager::{
  CacheError, CacheStoreManager, InstallOutcome, LifecycleMessage, LifecycleReply, Partitions,
};
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheEntry, CacheKey, CacheSource, Fetched};
