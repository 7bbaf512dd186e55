//! Persistent Cache - a file-backed key/value cache
//!
//! One data file holds the whole table. A sentinel lock file next to it
//! serializes access between threads and between processes, and every
//! operation reloads the table when another writer changed the file.

pub mod cache;
pub mod config;
pub mod error;
pub mod lock;
pub mod tasks;

pub use cache::{
    BlobEntry, CacheEntry, CacheStats, DecodeEntry, EntryRegistry, JsonEntry, JsonPayload,
    MaxAge, PersistentCache, SharedEntry,
};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use lock::{FileLock, FileLockGuard};
pub use tasks::{spawn_configured_maintenance, spawn_maintenance_task};
