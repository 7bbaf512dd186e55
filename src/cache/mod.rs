//! Cache Module
//!
//! File-backed key/value cache with age-based expiry and size-based eviction.

pub mod codec;
mod entry;
mod fingerprint;
mod registry;
mod stats;
mod store;
mod table;


use std::sync::Arc;

// Re-export public types
pub use entry::{now_micros, BlobEntry, CacheEntry, DecodeEntry, JsonEntry, JsonPayload, MaxAge};
pub use registry::EntryRegistry;
pub use stats::CacheStats;
pub use store::PersistentCache;

/// An entry as held by the table; shared with callers without copying.
pub type SharedEntry = Arc<dyn CacheEntry>;
