//! Lock Module
//!
//! Cross-process mutual exclusion built on exclusive creation of a sentinel file.

mod file_lock;

pub use file_lock::{FileLock, FileLockGuard};
