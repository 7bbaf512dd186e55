//! Error types for the persistent cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache and its file lock.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Rejected before any I/O took place
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The lock sentinel could not be created for a reason other than contention
    #[error("Failed to acquire lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading, writing or inspecting the data file failed
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        CacheError::InvalidArgument(msg.into())
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn lock(path: &Path, source: io::Error) -> Self {
        CacheError::Lock {
            path: path.to_path_buf(),
            source,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mentions_path() {
        let err = CacheError::io(
            Path::new("/tmp/data.bin"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/data.bin"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_lock_error_keeps_source() {
        let err = CacheError::lock(
            Path::new("data.bin.lock"),
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        let source = std::error::Error::source(&err).expect("source should be kept");
        assert_eq!(source.to_string(), "disk full");
    }
}
