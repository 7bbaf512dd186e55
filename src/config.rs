//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between attempts to create a contended lock sentinel.
pub const DEFAULT_LOCK_RETRY_MS: u64 = 20;

/// Default interval between background maintenance runs.
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 60;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Backing data file
    pub path: PathBuf,
    /// Sleep between attempts while another owner holds the lock
    pub lock_retry_interval: Duration,
    /// Byte budget enforced by the maintenance task, None = unbounded
    pub max_total_size: Option<u64>,
    /// Maintenance task interval in seconds
    pub maintenance_interval: u64,
}

impl CacheConfig {
    /// Creates a configuration for the given data file with default tuning.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_PATH` - Backing data file (default: cache.bin)
    /// - `CACHE_LOCK_RETRY_MS` - Lock retry interval in milliseconds (default: 20)
    /// - `CACHE_MAX_BYTES` - Byte budget for maintenance (default: unbounded)
    /// - `CACHE_MAINTENANCE_INTERVAL_SECS` - Maintenance frequency (default: 60)
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// Values that fail to parse fall back to their defaults.
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            path: lookup("CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            lock_retry_interval: lookup("CACHE_LOCK_RETRY_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_retry_interval),
            max_total_size: lookup("CACHE_MAX_BYTES").and_then(|v| v.parse().ok()),
            maintenance_interval: lookup("CACHE_MAINTENANCE_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.maintenance_interval),
        }
    }

    /// Path of the sentinel file guarding the data file.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cache.bin"),
            lock_retry_interval: Duration::from_millis(DEFAULT_LOCK_RETRY_MS),
            max_total_size: None,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL_SECS,
        }
    }
}
