//! Cache Maintenance Task
//!
//! Background task that periodically shrinks a cache back under its byte budget.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::PersistentCache;
use crate::config::CacheConfig;

/// Spawns a background task that periodically shrinks the cache.
///
/// The task runs in an infinite loop, sleeping for `interval` between runs.
/// Each run executes [`PersistentCache::shrink`] on the blocking thread pool,
/// since it waits on the file lock and performs file I/O. Failures are logged
/// and the next run proceeds as usual.
///
/// # Arguments
/// * `cache` - Shared cache to maintain
/// * `max_total_size` - Byte budget passed to every shrink
/// * `interval` - Time between runs
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(PersistentCache::open("cache.bin", EntryRegistry::with_blobs()));
/// let handle = spawn_maintenance_task(cache.clone(), 64 * 1024 * 1024, Duration::from_secs(60));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_maintenance_task(
    cache: Arc<PersistentCache>,
    max_total_size: u64,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting maintenance of {} every {:?} with a budget of {} bytes",
            cache.path().display(),
            interval,
            max_total_size
        );

        loop {
            tokio::time::sleep(interval).await;

            let target = cache.clone();
            let outcome =
                tokio::task::spawn_blocking(move || target.shrink(max_total_size)).await;

            match outcome {
                Ok(Ok(evicted)) if !evicted.is_empty() => {
                    info!("Maintenance: evicted {} entries", evicted.len());
                }
                Ok(Ok(_)) => {
                    debug!("Maintenance: cache within budget");
                }
                Ok(Err(err)) => {
                    warn!("Maintenance of {} failed: {}", cache.path().display(), err);
                }
                Err(err) => {
                    warn!("Maintenance run did not complete: {}", err);
                }
            }
        }
    })
}

/// Spawns the maintenance task described by `config`, if it sets a byte budget.
pub fn spawn_configured_maintenance(
    cache: Arc<PersistentCache>,
    config: &CacheConfig,
) -> Option<JoinHandle<()>> {
    let max_total_size = config.max_total_size?;
    let interval = Duration::from_secs(config.maintenance_interval);
    Some(spawn_maintenance_task(cache, max_total_size, interval))
}
