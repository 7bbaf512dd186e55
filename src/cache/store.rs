//! Cache Store Module
//!
//! File-backed cache engine. Every public operation runs the same sequence
//! under the file lock: refresh the table if the data file changed, apply the
//! operation, save the table if it became dirty. Eviction callbacks run only
//! after the lock has been released.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::cache::codec::{decode_table, encode_table};
use crate::cache::entry::{CacheEntry, DecodeEntry, MaxAge};
use crate::cache::fingerprint::Fingerprint;
use crate::cache::registry::EntryRegistry;
use crate::cache::stats::CacheStats;
use crate::cache::table::CacheTable;
use crate::cache::SharedEntry;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::lock::FileLock;

// == Cache State ==
#[derive(Debug, Default)]
struct CacheState {
    table: CacheTable,
    /// Data file as of the last load or save, None = not yet observed
    fingerprint: Option<Fingerprint>,
    stats: CacheStats,
}

// == Persistent Cache ==
/// Key/value cache stored in a single file and shared through a lock file.
///
/// Any number of instances, in this process or others, may point at the same
/// path. Each operation sees every change made by the others as long as all
/// writers go through a `PersistentCache`.
#[derive(Debug)]
pub struct PersistentCache {
    path: PathBuf,
    lock: FileLock,
    registry: EntryRegistry,
    state: Mutex<CacheState>,
}

impl PersistentCache {
    // == Constructor ==
    /// Creates a cache over `path`, locked through `<path>.lock`.
    ///
    /// No I/O happens until the first operation.
    pub fn open(path: impl Into<PathBuf>, registry: EntryRegistry) -> Self {
        Self::from_config(&CacheConfig::new(path), registry)
    }

    /// Creates a cache from configuration.
    pub fn from_config(config: &CacheConfig, registry: EntryRegistry) -> Self {
        Self {
            path: config.path.clone(),
            lock: FileLock::with_retry_interval(config.lock_path(), config.lock_retry_interval),
            registry,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    pub fn registry(&self) -> &EntryRegistry {
        &self.registry
    }

    // == Set ==
    /// Stores `entry` under `key`, or removes the key when `entry` is None.
    ///
    /// Returns the previously stored entry. If the stored value changed, the
    /// displaced entry's `on_evicted` runs after the lock is released.
    pub fn set(&self, key: &str, entry: Option<SharedEntry>) -> Result<Option<SharedEntry>> {
        validate_key(key)?;
        if let Some(entry) = &entry {
            self.check_kind(entry.kind())?;
        }

        self.locked(|state| {
            let (previous, changed) = state.table.replace(key, entry);
            trace!("set {:?} changed={}", key, changed);
            let displaced = match (&previous, changed) {
                (Some(previous), true) => vec![previous.clone()],
                _ => Vec::new(),
            };
            (previous, displaced)
        })
    }

    /// Stores a concrete entry under `key`.
    pub fn insert<E: CacheEntry>(&self, key: &str, entry: E) -> Result<Option<SharedEntry>> {
        self.set(key, Some(Arc::new(entry)))
    }

    /// Removes `key`, returning the entry that was stored.
    pub fn remove(&self, key: &str) -> Result<Option<SharedEntry>> {
        self.set(key, None)
    }

    // == Get ==
    /// Looks up `key`, treating entries older than `max_age` as absent.
    ///
    /// An expired entry is removed (and its callback fired after unlock) only
    /// when `remove_if_expired` is true; either way the lookup returns None.
    pub fn get(
        &self,
        key: &str,
        max_age: MaxAge,
        remove_if_expired: bool,
    ) -> Result<Option<SharedEntry>> {
        validate_key(key)?;

        self.locked(|state| {
            let entry = match state.table.get(key) {
                Some(entry) => entry.clone(),
                None => {
                    state.stats.record_miss();
                    return (None, Vec::new());
                }
            };

            if !max_age.is_expired(entry.created_at(), Utc::now()) {
                state.stats.record_hit();
                return (Some(entry), Vec::new());
            }

            state.stats.record_expiration();
            if !remove_if_expired {
                return (None, Vec::new());
            }

            let (removed, _) = state.table.replace(key, None);
            let evicted: Vec<SharedEntry> = removed.into_iter().collect();
            state.stats.record_evictions(evicted.len());
            (None, evicted)
        })
    }

    // == Enumeration ==
    /// Every entry of kind `T`, oldest first.
    ///
    /// Fails with [`CacheError::InvalidArgument`] if `T` is not registered.
    pub fn to_array<T: DecodeEntry>(&self) -> Result<Vec<SharedEntry>> {
        self.to_array_of_kind(T::KIND)
    }

    /// Every entry whose kind tag is `kind`, oldest first.
    pub fn to_array_of_kind(&self, kind: &str) -> Result<Vec<SharedEntry>> {
        self.check_kind(kind)?;

        self.locked(|state| {
            let entries = state
                .table
                .by_age()
                .into_iter()
                .filter(|(_, e)| e.kind() == kind)
                .map(|(_, e)| e.clone())
                .collect();
            (entries, Vec::new())
        })
    }

    /// Every entry regardless of kind, oldest first.
    pub fn entries(&self) -> Result<Vec<SharedEntry>> {
        self.locked(|state| {
            let entries = state.table.by_age().into_iter().map(|(_, e)| e.clone()).collect();
            (entries, Vec::new())
        })
    }

    /// Every key with its entry, oldest first.
    pub fn snapshot(&self) -> Result<Vec<(String, SharedEntry)>> {
        self.locked(|state| {
            let records = state
                .table
                .by_age()
                .into_iter()
                .map(|(k, e)| (k.clone(), e.clone()))
                .collect();
            (records, Vec::new())
        })
    }

    pub fn len(&self) -> Result<usize> {
        self.locked(|state| (state.table.len(), Vec::new()))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.locked(|state| (state.table.is_empty(), Vec::new()))
    }

    /// Sum of every entry's byte size.
    pub fn total_size(&self) -> Result<u64> {
        self.locked(|state| (state.table.total_size(), Vec::new()))
    }

    // == Eviction ==
    /// Removes every entry; returns them oldest first after their callbacks ran.
    pub fn flush(&self) -> Result<Vec<SharedEntry>> {
        self.evict_with(|table| table.drain_all())
    }

    /// Removes oldest entries until the total byte size is at most `max_total_size`.
    ///
    /// Returns the removed entries in removal order, after their callbacks ran.
    pub fn shrink(&self, max_total_size: u64) -> Result<Vec<SharedEntry>> {
        self.evict_with(|table| table.shrink_to(max_total_size))
    }

    /// Removes every entry expired under `max_age`, oldest first.
    pub fn purge_expired(&self, max_age: MaxAge) -> Result<Vec<SharedEntry>> {
        let now = Utc::now();
        self.evict_with(|table| table.remove_expired(max_age, now))
    }

    fn evict_with<F>(&self, evict: F) -> Result<Vec<SharedEntry>>
    where
        F: FnOnce(&mut CacheTable) -> Vec<SharedEntry>,
    {
        self.locked(|state| {
            let evicted = evict(&mut state.table);
            state.stats.record_evictions(evicted.len());
            if !evicted.is_empty() {
                debug!("Evicted {} entries from {}", evicted.len(), self.path.display());
            }
            (evicted.clone(), evicted)
        })
    }

    // == Stats ==
    /// Counters for this instance.
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats.clone()
    }

    // == Locked Sequence ==
    /// Runs `op` between refresh and persist with the file lock held, then
    /// fires `on_evicted` for the entries it reports once the lock is gone.
    fn locked<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut CacheState) -> (R, Vec<SharedEntry>),
    {
        let (result, evicted) = {
            let _guard = self.lock.acquire()?;
            let mut state = self.state.lock();
            self.refresh(&mut *state)?;
            let (result, evicted) = op(&mut *state);
            self.persist(&mut *state)?;
            (result, evicted)
        };

        for entry in &evicted {
            entry.on_evicted();
        }
        Ok(result)
    }

    // == Refresh ==
    fn refresh(&self, state: &mut CacheState) -> Result<()> {
        debug_assert!(
            !state.table.is_dirty(),
            "refresh would discard unsaved changes"
        );

        let observed = match Fingerprint::observe(&self.path) {
            Ok(Some(observed)) => observed,
            Ok(None) => {
                if state.fingerprint.is_some() || !state.table.is_empty() {
                    debug!("Cache file {} is gone, clearing table", self.path.display());
                }
                state.table = CacheTable::new();
                state.fingerprint = None;
                return Ok(());
            }
            Err(err) => return Err(CacheError::io(&self.path, err)),
        };

        if state.fingerprint == Some(observed) {
            return Ok(());
        }

        let file = File::open(&self.path).map_err(|e| CacheError::io(&self.path, e))?;
        state.table = decode_table(&mut BufReader::new(file), &self.registry);
        state.fingerprint = Some(observed);
        state.stats.record_reload();
        debug!(
            "Reloaded {} entries from {}",
            state.table.len(),
            self.path.display()
        );
        Ok(())
    }

    // == Persist ==
    fn persist(&self, state: &mut CacheState) -> Result<()> {
        if !state.table.is_dirty() {
            return Ok(());
        }

        // Clean either way: after a failed write the next operation reloads
        state.table.mark_clean();
        match self.write_table(&state.table) {
            Ok(fingerprint) => {
                state.fingerprint = Some(fingerprint);
                state.stats.record_save();
                trace!(
                    "Saved {} entries to {}",
                    state.table.len(),
                    self.path.display()
                );
                Ok(())
            }
            Err(err) => {
                state.fingerprint = None;
                Err(err)
            }
        }
    }

    fn write_table(&self, table: &CacheTable) -> Result<Fingerprint> {
        let io_err = |e: io::Error| CacheError::io(&self.path, e);

        let mut buf = Vec::new();
        encode_table(&mut buf, table).map_err(io_err)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let mut file = open_for_write(&self.path).map_err(io_err)?;
        file.write_all(&buf).map_err(io_err)?;
        file.flush().map_err(io_err)?;
        drop(file);

        Fingerprint::observe(&self.path)
            .map_err(io_err)?
            .ok_or_else(|| io_err(io::Error::new(io::ErrorKind::NotFound, "vanished after save")))
    }

    fn check_kind(&self, kind: &str) -> Result<()> {
        if self.registry.contains(kind) {
            Ok(())
        } else {
            Err(CacheError::invalid(format!(
                "entry kind {:?} is not registered",
                kind
            )))
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::invalid("key must not be empty"));
    }
    Ok(())
}

#[cfg(not(windows))]
fn open_for_write(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(windows)]
fn open_for_write(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .share_mode(0)
        .open(path)
}
