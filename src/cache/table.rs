//! Cache Table Module
//!
//! In-memory key/entry map with dirty tracking and oldest-first eviction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::cache::entry::MaxAge;
use crate::cache::SharedEntry;

// == Cache Table ==
#[derive(Debug, Default)]
pub(crate) struct CacheTable {
    entries: HashMap<String, SharedEntry>,
    /// Diverged from the last loaded or saved snapshot
    dirty: bool,
}

impl CacheTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn get(&self, key: &str) -> Option<&SharedEntry> {
        self.entries.get(key)
    }

    /// Inserts a record read from disk without dirtying the table.
    pub(crate) fn load(&mut self, key: String, entry: SharedEntry) {
        self.entries.insert(key, entry);
    }

    // == Replace ==
    /// Stores `entry` under `key`, or removes the key when `entry` is None.
    ///
    /// Returns the previously stored entry and whether the stored value
    /// changed. Replacing an entry with an equal one keeps the original and
    /// leaves the table clean.
    pub(crate) fn replace(
        &mut self,
        key: &str,
        entry: Option<SharedEntry>,
    ) -> (Option<SharedEntry>, bool) {
        match entry {
            Some(entry) => {
                if let Some(current) = self.entries.get(key) {
                    if same_value(current, &entry) {
                        return (Some(current.clone()), false);
                    }
                }
                let previous = self.entries.insert(key.to_string(), entry);
                self.dirty = true;
                (previous, true)
            }
            None => {
                let previous = self.entries.remove(key);
                let changed = previous.is_some();
                self.dirty |= changed;
                (previous, changed)
            }
        }
    }

    pub(crate) fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.byte_size()).sum()
    }

    /// All records, oldest first; equal creation times are ordered by key.
    pub(crate) fn by_age(&self) -> Vec<(&String, &SharedEntry)> {
        let mut records: Vec<_> = self.entries.iter().collect();
        records.sort_by(|(ka, a), (kb, b)| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| ka.cmp(kb))
        });
        records
    }

    // == Shrink ==
    /// Removes oldest entries until the total size is at most `max_total_size`.
    ///
    /// Returns the removed entries in removal order.
    pub(crate) fn shrink_to(&mut self, max_total_size: u64) -> Vec<SharedEntry> {
        let mut total = self.total_size();
        if total <= max_total_size {
            return Vec::new();
        }

        let victims: Vec<String> = self.by_age().into_iter().map(|(k, _)| k.clone()).collect();
        let mut evicted = Vec::new();
        for key in victims {
            if total <= max_total_size {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                total = total.saturating_sub(entry.byte_size());
                evicted.push(entry);
            }
        }

        self.dirty |= !evicted.is_empty();
        evicted
    }

    /// Removes every entry, oldest first.
    pub(crate) fn drain_all(&mut self) -> Vec<SharedEntry> {
        let keys: Vec<String> = self.by_age().into_iter().map(|(k, _)| k.clone()).collect();
        let evicted: Vec<SharedEntry> = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .collect();

        self.dirty |= !evicted.is_empty();
        evicted
    }

    /// Removes every entry expired under `max_age`, oldest first.
    pub(crate) fn remove_expired(&mut self, max_age: MaxAge, now: DateTime<Utc>) -> Vec<SharedEntry> {
        let expired: Vec<String> = self
            .by_age()
            .into_iter()
            .filter(|(_, e)| max_age.is_expired(e.created_at(), now))
            .map(|(k, _)| k.clone())
            .collect();

        let evicted: Vec<SharedEntry> = expired
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .collect();

        self.dirty |= !evicted.is_empty();
        evicted
    }
}

/// Value equality between two entries, judged by their encoded form.
fn same_value(a: &SharedEntry, b: &SharedEntry) -> bool {
    if a.kind() != b.kind()
        || a.created_at() != b.created_at()
        || a.byte_size() != b.byte_size()
    {
        return false;
    }

    let mut left = Vec::new();
    let mut right = Vec::new();
    match (a.encode(&mut left), b.encode(&mut right)) {
        (Ok(()), Ok(())) => left == right,
        _ => false,
    }
}
