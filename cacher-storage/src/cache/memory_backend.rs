//! In-process cache backend.
//!
//! A lock-protected map. Useful as a default backend for single-process
//! deployments and as the reference backend in tests. Write options are
//! accepted and ignored: entries never expire.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use cacher_core::{BackendError, CacherResult};

use super::traits::{BackendOptions, CacheBackend, CacheStats, Envelope};

/// In-memory cache backend.
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<String, Envelope>>,
    stats: RwLock<CacheStats>,
}

impl MemoryCacheBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_read(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    // Inspection reads through a poisoned lock. Writers never leave the map
    // half-updated.
    fn entries(&self) -> RwLockReadGuard<'_, HashMap<String, Envelope>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Remove one entry. Returns true if it existed.
    pub fn delete(&self, key: &str) -> CacherResult<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        let removed = entries.remove(key).is_some();
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = entries.len() as u64;
        }
        Ok(removed)
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear(&self) -> CacherResult<u64> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        let removed = entries.len() as u64;
        entries.clear();
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = 0;
        }
        Ok(removed)
    }

    /// Usage statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn read(&self, key: &str) -> CacherResult<Option<Envelope>> {
        let found = self
            .entries
            .read()
            .map_err(|_| BackendError::LockPoisoned)?
            .get(key)
            .cloned();
        self.record_read(found.is_some());
        Ok(found)
    }

    fn write(&self, key: &str, value: Envelope, _options: &BackendOptions) -> CacherResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        entries.insert(key.to_string(), value);
        if let Ok(mut stats) = self.stats.write() {
            stats.writes += 1;
            stats.entry_count = entries.len() as u64;
        }
        Ok(())
    }

    fn read_multi(&self, keys: &[String]) -> CacherResult<HashMap<String, Envelope>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| BackendError::LockPoisoned)?;

        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            match entries.get(key) {
                Some(value) => {
                    found.insert(key.clone(), value.clone());
                    self.record_read(true);
                }
                None => self.record_read(false),
            }
        }
        Ok(found)
    }
}
