// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OptiWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fingerprint of any hashable input, used as a cache-key component
pub fn fingerprint<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint of a float series via its bit patterns
pub fn fingerprint_series(values: &[f64]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for v in values {
        v.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

struct CacheEntry<V> {
    value: V,
    inserted: Instant,
}

/// TTL cache of derived series keyed by input fingerprints
///
/// Each key owns its own lock, so at most one build runs per key: a second
/// caller arriving mid-build blocks on that key's lock and then observes
/// the freshly built value. Different keys never contend.
pub struct SeriesCache<K, V> {
    entries: Mutex<HashMap<K, Arc<Mutex<Option<CacheEntry<V>>>>>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> SeriesCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Return the cached value for `key`, building it at most once
    pub fn get_or_build(&self, key: K, build: impl FnOnce() -> V) -> V {
        let slot = {
            let mut entries = self.entries.lock();
            entries
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };

        let mut guard = slot.lock();
        if let Some(entry) = guard.as_ref() {
            if entry.inserted.elapsed() < self.ttl {
                return entry.value.clone();
            }
        }
        let value = build();
        *guard = Some(CacheEntry {
            value: value.clone(),
            inserted: Instant::now(),
        });
        value
    }

    /// Drop a single key (source-state change notification)
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    /// Drop everything; used on reconfiguration
    pub fn purge(&self) {
        self.entries.lock().clear();
    }

    /// Evict entries whose TTL has passed, bounding memory across days
    pub fn evict_expired(&self) {
        let mut entries = self.entries.lock();
        entries.retain(|_, slot| match slot.try_lock() {
            Some(guard) => match guard.as_ref() {
                Some(entry) => entry.inserted.elapsed() < self.ttl,
                None => true, // build in flight
            },
            // Locked means a build is running; keep it
            None => true,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
