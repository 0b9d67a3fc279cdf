//! TTL cache for backend responses and classifications.
//!
//! Entries are idempotent by construction (same key means same upstream
//! inputs), so identical-key write races are resolved last-writer-wins.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Deterministic cache key from an operation name and its inputs.
pub fn cache_key(operation: &str, inputs: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    for input in inputs {
        hasher.update([0u8]);
        hasher.update(input.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A cached value with its insertion time.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Concurrent map with per-cache TTL. Stale entries are dropped lazily on
/// read and eagerly via [`TtlCache::purge_expired`].
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a live entry, removing it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                return Some(entry.value.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Insert or overwrite an entry.
    pub fn insert(&self, key: String, value: V) {
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of entries, live or stale.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        self.entries
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
    }
}
