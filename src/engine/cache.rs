//! Value cache for query results.

use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;

use crate::types::CacheStats;

/// Last computed values per query key.
///
/// Cleared wholesale on every write and every query creation; entries are
/// repopulated lazily on the next read. `revision` is the source revision
/// the entries were computed against, so caches layered over another store
/// drop stale entries when that store changes.
pub(crate) struct ValueCache {
    entries: LruCache<String, Vec<Value>>,
    revision: u64,
    hits: u64,
    misses: u64,
}

impl ValueCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            revision: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Drop every entry if the source moved past the cached revision.
    pub fn sync(&mut self, revision: u64) {
        if self.revision != revision {
            self.entries.clear();
            self.revision = revision;
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Vec<Value>> {
        match self.entries.get(key) {
            Some(values) => {
                self.hits += 1;
                Some(values.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(&mut self, key: &str, values: Vec<Value>) {
        self.entries.put(key.to_string(), values);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}
