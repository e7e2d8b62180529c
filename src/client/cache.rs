//! Bounded TTL cache for read-shaped API responses

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use tokio::time::Instant;

/// Default entry lifetime (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of cached responses
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// A cached response payload
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    pub timestamp: Instant,
}

/// Response cache keyed by method, URL and body
///
/// Expired entries are dropped lazily when read. Reads use `peek`, so only
/// inserts affect recency: when full, the oldest inserted entry goes first.
#[derive(Debug)]
pub struct ResponseCache {
    entries: LruCache<String, CacheEntry>,
    ttl: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl ResponseCache {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    /// Fresh payload for `key`, evicting it if it has expired
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let entry = self.entries.peek(key)?;
        if entry.timestamp.elapsed() < self.ttl {
            tracing::trace!(key, "cache hit");
            return Some(entry.data.clone());
        }

        tracing::debug!(key, "cache entry expired");
        self.entries.pop(key);
        None
    }

    /// Store a payload, replacing any previous entry for `key`
    pub fn insert(&mut self, key: String, data: Value) {
        self.entries.pop(&key);

        let entry = CacheEntry {
            key: key.clone(),
            data,
            timestamp: Instant::now(),
        };
        if let Some((evicted, _)) = self.entries.push(key, entry) {
            tracing::debug!(key = %evicted, "cache full, evicting oldest entry");
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.pop(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }
}
