//! Size- and age-bounded query result cache.
//!
//! Keys are deterministic strings built from the filter's present fields.
//! The cache holds at most [`MAX_ENTRIES`] results for [`TTL`] each; on
//! insertion past capacity the single least-recently-touched entry is
//! evicted, and expired entries are treated as absent (and removed) on
//! read. Hit/miss counters are cumulative, for diagnostics.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use incident_map_incident_models::CanonicalIncident;
use serde::Serialize;

use crate::QueryStats;

/// Maximum number of cached results.
pub const MAX_ENTRIES: usize = 128;

/// Time-to-live for a cached result.
pub const TTL: Duration = Duration::from_secs(60);

/// A cached result: the incident list plus the stats computed for it.
#[derive(Debug, Clone)]
pub struct CachedResult {
    /// Incidents that matched the filter.
    pub incidents: Vec<CanonicalIncident>,
    /// Per-stage stats recorded when the result was computed.
    pub stats: QueryStats,
}

struct CacheEntry {
    result: CachedResult,
    inserted: Instant,
    last_touched: Instant,
}

/// Cumulative cache counters, exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Total cache hits since startup.
    pub hits: u64,
    /// Total cache misses since startup.
    pub misses: u64,
    /// Current number of live entries.
    pub entries: usize,
}

/// The bounded LRU+TTL cache.
#[derive(Default)]
pub struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a key, counting a hit or miss. An entry older than the TTL
    /// is removed and reported as a miss.
    pub fn get(&mut self, key: &str, now: Instant) -> Option<CachedResult> {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| now.duration_since(entry.inserted) > TTL);
        if expired {
            self.entries.remove(key);
        }

        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.last_touched = now;
                self.hits += 1;
                Some(entry.result.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Inserts a result, evicting the least-recently-touched entry when the
    /// cache is at capacity.
    pub fn insert(&mut self, key: String, result: CachedResult, now: Instant) {
        if self.entries.len() >= MAX_ENTRIES && !self.entries.contains_key(&key) {
            let evict = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_touched)
                .map(|(key, _)| key.clone());
            if let Some(old_key) = evict {
                log::debug!("query cache full, evicting {old_key}");
                self.entries.remove(&old_key);
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted: now,
                last_touched: now,
            },
        );
    }

    /// Drops every entry. Counters are cumulative and survive the clear.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> CachedResult {
        CachedResult {
            incidents: Vec::new(),
            stats: QueryStats::default(),
        }
    }

    #[test]
    fn hit_after_insert() {
        let mut cache = QueryCache::new();
        let now = Instant::now();

        assert!(cache.get("k", now).is_none());
        cache.insert("k".to_string(), result(), now);
        assert!(cache.get("k", now).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn expired_entries_are_misses_and_removed() {
        let mut cache = QueryCache::new();
        let now = Instant::now();

        cache.insert("k".to_string(), result(), now);
        let later = now + TTL + Duration::from_secs(1);
        assert!(cache.get("k", later).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn evicts_least_recently_touched() {
        let mut cache = QueryCache::new();
        let mut now = Instant::now();

        for i in 0..MAX_ENTRIES {
            cache.insert(format!("k{i}"), result(), now);
            now += Duration::from_millis(1);
        }

        // Touch k0 so k1 becomes the eviction candidate.
        assert!(cache.get("k0", now).is_some());
        now += Duration::from_millis(1);

        cache.insert("overflow".to_string(), result(), now);
        assert_eq!(cache.stats().entries, MAX_ENTRIES);
        assert!(cache.get("k1", now).is_none());
        assert!(cache.get("k0", now).is_some());
    }

    #[test]
    fn clear_preserves_counters() {
        let mut cache = QueryCache::new();
        let now = Instant::now();

        cache.insert("k".to_string(), result(), now);
        cache.get("k", now);
        cache.clear();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 0);
    }
}
