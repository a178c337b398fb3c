//! Result cache: TTL plus bounded size with FIFO eviction.
//!
//! Entries are immutable once written; a second write for the same key
//! replaces the entry wholesale. All state sits behind one mutex so hit and
//! miss counters stay consistent with eviction under concurrent access.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::filter::{normalize_text, DomainFilter};
use crate::query::Operation;
use crate::result::QueryResult;

/// Normalized cache key: a BLAKE3 digest of
/// `(model, operation, domain, group_by, limit, order)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// Builds a key. Text components are normalized (case, diacritics,
    /// whitespace) so near-duplicate phrasing shares an entry.
    #[must_use]
    pub fn new(
        model: &str,
        operation: Operation,
        domain: &DomainFilter,
        group_by: &[String],
        limit: Option<usize>,
        order_by: Option<&str>,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        let mut part = |s: &str| {
            hasher.update(s.as_bytes());
            hasher.update(&[0x1f]);
        };
        part(&normalize_text(model));
        part(operation.as_str());
        part(&domain.canonical());
        for field in group_by {
            part(&normalize_text(field));
        }
        part("|");
        part(&limit.map(|l| l.to_string()).unwrap_or_default());
        part(&order_by.map(normalize_text).unwrap_or_default());
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that missed or found an expired entry.
    pub misses: u64,
    /// Entries dropped to respect the size bound.
    pub evictions: u64,
    /// Entries purged on lookup after their TTL.
    pub expirations: u64,
    /// Live entries at snapshot time.
    pub entries: usize,
}

impl CacheStats {
    /// Hits over lookups, or 0 with no lookups.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    result: QueryResult,
    inserted_at: Instant,
    generation: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    // Insertion order; stale generations are skipped on eviction.
    order: VecDeque<(CacheKey, u64)>,
    next_generation: u64,
    stats: CacheStats,
}

impl CacheState {
    fn evict_oldest(&mut self) -> bool {
        while let Some((key, generation)) = self.order.pop_front() {
            let live = self
                .entries
                .get(&key)
                .is_some_and(|e| e.generation == generation);
            if live {
                self.entries.remove(&key);
                self.stats.evictions += 1;
                debug!(key = %key, "cache eviction");
                return true;
            }
        }
        false
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, generation)| entries.get(key).is_some_and(|e| e.generation == *generation));
    }
}

/// In-memory result cache shared by every request of a deployment.
#[derive(Debug)]
pub struct ResultCache {
    state: Mutex<CacheState>,
    ttl: Duration,
    max_entries: usize,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl ResultCache {
    /// Creates a cache from config.
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.ttl(), config.max_entries)
    }

    /// Creates a cache with an explicit TTL and size bound (minimum 1).
    #[must_use]
    pub fn with_limits(ttl: Duration, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    // Entries are replaced, never mutated, so a panicked writer cannot
    // leave a half-written value behind.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `key` now.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<QueryResult> {
        self.get_at(key, Instant::now())
    }

    /// Looks up `key` as of `now`. Expired entries are purged and count as misses.
    #[must_use]
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<QueryResult> {
        let mut state = self.lock();
        let lookup = state
            .entries
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.inserted_at) < self.ttl);
        let Some(fresh) = lookup else {
            state.stats.misses += 1;
            debug!(key = %key, "cache miss");
            return None;
        };
        if !fresh {
            state.entries.remove(key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            debug!(key = %key, "cache entry expired");
            return None;
        }
        state.stats.hits += 1;
        debug!(key = %key, "cache hit");
        state.entries.get(key).map(|e| {
            let mut result = e.result.clone();
            result.cached = true;
            result
        })
    }

    /// Stores `result` now. Returns false if the result was not cacheable.
    pub fn insert(&self, key: CacheKey, result: &QueryResult) -> bool {
        self.insert_at(key, result, Instant::now())
    }

    /// Stores `result` as of `now`.
    ///
    /// Only successful, non-empty results are cached; zero results are
    /// re-queried so a later write on the data service shows up at once.
    pub fn insert_at(&self, key: CacheKey, result: &QueryResult, now: Instant) -> bool {
        if !result.success || result.is_empty() {
            return false;
        }
        let mut state = self.lock();
        if !state.entries.contains_key(&key) {
            while state.entries.len() >= self.max_entries {
                if !state.evict_oldest() {
                    break;
                }
            }
        }
        let generation = state.next_generation;
        state.next_generation += 1;
        let mut stored = result.clone();
        stored.cached = false;
        state.entries.insert(
            key,
            CacheEntry {
                result: stored,
                inserted_at: now,
                generation,
            },
        );
        state.order.push_back((key, generation));
        if state.order.len() > self.max_entries.saturating_mul(2) {
            state.compact_order();
        }
        true
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    /// Live entry count (including not-yet-purged expired entries).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats
        }
    }
}
