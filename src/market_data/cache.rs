// =============================================================================
// Candle Cache: bounded, time-expiring store of fetched series
// =============================================================================
//
// Keyed by (symbol, timeframe). Entries expire `ttl` after insertion and are
// dropped lazily on access or eagerly by `purge_expired`. When the cache is
// full, expired entries go first, then the oldest insertion.
//
// Refresh policy: readers that need fresh data bypass `get` and call
// `insert` with the newly fetched series, which replaces the entry and
// restarts its TTL.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use super::candle::{CandleKey, Series};

struct Entry {
    series: Arc<Series>,
    inserted_at: Instant,
}

/// Serialisable view of the cache counters for the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Thread-safe TTL cache of candle series.
pub struct CandleCache {
    entries: RwLock<HashMap<CandleKey, Entry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CandleCache {
    /// `max_entries == 0` disables caching: inserts are dropped.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh series for `key`, if any.
    pub fn get(&self, key: &CandleKey) -> Option<Arc<Series>> {
        self.get_at(key, Instant::now())
    }

    pub(crate) fn get_at(&self, key: &CandleKey, now: Instant) -> Option<Arc<Series>> {
        {
            let map = self.entries.read();
            match map.get(key) {
                Some(entry) if !self.is_expired(entry, now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.series.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it unless another writer refreshed it meanwhile.
        let mut map = self.entries.write();
        if let Some(entry) = map.get(key) {
            if !self.is_expired(entry, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.series.clone());
            }
            map.remove(key);
            debug!(key = %key, "cache entry expired");
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `series` under its own key, replacing any previous entry.
    pub fn insert(&self, series: Arc<Series>) {
        self.insert_at(series, Instant::now());
    }

    pub(crate) fn insert_at(&self, series: Arc<Series>, now: Instant) {
        if self.max_entries == 0 {
            return;
        }

        let key = series.key().clone();
        let mut map = self.entries.write();

        if !map.contains_key(&key) && map.len() >= self.max_entries {
            let ttl = self.ttl;
            map.retain(|_, e| now.saturating_duration_since(e.inserted_at) < ttl);

            while map.len() >= self.max_entries {
                let oldest = map
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        map.remove(&k);
                        debug!(key = %k, "cache full, evicted oldest entry");
                    }
                    None => break,
                }
            }
        }

        map.insert(
            key,
            Entry {
                series,
                inserted_at: now,
            },
        );
    }

    /// Drop one entry. Returns `true` if it was present.
    pub fn invalidate(&self, key: &CandleKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    /// Drop every timeframe cached for `symbol`. Returns the number removed.
    pub fn invalidate_symbol(&self, symbol: &str) -> usize {
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|k, _| !k.symbol.eq_ignore_ascii_case(symbol));
        before - map.len()
    }

    /// Drop everything. Returns the number removed.
    pub fn clear(&self) -> usize {
        let mut map = self.entries.write();
        let removed = map.len();
        map.clear();
        removed
    }

    /// Remove all expired entries now. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub(crate) fn purge_expired_at(&self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut map = self.entries.write();
        let before = map.len();
        map.retain(|_, e| now.saturating_duration_since(e.inserted_at) < ttl);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_entries: self.max_entries,
            ttl_secs: self.ttl.as_secs(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }
}

impl std::fmt::Debug for CandleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleCache")
            .field("entries", &self.len())
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
