//! In-process hot cache for token lookups, checked before the repository on every trade.

use crate::model::MintAddress;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// Window a token stays in the cache: refreshed from rows created within the last two hours,
/// evicted once older than that.
const CACHE_WINDOW: i64 = 2 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub tracked: bool,
    pub first_seen: DateTime<Utc>,
    pub threshold_crossed: bool,
}

#[derive(Debug, Default)]
pub struct HotCache {
    entries: RwLock<FnvHashMap<MintAddress, CacheEntry>>,
    misses: AtomicU64,
}

impl HotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checked first on every token lookup; a miss here falls through to the repository.
    pub fn get(&self, mint: &MintAddress) -> Option<CacheEntry> {
        let entry = self.entries.read().get(mint).copied();
        if entry.is_none() {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        entry
    }

    pub fn insert(&self, mint: MintAddress, entry: CacheEntry) {
        self.entries.write().insert(mint, entry);
    }

    /// Replace the cache contents with a freshly queried set of recent rows, then evict anything
    /// older than the two-hour window. Called on the 60 s refresh tick.
    pub fn refresh(&self, rows: impl IntoIterator<Item = (MintAddress, CacheEntry)>) {
        let mut entries = self.entries.write();
        entries.clear();
        entries.extend(rows);
        let cutoff = Utc::now() - ChronoDuration::seconds(CACHE_WINDOW);
        entries.retain(|_, entry| entry.first_seen >= cutoff);
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_is_counted_and_does_not_panic_on_empty_cache() {
        let cache = HotCache::new();
        assert!(cache.get(&MintAddress::new("Mint1".into())).is_none());
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn refresh_evicts_entries_older_than_the_two_hour_window() {
        let cache = HotCache::new();
        let stale = CacheEntry {
            tracked: true,
            first_seen: Utc::now() - ChronoDuration::hours(3),
            threshold_crossed: false,
        };
        let fresh = CacheEntry {
            tracked: true,
            first_seen: Utc::now(),
            threshold_crossed: false,
        };
        cache.refresh(vec![
            (MintAddress::new("Stale".into()), stale),
            (MintAddress::new("Fresh".into()), fresh),
        ]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&MintAddress::new("Fresh".into())).is_some());
    }
}
