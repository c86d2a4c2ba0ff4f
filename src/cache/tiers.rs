//! Two-tier in-memory entry cache.
//!
//! * **Hot**: bounded LRU; reads refresh recency.
//! * **Warm**: bounded LRU whose entries expire a fixed time after insertion.
//!
//! A warm hit is promoted by copying the entry into hot; it stays in warm.
//! Each tier has its own lock so hot and warm traffic do not contend.
//! Tiers hold copies of entries and may lag the index (a re-score does not
//! invalidate them).

use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::entry::CacheEntry;

/// Which tier answered a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum TierHit {
    /// Found in the hot tier.
    Hot(CacheEntry),
    /// Found in the warm tier and promoted.
    Warm(CacheEntry),
}

impl TierHit {
    /// The entry, regardless of tier.
    #[must_use]
    pub fn into_entry(self) -> CacheEntry {
        match self {
            Self::Hot(e) | Self::Warm(e) => e,
        }
    }
}

#[derive(Debug)]
struct WarmSlot {
    inserted: Instant,
    entry: CacheEntry,
}

/// Hot LRU tier plus warm TTL tier.
#[derive(Debug)]
pub struct TieredCache {
    hot: Mutex<LruCache<PathBuf, CacheEntry>>,
    warm: Mutex<LruCache<PathBuf, WarmSlot>>,
    ttl: Duration,
}

impl TieredCache {
    /// Create tiers with the given capacities and warm lifetime.
    ///
    /// Zero capacities are raised to one.
    #[must_use]
    pub fn new(hot_capacity: usize, warm_capacity: usize, ttl: Duration) -> Self {
        Self {
            hot: Mutex::new(LruCache::new(capacity(hot_capacity))),
            warm: Mutex::new(LruCache::new(capacity(warm_capacity))),
            ttl,
        }
    }

    /// Look `path` up in hot, then warm (promoting a warm hit).
    pub fn get(&self, path: &Path) -> Option<TierHit> {
        if let Some(entry) = self.hot_lock().get(path) {
            return Some(TierHit::Hot(entry.clone()));
        }

        let entry = {
            let mut warm = self.warm_lock();
            let expired = warm
                .peek(path)
                .is_some_and(|slot| slot.inserted.elapsed() >= self.ttl);
            if expired {
                warm.pop(path);
                None
            } else {
                warm.get(path).map(|slot| slot.entry.clone())
            }
        }?;

        self.hot_lock().put(path.to_path_buf(), entry.clone());
        Some(TierHit::Warm(entry))
    }

    /// Insert a copy of `entry` into both tiers.
    pub fn insert(&self, entry: &CacheEntry) {
        self.hot_lock().put(entry.path.clone(), entry.clone());
        self.warm_lock().put(
            entry.path.clone(),
            WarmSlot {
                inserted: Instant::now(),
                entry: entry.clone(),
            },
        );
    }

    /// Remove `path` from both tiers.
    pub fn invalidate(&self, path: &Path) {
        self.hot_lock().pop(path);
        self.warm_lock().pop(path);
    }

    /// Empty both tiers.
    pub fn clear(&self) {
        self.hot_lock().clear();
        self.warm_lock().clear();
    }

    /// Whether hot currently holds `path` (no recency update).
    pub fn hot_contains(&self, path: &Path) -> bool {
        self.hot_lock().contains(path)
    }

    /// Whether warm currently holds an unexpired `path` (no recency update).
    pub fn warm_contains(&self, path: &Path) -> bool {
        self.warm_lock()
            .peek(path)
            .is_some_and(|slot| slot.inserted.elapsed() < self.ttl)
    }

    /// Entry counts as (hot, warm). Warm may include expired, unvisited slots.
    pub fn sizes(&self) -> (usize, usize) {
        (self.hot_lock().len(), self.warm_lock().len())
    }

    fn hot_lock(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, CacheEntry>> {
        self.hot.lock().expect("hot tier mutex poisoned")
    }

    fn warm_lock(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, WarmSlot>> {
        self.warm.lock().expect("warm tier mutex poisoned")
    }
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{ContentLocation, EntryMetadata};
    use crate::security::FileClass;
    use crate::store::PartitionId;

    fn entry(path: &str) -> CacheEntry {
        CacheEntry {
            path: PathBuf::from(path),
            checksum: "00".into(),
            size: 1,
            modified_time: 0.0,
            cached_time: 0.0,
            compressed: false,
            access_count: 1,
            last_accessed: 0.0,
            location: ContentLocation {
                partition: PartitionId::new(0),
                checksum: "00".into(),
            },
            file_class: FileClass::Data,
            revision: None,
            security_score: 100.0,
            findings: Vec::new(),
            metadata: EntryMetadata::default(),
        }
    }

    #[test]
    fn test_insert_then_hot_hit() {
        let cache = TieredCache::new(10, 10, Duration::from_secs(60));
        cache.insert(&entry("/a"));
        assert!(matches!(cache.get(Path::new("/a")), Some(TierHit::Hot(_))));
        assert_eq!(cache.sizes(), (1, 1));
    }

    #[test]
    fn test_warm_hit_promotes_without_removing() {
        let cache = TieredCache::new(1, 10, Duration::from_secs(60));
        cache.insert(&entry("/a"));
        cache.insert(&entry("/b")); // evicts /a from hot

        assert!(!cache.hot_contains(Path::new("/a")));
        let hit = cache.get(Path::new("/a")).unwrap();
        assert!(matches!(hit, TierHit::Warm(_)));
        assert!(cache.hot_contains(Path::new("/a")));
        assert!(cache.warm_contains(Path::new("/a")));
    }

    #[test]
    fn test_hot_evicts_least_recently_used() {
        let cache = TieredCache::new(2, 10, Duration::from_secs(60));
        cache.insert(&entry("/a"));
        cache.insert(&entry("/b"));
        cache.get(Path::new("/a")); // /b is now least recent
        cache.insert(&entry("/c"));

        assert!(cache.hot_contains(Path::new("/a")));
        assert!(!cache.hot_contains(Path::new("/b")));
        assert!(cache.hot_contains(Path::new("/c")));
    }

    #[test]
    fn test_warm_entries_expire() {
        let cache = TieredCache::new(1, 10, Duration::from_millis(20));
        cache.insert(&entry("/a"));
        cache.insert(&entry("/b"));
        std::thread::sleep(Duration::from_millis(40));

        assert!(!cache.warm_contains(Path::new("/a")));
        assert!(cache.get(Path::new("/a")).is_none());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = TieredCache::new(10, 10, Duration::from_secs(60));
        cache.insert(&entry("/a"));
        cache.insert(&entry("/b"));

        cache.invalidate(Path::new("/a"));
        assert!(cache.get(Path::new("/a")).is_none());
        assert!(cache.get(Path::new("/b")).is_some());

        cache.clear();
        assert_eq!(cache.sizes(), (0, 0));
    }
}
