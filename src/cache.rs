use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::{IndexStats, PagedUsers};

/// Default TTL for cached query pages.
pub const QUERY_TTL: Duration = Duration::from_secs(3600);
/// Stats change slowly; cache them for five minutes.
pub const STATS_TTL: Duration = Duration::from_secs(300);

struct Entry<T> {
    value: T,
    inserted: Instant,
}

impl<T> Entry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            inserted: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted.elapsed() > ttl
    }
}

/// Read-through cache in front of the summary store.
///
/// Query results are keyed by a hash of the normalized query arguments.
/// Entries are never invalidated individually: any summary write flushes the
/// whole namespace, so correctness rests on bounded staleness (at most the
/// TTL, or until the next write) rather than precise invalidation.
pub struct QueryCache {
    queries: Mutex<HashMap<u64, Entry<PagedUsers>>>,
    stats: Mutex<Option<Entry<IndexStats>>>,
    query_ttl: Duration,
    stats_ttl: Duration,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_ttls(QUERY_TTL, STATS_TTL)
    }

    pub fn with_ttls(query_ttl: Duration, stats_ttl: Duration) -> Self {
        Self {
            queries: Mutex::new(HashMap::new()),
            stats: Mutex::new(None),
            query_ttl,
            stats_ttl,
        }
    }

    pub fn get_query(&self, key: u64) -> Option<PagedUsers> {
        let mut map = self.queries.lock().expect("cache lock poisoned");
        match map.get(&key) {
            Some(entry) if !entry.is_expired(self.query_ttl) => Some(entry.value.clone()),
            Some(_) => {
                map.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put_query(&self, key: u64, page: PagedUsers) {
        let mut map = self.queries.lock().expect("cache lock poisoned");
        map.insert(key, Entry::new(page));
    }

    pub fn get_stats(&self) -> Option<IndexStats> {
        let mut slot = self.stats.lock().expect("cache lock poisoned");
        match slot.as_ref() {
            Some(entry) if !entry.is_expired(self.stats_ttl) => Some(entry.value.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    pub fn put_stats(&self, stats: IndexStats) {
        let mut slot = self.stats.lock().expect("cache lock poisoned");
        *slot = Some(Entry::new(stats));
    }

    /// Drop everything. Called after any summary write or rebuild; coarse by
    /// design since pages are cheap to recompute.
    pub fn flush_all(&self) {
        self.queries.lock().expect("cache lock poisoned").clear();
        *self.stats.lock().expect("cache lock poisoned") = None;
    }

    pub fn len(&self) -> usize {
        self.queries.lock().expect("cache lock poisoned").len()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(total: i64) -> PagedUsers {
        PagedUsers {
            users: Vec::new(),
            total_count: total,
            page: 1,
            per_page: 20,
            total_pages: 1,
        }
    }

    fn stats() -> IndexStats {
        IndexStats {
            total_indexed: 80,
            total_users: 100,
            coverage_percentage: 80.0,
            last_update: None,
        }
    }

    #[test]
    fn query_hit_after_put() {
        let cache = QueryCache::new();
        assert!(cache.get_query(42).is_none());

        cache.put_query(42, page(7));
        let hit = cache.get_query(42).expect("cached page");
        assert_eq!(hit.total_count, 7);
    }

    #[test]
    fn expired_entries_miss() {
        let cache = QueryCache::with_ttls(Duration::ZERO, Duration::ZERO);

        cache.put_query(1, page(1));
        cache.put_stats(stats());
        std::thread::sleep(Duration::from_millis(5));

        assert!(cache.get_query(1).is_none());
        assert!(cache.get_stats().is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn flush_clears_queries_and_stats() {
        let cache = QueryCache::new();
        cache.put_query(1, page(1));
        cache.put_query(2, page(2));
        cache.put_stats(stats());

        cache.flush_all();

        assert_eq!(cache.len(), 0);
        assert!(cache.get_query(1).is_none());
        assert!(cache.get_stats().is_none());
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let cache = QueryCache::new();
        cache.put_query(1, page(1));
        cache.put_query(2, page(2));

        assert_eq!(cache.get_query(1).unwrap().total_count, 1);
        assert_eq!(cache.get_query(2).unwrap().total_count, 2);
    }
}
