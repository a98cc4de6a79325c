//! LRU Query Cache — 조회 결과 캐시
//!
//! `LocalCache` 는 컨텍스트마다, `SharedCache` 는 DataDomain에 하나 존재합니다.
//! 커밋이 일어나면 관련 캐시 그룹 또는 전체가 무효화됩니다.

use crate::row::DataRow;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct Entry {
    rows: Arc<Vec<DataRow>>,
    group: Option<String>,
}

/// LRU Query Cache
pub struct QueryCache {
    inner: Mutex<LruCache<String, Entry>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl QueryCache {
    /// Capacity 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<DataRow>>> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            Some(entry) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(&entry.rows))
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: String, group: Option<String>, rows: Vec<DataRow>) -> Arc<Vec<DataRow>> {
        let rows = Arc::new(rows);
        self.inner.lock().put(
            key,
            Entry {
                rows: Arc::clone(&rows),
                group,
            },
        );
        rows
    }

    /// Drops every entry of a cache group.
    pub fn remove_group(&self, group: &str) {
        let mut cache = self.inner.lock();
        let keys: Vec<String> = cache
            .iter()
            .filter(|(_, e)| e.group.as_deref() == Some(group))
            .map(|(k, _)| k.clone())
            .collect();
        for k in keys {
            cache.pop(&k);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}
