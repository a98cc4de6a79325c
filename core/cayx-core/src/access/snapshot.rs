//! DataRowStore — 공유 스냅샷 캐시
//!
//! ObjectId별로 마지막으로 알려진 커밋된 행을 보관합니다. 여러 컨텍스트가 락 없이
//! 동시에 읽고 쓸 수 있도록 DashMap을 사용합니다. 모든 스냅샷은 전역 버전을 가지며,
//! 용량을 넘으면 가장 오래된 스냅샷부터 버립니다.

use crate::context::ObjectId;
use crate::row::DataRow;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of cached snapshots.
pub const DEFAULT_SNAPSHOT_CACHE_SIZE: usize = 10_000;

/// 커밋된 행 스냅샷
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub row: DataRow,
    pub version: u64,
}

/// Changes made by one commit, posted to every context sharing the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotEvent {
    /// Context that made the changes (it already knows them)
    pub source: Option<u64>,
    pub modified: Vec<(ObjectId, DataRow)>,
    pub deleted: Vec<ObjectId>,
    /// Snapshots dropped without a known replacement
    pub invalidated: Vec<ObjectId>,
    /// Temporary ids that became permanent
    pub replaced: Vec<(ObjectId, ObjectId)>,
}

impl SnapshotEvent {
    pub fn is_empty(&self) -> bool {
        self.modified.is_empty()
            && self.deleted.is_empty()
            && self.invalidated.is_empty()
            && self.replaced.is_empty()
    }
}

/// 스냅샷 캐시
#[derive(Debug)]
pub struct DataRowStore {
    snapshots: DashMap<ObjectId, Arc<Snapshot>>,
    capacity: usize,
    version: AtomicU64,
}

impl Default for DataRowStore {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CACHE_SIZE)
    }
}

impl DataRowStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: DashMap::new(),
            capacity: capacity.max(1),
            version: AtomicU64::new(0),
        }
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<Snapshot>> {
        self.snapshots.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.snapshots.contains_key(id)
    }

    /// Stores a fetched or committed row.
    pub fn put(&self, id: ObjectId, row: DataRow) -> Arc<Snapshot> {
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(Snapshot { row, version });
        self.snapshots.insert(id, Arc::clone(&snapshot));
        if self.snapshots.len() > self.capacity {
            self.evict(version);
        }
        snapshot
    }

    pub fn remove(&self, id: &ObjectId) -> Option<Arc<Snapshot>> {
        self.snapshots.remove(id).map(|(_, s)| s)
    }

    /// Applies a commit's changes to the store.
    pub fn process(&self, event: &SnapshotEvent) {
        for (id, row) in &event.modified {
            self.put(id.clone(), row.clone());
        }
        for id in event.deleted.iter().chain(&event.invalidated) {
            self.snapshots.remove(id);
        }
        tracing::debug!(
            modified = event.modified.len(),
            deleted = event.deleted.len(),
            invalidated = event.invalidated.len(),
            "snapshot cache updated"
        );
    }

    pub fn clear(&self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // every id has one snapshot, so at most `capacity` of them are newer
    // than `latest - capacity`
    fn evict(&self, latest: u64) {
        let floor = latest.saturating_sub(self.capacity as u64);
        let before = self.snapshots.len();
        self.snapshots.retain(|_, s| s.version > floor);
        tracing::debug!(evicted = before - self.snapshots.len(), "snapshot cache eviction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: i64) -> ObjectId {
        ObjectId::of("Artist", "ARTIST_ID", n)
    }

    #[test]
    fn test_put_get_versions() {
        let store = DataRowStore::new(10);
        let first = store.put(id(1), DataRow::new().with("ARTIST_NAME", "a"));
        let second = store.put(id(1), DataRow::new().with("ARTIST_NAME", "b"));
        assert!(second.version > first.version);
        assert_eq!(store.get(&id(1)).unwrap().row.get("ARTIST_NAME").as_str(), Some("b"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = DataRowStore::new(3);
        for n in 0..5 {
            store.put(id(n), DataRow::new());
        }
        assert!(store.len() <= 3);
        assert!(store.contains(&id(4)));
        assert!(!store.contains(&id(0)));
    }

    #[test]
    fn test_process_event() {
        let store = DataRowStore::new(10);
        store.put(id(1), DataRow::new());
        store.put(id(2), DataRow::new());
        store.process(&SnapshotEvent {
            source: None,
            modified: vec![(id(3), DataRow::new().with("ARTIST_NAME", "c"))],
            deleted: vec![id(1)],
            invalidated: vec![id(2)],
            replaced: Vec::new(),
        });
        assert!(store.contains(&id(3)));
        assert!(!store.contains(&id(1)));
        assert!(!store.contains(&id(2)));
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(DataRowStore::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for n in 0..100 {
                        store.put(id(t * 100 + n), DataRow::new());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 400);
    }
}
