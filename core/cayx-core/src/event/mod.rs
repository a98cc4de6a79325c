//! 이벤트 — 주제별 리스너 등록과 동기 전달
//!
//! - [`EventManager`]: 이벤트 주제 → 콜백 목록. 스냅샷 변경 같은 런타임 알림을 전달합니다.
//! - [`CallbackRegistry`]: 엔티티별 생명주기 콜백 (`PrePersist`, `PostLoad`, ...)

pub mod callbacks;

pub use callbacks::{CallbackRegistry, LifecycleCallback, LifecycleEvent};

use crate::access::SnapshotEvent;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// 이벤트 주제
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSubject {
    /// Shared snapshot cache changed by a commit
    SnapshotChanged,
    /// A context committed to the database
    ContextCommitted,
    /// A context rolled back its changes
    ContextRolledBack,
}

/// 이벤트
#[derive(Debug, Clone)]
pub enum Event {
    SnapshotChanged(Arc<SnapshotEvent>),
    ContextCommitted { context: u64 },
    ContextRolledBack { context: u64 },
}

impl Event {
    pub fn subject(&self) -> EventSubject {
        match self {
            Event::SnapshotChanged(_) => EventSubject::SnapshotChanged,
            Event::ContextCommitted { .. } => EventSubject::ContextCommitted,
            Event::ContextRolledBack { .. } => EventSubject::ContextRolledBack,
        }
    }
}

/// Handle returned by [`EventManager::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// 이벤트 관리자
///
/// 전달은 호출 스레드에서 동기적으로 이루어집니다. 리스너는 전달 전에 복사되므로
/// 리스너 안에서 등록/해제해도 교착되지 않습니다.
#[derive(Default)]
pub struct EventManager {
    listeners: DashMap<EventSubject, Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(
        &self,
        subject: EventSubject,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(subject)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns whether the listener was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut removed = false;
        for mut entry in self.listeners.iter_mut() {
            let before = entry.len();
            entry.retain(|(l, _)| *l != id);
            removed |= entry.len() != before;
        }
        removed
    }

    pub fn post(&self, event: Event) {
        let listeners: Vec<Listener> = match self.listeners.get(&event.subject()) {
            Some(entry) => entry.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };
        tracing::trace!(subject = ?event.subject(), listeners = listeners.len(), "posting event");
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self, subject: EventSubject) -> usize {
        self.listeners.get(&subject).map_or(0, |e| e.len())
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("subjects", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_post_reaches_subject_listeners_only() {
        let manager = EventManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        manager.add_listener(EventSubject::ContextCommitted, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        manager.post(Event::ContextCommitted { context: 1 });
        manager.post(Event::ContextRolledBack { context: 1 });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_listener() {
        let manager = EventManager::new();
        let id = manager.add_listener(EventSubject::SnapshotChanged, |_| {});
        assert_eq!(manager.listener_count(EventSubject::SnapshotChanged), 1);
        assert!(manager.remove_listener(id));
        assert!(!manager.remove_listener(id));
        assert_eq!(manager.listener_count(EventSubject::SnapshotChanged), 0);
    }

    #[test]
    fn test_listener_may_register_during_post() {
        let manager = Arc::new(EventManager::new());
        let m = Arc::clone(&manager);
        manager.add_listener(EventSubject::ContextCommitted, move |_| {
            m.add_listener(EventSubject::ContextCommitted, |_| {});
        });
        manager.post(Event::ContextCommitted { context: 1 });
        assert_eq!(manager.listener_count(EventSubject::ContextCommitted), 2);
    }
}
