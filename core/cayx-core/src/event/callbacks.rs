//! 엔티티 생명주기 콜백

use crate::context::{ObjRef, ObjectContext};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// 생명주기 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// `new_object` registered the object
    PrePersist,
    /// Its INSERT was committed
    PostPersist,
    /// About to be committed with changes
    PreUpdate,
    PostUpdate,
    /// `delete_object` scheduled it for deletion
    PreRemove,
    PostRemove,
    /// Fetched or refreshed from the database
    PostLoad,
}

pub type LifecycleCallback = Arc<dyn Fn(&ObjectContext, ObjRef) + Send + Sync>;

/// 엔티티별 콜백 목록
///
/// 콜백은 컨텍스트 락 밖에서 호출되므로 객체 속성을 읽고 쓸 수 있습니다.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: RwLock<HashMap<(LifecycleEvent, String), Vec<LifecycleCallback>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for an entity and all of its sub-entities.
    pub fn add(
        &self,
        event: LifecycleEvent,
        entity: impl Into<String>,
        callback: impl Fn(&ObjectContext, ObjRef) + Send + Sync + 'static,
    ) {
        self.callbacks
            .write()
            .entry((event, entity.into()))
            .or_default()
            .push(Arc::new(callback));
    }

    /// Callbacks for an event on an entity hierarchy (most specific first).
    pub fn callbacks_for<'a>(
        &self,
        event: LifecycleEvent,
        hierarchy: impl IntoIterator<Item = &'a str>,
    ) -> Vec<LifecycleCallback> {
        let map = self.callbacks.read();
        if map.is_empty() {
            return Vec::new();
        }
        hierarchy
            .into_iter()
            .filter_map(|entity| map.get(&(event, entity.to_string())))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }

    pub fn clear(&self) {
        self.callbacks.write().clear();
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered", &self.callbacks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_lookup() {
        let registry = CallbackRegistry::new();
        registry.add(LifecycleEvent::PrePersist, "Person", |_, _| {});
        registry.add(LifecycleEvent::PrePersist, "Manager", |_, _| {});
        registry.add(LifecycleEvent::PostLoad, "Person", |_, _| {});

        assert_eq!(
            registry
                .callbacks_for(LifecycleEvent::PrePersist, ["Manager", "Employee", "Person"])
                .len(),
            2
        );
        assert_eq!(registry.callbacks_for(LifecycleEvent::PrePersist, ["Artist"]).len(), 0);
        registry.clear();
        assert!(registry.is_empty());
    }
}
