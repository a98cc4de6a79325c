//! ObjectContext — 작업 단위 (unit of work)
//!
//! 컨텍스트는 자신이 등록한 객체의 상태를 추적하고, 커밋 시 변경분을
//! [`ChangeSet`]으로 만들어 부모 [`DataChannel`]에 넘깁니다.
//!
//! ## 모듈 구성
//!
//! - `graph`: 객체 그래프와 관계 양방향 유지 (I/O 없음)
//! - `faults`: hollow 객체와 관계 fault 해결, 관계 읽기/쓰기
//! - `query`: 조회 결과를 객체로 등록, 프리페치
//! - `delete`: 삭제 규칙 (Deny / Cascade / Nullify)
//! - `commit`: 변경분 수집, 검증, 커밋/롤백, 부모 역할
//!
//! 객체는 [`ObjRef`] 핸들로 다룹니다. 핸들은 만든 컨텍스트 안에서만 유효하며,
//! 다른 컨텍스트의 핸들을 넘기면 [`CayxError::CrossContext`] 입니다.

mod channel;
mod commit;
mod delete;
mod faults;
pub(crate) mod graph;
mod object_id;
mod query;
mod state;

pub use channel::{
    ChangeSet, CommitMode, CommitResult, DataChannel, DiffOperation, LinkDiff, ObjectDiff,
};
pub use object_id::{IdKey, ObjectId};
pub use state::PersistenceState;

use crate::access::SnapshotEvent;
use crate::error::{CayxError, CayxResult};
use crate::event::{Event, EventSubject, LifecycleEvent, ListenerId};
use crate::map::EntityResolver;
use crate::query::QueryCache;
use crate::value::Value;
use graph::{ContextState, Entry};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static CONTEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Default capacity of a context's local query cache.
pub const DEFAULT_LOCAL_CACHE_SIZE: usize = 100;

/// 컨텍스트에 등록된 객체의 핸들
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    context: u64,
    slot: u64,
}

impl ObjRef {
    /// Context the object is registered in.
    pub fn context_id(&self) -> u64 {
        self.context
    }
}

/// 컨텍스트 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    pub local_cache_size: usize,
    /// Check mandatory values and lengths before committing
    pub validate_on_commit: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            local_cache_size: DEFAULT_LOCAL_CACHE_SIZE,
            validate_on_commit: true,
        }
    }
}

/// 작업 단위
///
/// 모든 메서드는 `&self`를 받습니다. 내부 상태는 뮤텍스 하나로 보호되며,
/// 조회나 생명주기 콜백이 실행되는 동안에는 락을 잡지 않습니다.
pub struct ObjectContext {
    id: u64,
    channel: Arc<dyn DataChannel>,
    resolver: Arc<EntityResolver>,
    graph: Mutex<ContextState>,
    /// Snapshot changes of other contexts, applied at the start of the next operation
    inbox: Arc<Mutex<Vec<Arc<SnapshotEvent>>>>,
    listener: ListenerId,
    local_cache: QueryCache,
    options: ContextOptions,
}

impl ObjectContext {
    pub fn new(channel: Arc<dyn DataChannel>) -> Arc<Self> {
        Self::with_options(channel, ContextOptions::default())
    }

    pub fn with_options(channel: Arc<dyn DataChannel>, options: ContextOptions) -> Arc<Self> {
        let id = CONTEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        let inbox: Arc<Mutex<Vec<Arc<SnapshotEvent>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::downgrade(&inbox);
        let listener = channel
            .event_manager()
            .add_listener(EventSubject::SnapshotChanged, move |event| {
                if let (Event::SnapshotChanged(e), Some(inbox)) = (event, sink.upgrade()) {
                    if e.source != Some(id) {
                        inbox.lock().push(Arc::clone(e));
                    }
                }
            });
        tracing::debug!(context = id, "object context created");
        Arc::new(Self {
            id,
            resolver: Arc::clone(channel.entity_resolver()),
            channel,
            graph: Mutex::new(ContextState::default()),
            inbox,
            listener,
            local_cache: QueryCache::new(options.local_cache_size),
            options,
        })
    }

    /// Child context whose commits go to this context first.
    pub fn create_child_context(self: &Arc<Self>) -> Arc<ObjectContext> {
        let parent: Arc<dyn DataChannel> = Arc::clone(self) as Arc<dyn DataChannel>;
        Self::with_options(parent, self.options)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &Arc<dyn DataChannel> {
        &self.channel
    }

    pub fn entity_resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    pub fn local_cache(&self) -> &QueryCache {
        &self.local_cache
    }

    // ════════════════════════════════════════════
    // Registration
    // ════════════════════════════════════════════

    /// Registers a new object of `entity`; it is inserted on the next commit.
    pub fn new_object(&self, entity: &str) -> CayxResult<ObjRef> {
        self.drain_events()?;
        let db = self.resolver.db_entity_for(entity)?;
        if !db.has_primary_key() {
            return Err(CayxError::Configuration(format!(
                "ObjEntity '{entity}' maps to table '{}' without a primary key",
                db.name
            )));
        }
        let mut entry = Entry::new_object(
            ObjectId::temporary(graph::root_entity(&self.resolver, entity)?),
            entity,
        );
        for rel in self.resolver.relationships(entity)? {
            if self.resolver.is_to_many(entity, &rel.name)? {
                entry.to_many.insert(rel.name.clone(), Vec::new());
            }
        }
        let slot = self.graph.lock().register(entry);
        tracing::trace!(context = self.id, entity, "new object");
        self.fire(LifecycleEvent::PrePersist, &[slot]);
        Ok(self.obj(slot))
    }

    /// Object with the given id, registered hollow if this context doesn't know it yet.
    pub fn object_for_id(&self, id: &ObjectId) -> CayxResult<ObjRef> {
        self.drain_events()?;
        self.resolver.obj_entity(id.entity_name())?;
        let slot = self.graph.lock().find_or_hollow(id, id.entity_name());
        Ok(self.obj(slot))
    }

    /// Copies of objects registered in another context sharing this
    /// context's snapshot cache. Objects with uncommitted changes are rejected.
    pub fn local_objects(&self, source: &ObjectContext, objects: &[ObjRef]) -> CayxResult<Vec<ObjRef>> {
        if !Arc::ptr_eq(self.channel.snapshot_store(), source.channel.snapshot_store()) {
            return Err(CayxError::CrossContext(
                "contexts don't share a snapshot cache".to_string(),
            ));
        }
        let mut found = Vec::with_capacity(objects.len());
        {
            let g = source.graph.lock();
            for obj in objects {
                let slot = source.slot(*obj)?;
                let e = g.entry(slot)?;
                if e.state.is_dirty() {
                    return Err(CayxError::invalid(
                        format!("{} has uncommitted changes ({})", e.id, e.state),
                        "local_objects",
                    ));
                }
                found.push((e.id.clone(), e.entity.clone()));
            }
        }
        self.drain_events()?;
        let mut g = self.graph.lock();
        Ok(found
            .iter()
            .map(|(id, entity)| self.obj(g.find_or_hollow(id, entity)))
            .collect())
    }

    // ════════════════════════════════════════════
    // State
    // ════════════════════════════════════════════

    pub fn state(&self, obj: ObjRef) -> PersistenceState {
        match self.slot(obj) {
            Ok(slot) => self.graph.lock().state(slot),
            Err(_) => PersistenceState::Transient,
        }
    }

    pub fn object_id(&self, obj: ObjRef) -> Option<ObjectId> {
        let slot = self.slot(obj).ok()?;
        self.graph.lock().try_entry(slot).map(|e| e.id.clone())
    }

    /// Concrete entity of a registered object.
    pub fn entity_name(&self, obj: ObjRef) -> Option<String> {
        let slot = self.slot(obj).ok()?;
        self.graph.lock().try_entry(slot).map(|e| e.entity.clone())
    }

    pub fn registered_objects(&self) -> Vec<ObjRef> {
        self.select_slots(|_| true)
    }

    pub fn new_objects(&self) -> Vec<ObjRef> {
        self.select_slots(|s| s == PersistenceState::New)
    }

    pub fn modified_objects(&self) -> Vec<ObjRef> {
        self.select_slots(|s| s == PersistenceState::Modified)
    }

    pub fn deleted_objects(&self) -> Vec<ObjRef> {
        self.select_slots(|s| s == PersistenceState::Deleted)
    }

    pub fn uncommitted_objects(&self) -> Vec<ObjRef> {
        self.select_slots(PersistenceState::is_dirty)
    }

    /// Whether the next commit has anything to do.
    pub fn has_changes(&self) -> bool {
        let g = self.graph.lock();
        !g.links.is_empty() || g.entries().any(|(_, e)| e.state.is_dirty())
    }

    fn select_slots(&self, filter: impl Fn(PersistenceState) -> bool) -> Vec<ObjRef> {
        self.graph
            .lock()
            .entries()
            .filter(|(_, e)| filter(e.state))
            .map(|(slot, _)| self.obj(slot))
            .collect()
    }

    // ════════════════════════════════════════════
    // Attributes
    // ════════════════════════════════════════════

    /// Value of an attribute, resolving a hollow object first.
    pub fn read_property(&self, obj: ObjRef, name: &str) -> CayxResult<Value> {
        self.drain_events()?;
        let slot = self.slot(obj)?;
        self.resolve_fault(slot)?;
        let g = self.graph.lock();
        let e = g.entry(slot)?;
        self.resolver.require_attribute(&e.entity, name)?;
        Ok(e.attributes.get(name).cloned().unwrap_or_default())
    }

    pub fn write_property(&self, obj: ObjRef, name: &str, value: impl Into<Value>) -> CayxResult<()> {
        self.drain_events()?;
        let slot = self.slot(obj)?;
        self.resolve_fault(slot)?;
        let value = value.into();
        let mut g = self.graph.lock();
        let e = g.entry_mut(slot)?;
        if e.state == PersistenceState::Deleted {
            return Err(CayxError::invalid(
                format!("can't modify deleted object {}", e.id),
                name.to_string(),
            ));
        }
        let attr = self.resolver.require_attribute(&e.entity, name)?;
        if attr.is_flattened() {
            return Err(CayxError::invalid(
                format!("attribute {}.{name} is read through a relationship", e.entity),
                attr.db_attribute_path.clone(),
            ));
        }
        let changed = e.attributes.get(name) != Some(&value);
        e.attributes.insert(name.to_string(), value);
        if changed {
            g.mark_modified(slot);
        }
        Ok(())
    }

    /// Turns committed objects back into hollow ones; the next access refetches them.
    pub fn invalidate_objects(&self, objects: &[ObjRef]) -> CayxResult<()> {
        let mut g = self.graph.lock();
        for obj in objects {
            let slot = self.slot(*obj)?;
            let e = g.entry_mut(slot)?;
            if matches!(e.state, PersistenceState::Committed | PersistenceState::Modified) {
                e.state = PersistenceState::Hollow;
                e.attributes.clear();
                e.to_one.clear();
                e.to_many.clear();
                self.channel.snapshot_store().remove(&e.id);
            }
        }
        Ok(())
    }

    // ════════════════════════════════════════════
    // Internals
    // ════════════════════════════════════════════

    pub(crate) fn slot(&self, obj: ObjRef) -> CayxResult<u64> {
        if obj.context != self.id {
            return Err(CayxError::CrossContext(format!(
                "object of context {} used in context {}",
                obj.context, self.id
            )));
        }
        Ok(obj.slot)
    }

    pub(crate) fn obj(&self, slot: u64) -> ObjRef {
        ObjRef {
            context: self.id,
            slot,
        }
    }

    /// Runs the lifecycle callbacks of each object's entity hierarchy.
    pub(crate) fn fire(&self, event: LifecycleEvent, slots: &[u64]) {
        let registry = self.channel.callbacks();
        if slots.is_empty() || registry.is_empty() {
            return;
        }
        for &slot in slots {
            let Some(entity) = self.graph.lock().try_entry(slot).map(|e| e.entity.clone()) else {
                continue;
            };
            let Ok(hierarchy) = self.resolver.hierarchy(&entity) else {
                continue;
            };
            for callback in registry.callbacks_for(event, hierarchy.iter().map(|e| e.name.as_str())) {
                callback(self, self.obj(slot));
            }
        }
    }

    /// Applies snapshot changes committed by other contexts.
    pub(crate) fn drain_events(&self) -> CayxResult<()> {
        let events = std::mem::take(&mut *self.inbox.lock());
        if events.is_empty() {
            return Ok(());
        }
        let mut refreshed = Vec::new();
        {
            let mut g = self.graph.lock();
            for event in &events {
                for (old, new) in &event.replaced {
                    if let Some(slot) = g.slot_of(old) {
                        g.replace_id(slot, new.clone())?;
                    }
                }
                for (id, row) in &event.modified {
                    let Some(slot) = g.slot_of(id) else { continue };
                    if g.state(slot) == PersistenceState::Committed {
                        let entity = g.entry(slot)?.entity.clone();
                        g.load_row(&self.resolver, slot, &entity, row)?;
                        refreshed.push(slot);
                    }
                }
                for id in &event.deleted {
                    let Some(slot) = g.slot_of(id) else { continue };
                    match g.state(slot) {
                        PersistenceState::Modified => g.entry_mut(slot)?.state = PersistenceState::New,
                        PersistenceState::New => {}
                        _ => {
                            g.forget(slot);
                        }
                    }
                }
                for id in &event.invalidated {
                    let Some(slot) = g.slot_of(id) else { continue };
                    let e = g.entry_mut(slot)?;
                    if e.state == PersistenceState::Committed {
                        e.state = PersistenceState::Hollow;
                    }
                }
            }
        }
        tracing::debug!(context = self.id, events = events.len(), refreshed = refreshed.len(), "merged snapshot events");
        self.fire(LifecycleEvent::PostLoad, &refreshed);
        Ok(())
    }
}

impl Drop for ObjectContext {
    fn drop(&mut self) {
        self.channel.event_manager().remove_listener(self.listener);
    }
}

impl std::fmt::Debug for ObjectContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectContext")
            .field("id", &self.id)
            .field("registered", &self.graph.lock().len())
            .finish()
    }
}
