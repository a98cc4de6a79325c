//! 커밋과 롤백
//!
//! 커밋은 세 단계로 진행됩니다.
//!
//! 1. 변경분 수집: NEW/MODIFIED/DELETED 객체와 링크 변경으로 [`ChangeSet`] 생성
//! 2. 검증: 필수 값, 최대 길이, 필수 to-one 관계
//! 3. 부모 채널에 전달, 성공하면 임시 ID 교체 후 모두 COMMITTED 로 전환
//!
//! 컨텍스트는 그 자체로 [`DataChannel`]이기도 해서, 자식 컨텍스트의 변경분을
//! 받아 자신의 그래프에 반영할 수 있습니다.

use super::graph::{ContextState, Entry, row_object_id};
use super::{
    ChangeSet, CommitMode, CommitResult, DataChannel, DiffOperation, LinkDiff, ObjectContext,
    ObjectDiff, ObjectId, PersistenceState,
};
use crate::access::{DataRowStore, Transaction};
use crate::error::{CayxError, CayxResult};
use crate::event::{CallbackRegistry, Event, EventManager, LifecycleEvent};
use crate::map::EntityResolver;
use crate::query::SelectQuery;
use crate::row::DataRow;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

impl ObjectContext {
    // ════════════════════════════════════════════
    // Commit
    // ════════════════════════════════════════════

    /// Saves every change to the database in one transaction.
    pub fn commit_changes(&self) -> CayxResult<()> {
        self.commit_with(CommitMode::Cascade, None).map(|_| ())
    }

    /// Saves every change inside a caller-owned transaction. The caller
    /// commits or rolls back `tx`.
    pub fn commit_changes_in(&self, tx: &mut Transaction) -> CayxResult<()> {
        self.commit_with(CommitMode::Cascade, Some(tx)).map(|_| ())
    }

    /// Pushes changes to the parent context only.
    pub fn commit_changes_to_parent(&self) -> CayxResult<()> {
        self.commit_with(CommitMode::ToParent, None).map(|_| ())
    }

    #[instrument(skip_all, fields(context = self.id, mode = ?mode))]
    fn commit_with(&self, mode: CommitMode, tx: Option<&mut Transaction>) -> CayxResult<CommitResult> {
        self.drain_events()?;
        let modified: Vec<u64> = {
            let g = self.graph.lock();
            g.entries()
                .filter(|(_, e)| e.state == PersistenceState::Modified)
                .map(|(s, _)| s)
                .collect()
        };
        self.fire(LifecycleEvent::PreUpdate, &modified);

        let (changes, slots) = self.collect_changes()?;
        if changes.is_empty() {
            // MODIFIED objects whose values went back to the committed ones
            let mut g = self.graph.lock();
            for slot in slots {
                g.entry_mut(slot)?.state = PersistenceState::Committed;
            }
            tracing::debug!("nothing to commit");
            return Ok(CommitResult::default());
        }
        if self.options.validate_on_commit {
            validate(&self.resolver, &changes)?;
        }

        let result = self.channel.commit_changes(&changes, mode, tx)?;
        self.apply_commit(&changes, &slots, &result, mode)?;
        tracing::info!(
            inserted = changes.count(DiffOperation::Insert),
            updated = changes.count(DiffOperation::Update),
            deleted = changes.count(DiffOperation::Delete),
            links = changes.links.len(),
            "changes committed"
        );
        Ok(result)
    }

    /// Builds the change set. The returned slots line up with
    /// `changes.objects`, followed by MODIFIED objects without a real change.
    fn collect_changes(&self) -> CayxResult<(ChangeSet, Vec<u64>)> {
        let g = self.graph.lock();
        let mut changes = ChangeSet::new(self.id);
        let mut slots = Vec::new();
        let mut unchanged = Vec::new();

        for (slot, e) in g.entries() {
            let diff = match e.state {
                PersistenceState::New => Some(self.insert_diff(&g, slot, e)?),
                PersistenceState::Modified => self.update_diff(&g, slot, e)?,
                PersistenceState::Deleted => Some(ObjectDiff {
                    id: e.id.clone(),
                    entity: e.entity.clone(),
                    operation: DiffOperation::Delete,
                    attributes: e.committed.attributes.clone(),
                    to_one: e.committed.to_one.clone(),
                    committed_attributes: e.committed.attributes.clone(),
                    committed_to_one: e.committed.to_one.clone(),
                }),
                _ => continue,
            };
            match diff {
                Some(diff) => {
                    changes.objects.push(diff);
                    slots.push(slot);
                }
                None => unchanged.push(slot),
            }
        }

        for link in &g.links {
            let (Some(source), Some(target)) = (g.try_entry(link.source), g.try_entry(link.target)) else {
                continue;
            };
            changes.links.push(LinkDiff {
                source: source.id.clone(),
                source_entity: source.entity.clone(),
                relationship: link.relationship.clone(),
                target: target.id.clone(),
                insert: link.insert,
            });
        }
        slots.extend(unchanged);
        Ok((changes, slots))
    }

    fn insert_diff(&self, g: &ContextState, slot: u64, e: &Entry) -> CayxResult<ObjectDiff> {
        let mut attributes = BTreeMap::new();
        for attr in self.resolver.attributes(&e.entity)? {
            if !attr.is_flattened() {
                attributes.insert(
                    attr.name.clone(),
                    e.attributes.get(&attr.name).cloned().unwrap_or_default(),
                );
            }
        }
        let to_one = self
            .master_relationships(&e.entity)?
            .into_iter()
            .map(|rel| {
                let target = g.current_to_one_id(slot, &rel);
                (rel, target)
            })
            .collect();
        Ok(ObjectDiff {
            id: e.id.clone(),
            entity: e.entity.clone(),
            operation: DiffOperation::Insert,
            attributes,
            to_one,
            committed_attributes: BTreeMap::new(),
            committed_to_one: BTreeMap::new(),
        })
    }

    fn update_diff(&self, g: &ContextState, slot: u64, e: &Entry) -> CayxResult<Option<ObjectDiff>> {
        let mut attributes = BTreeMap::new();
        for attr in self.resolver.attributes(&e.entity)? {
            if attr.is_flattened() {
                continue;
            }
            let current = e.attributes.get(&attr.name).cloned().unwrap_or_default();
            let committed = e.committed.attributes.get(&attr.name).cloned().unwrap_or_default();
            if current != committed {
                attributes.insert(attr.name.clone(), current);
            }
        }
        let mut to_one = BTreeMap::new();
        for rel in self.master_relationships(&e.entity)? {
            let current = g.current_to_one_id(slot, &rel);
            if e.committed.to_one.get(&rel).cloned().flatten() != current {
                to_one.insert(rel, current);
            }
        }
        if attributes.is_empty() && to_one.is_empty() {
            return Ok(None);
        }
        Ok(Some(ObjectDiff {
            id: e.id.clone(),
            entity: e.entity.clone(),
            operation: DiffOperation::Update,
            attributes,
            to_one,
            committed_attributes: e.committed.attributes.clone(),
            committed_to_one: e.committed.to_one.clone(),
        }))
    }

    fn master_relationships(&self, entity: &str) -> CayxResult<Vec<String>> {
        Ok(self
            .resolver
            .db_entity_for(entity)?
            .relationships
            .iter()
            .filter(|r| r.is_to_master())
            .map(|r| r.name.clone())
            .collect())
    }

    /// Brings the graph in line with a successful commit.
    fn apply_commit(
        &self,
        changes: &ChangeSet,
        slots: &[u64],
        result: &CommitResult,
        mode: CommitMode,
    ) -> CayxResult<()> {
        let mut inserted = Vec::new();
        let mut updated = Vec::new();
        let mut deleted = Vec::new();
        {
            let mut g = self.graph.lock();
            if mode == CommitMode::Cascade {
                for (diff, &slot) in changes.objects.iter().zip(slots) {
                    if let Some(permanent) = result.id_map.get(&diff.id) {
                        g.replace_id(slot, permanent.clone())?;
                    }
                }
            }
            for (i, &slot) in slots.iter().enumerate() {
                match changes.objects.get(i).map(|d| d.operation) {
                    Some(DiffOperation::Delete) => {
                        deleted.push(slot);
                        continue;
                    }
                    Some(DiffOperation::Insert) => inserted.push(slot),
                    Some(DiffOperation::Update) => updated.push(slot),
                    None => {}
                }
                self.mark_committed(&mut g, slot, result)?;
            }
            g.links.clear();
        }
        self.local_cache.clear();

        self.fire(LifecycleEvent::PostRemove, &deleted);
        {
            let mut g = self.graph.lock();
            for slot in deleted {
                g.forget(slot);
            }
        }
        self.fire(LifecycleEvent::PostPersist, &inserted);
        self.fire(LifecycleEvent::PostUpdate, &updated);
        Ok(())
    }

    fn mark_committed(&self, g: &mut ContextState, slot: u64, result: &CommitResult) -> CayxResult<()> {
        let entity = g.entry(slot)?.entity.clone();
        let masters = self.master_relationships(&entity)?;
        let to_one: BTreeMap<String, Option<ObjectId>> = masters
            .iter()
            .map(|rel| (rel.clone(), g.current_to_one_id(slot, rel)))
            .collect();
        let id = g.entry(slot)?.id.clone();
        let row = match result.snapshots.get(&id) {
            Some(row) => row.clone(),
            None => g.current_row(&self.resolver, slot)?,
        };
        let e = g.entry_mut(slot)?;
        e.committed.attributes = e.attributes.clone();
        e.committed.to_one = to_one;
        e.committed.row = row;
        e.to_one.retain(|name, _| !masters.contains(name));
        e.state = PersistenceState::Committed;
        Ok(())
    }

    // ════════════════════════════════════════════
    // Rollback
    // ════════════════════════════════════════════

    /// Reverts this context's uncommitted changes without touching the parent.
    pub fn rollback_changes_locally(&self) {
        let reverted = {
            let mut g = self.graph.lock();
            let dirty = g.entries().filter(|(_, e)| e.state.is_dirty()).count();
            g.revert();
            dirty
        };
        self.local_cache.clear();
        tracing::debug!(context = self.id, reverted, "changes rolled back");
        self.channel
            .event_manager()
            .post(Event::ContextRolledBack { context: self.id });
    }

    /// Reverts this context and every parent context up to the root.
    pub fn rollback_changes(&self) -> CayxResult<()> {
        self.rollback_changes_locally();
        self.channel.rollback_changes()
    }

    // ════════════════════════════════════════════
    // Parent role
    // ════════════════════════════════════════════

    /// Registers a child's changes in this context's graph.
    fn apply_child_changes(&self, changes: &ChangeSet) -> CayxResult<()> {
        // objects the child changed must be loaded here before they are touched
        let mut to_fault = Vec::new();
        {
            let mut g = self.graph.lock();
            for diff in &changes.objects {
                if diff.operation == DiffOperation::Insert {
                    let slot = g.find_or_hollow(&diff.id, &diff.entity);
                    self.init_new(&mut g, slot, &diff.entity)?;
                } else {
                    to_fault.push(g.find_or_hollow(&diff.id, &diff.entity));
                }
            }
        }
        for slot in to_fault {
            self.resolve_fault(slot)?;
        }

        let mut g = self.graph.lock();
        for diff in &changes.objects {
            let Some(slot) = g.slot_of(&diff.id) else { continue };
            match diff.operation {
                DiffOperation::Delete => {
                    if g.state(slot) == PersistenceState::New {
                        g.forget(slot);
                    } else {
                        g.entry_mut(slot)?.state = PersistenceState::Deleted;
                    }
                    continue;
                }
                DiffOperation::Insert | DiffOperation::Update => {}
            }
            let mut changed = false;
            {
                let e = g.entry_mut(slot)?;
                for (name, value) in &diff.attributes {
                    changed |= e.attributes.get(name) != Some(value);
                    e.attributes.insert(name.clone(), value.clone());
                }
            }
            if changed {
                g.mark_modified(slot);
            }
            for (rel, target) in &diff.to_one {
                let target = target.as_ref().map(|id| g.find_or_hollow(id, id.entity_name()));
                g.set_to_one(&self.resolver, slot, rel, target)?;
            }
        }
        for link in &changes.links {
            let source = g.find_or_hollow(&link.source, &link.source_entity);
            let target = g.find_or_hollow(&link.target, link.target.entity_name());
            if link.insert {
                g.add_to_many(&self.resolver, source, &link.relationship, target)?;
            } else {
                g.remove_from_many(&self.resolver, source, &link.relationship, target)?;
            }
        }
        Ok(())
    }

    fn init_new(&self, g: &mut ContextState, slot: u64, entity: &str) -> CayxResult<()> {
        let mut lists = Vec::new();
        for rel in self.resolver.relationships(entity)? {
            if self.resolver.is_to_many(entity, &rel.name)? {
                lists.push(rel.name.clone());
            }
        }
        let e = g.entry_mut(slot)?;
        if e.state != PersistenceState::Hollow {
            return Ok(());
        }
        e.state = PersistenceState::New;
        e.entity = entity.to_string();
        for name in lists {
            e.to_many.entry(name).or_default();
        }
        Ok(())
    }

    /// Data-row query results with this context's uncommitted changes applied.
    fn overlay_rows(&self, query: &SelectQuery, rows: Vec<DataRow>) -> CayxResult<Vec<DataRow>> {
        if query.fetching_data_rows || query.is_column_query() {
            return Ok(rows);
        }
        let g = self.graph.lock();
        let mut out = Vec::with_capacity(rows.len());
        for mut row in rows {
            let entity = self.resolver.entity_for_row(&query.root, &row)?.name.clone();
            let slot = row_object_id(&self.resolver, &entity, &row)?.and_then(|id| g.slot_of(&id));
            match slot.map(|s| (s, g.state(s))) {
                Some((_, PersistenceState::Deleted)) => continue,
                Some((s, PersistenceState::Modified | PersistenceState::New)) => {
                    for (col, v) in g.current_row(&self.resolver, s)?.iter() {
                        row.insert(col.clone(), v.clone());
                    }
                }
                _ => {}
            }
            out.push(row);
        }
        Ok(out)
    }
}

impl DataChannel for ObjectContext {
    fn entity_resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    fn event_manager(&self) -> &Arc<EventManager> {
        self.channel.event_manager()
    }

    fn callbacks(&self) -> &Arc<CallbackRegistry> {
        self.channel.callbacks()
    }

    fn snapshot_store(&self) -> &Arc<DataRowStore> {
        self.channel.snapshot_store()
    }

    fn select_rows(&self, query: &SelectQuery) -> CayxResult<Vec<DataRow>> {
        self.drain_events()?;
        let rows = self.channel.select_rows(query)?;
        self.overlay_rows(query, rows)
    }

    fn snapshot(&self, id: &ObjectId) -> CayxResult<Option<DataRow>> {
        self.drain_events()?;
        {
            let g = self.graph.lock();
            if let Some(slot) = g.slot_of(id) {
                match g.state(slot) {
                    PersistenceState::Deleted => return Ok(None),
                    PersistenceState::Hollow => {}
                    _ => return g.current_row(&self.resolver, slot).map(Some),
                }
            }
        }
        self.channel.snapshot(id)
    }

    fn commit_changes(
        &self,
        changes: &ChangeSet,
        mode: CommitMode,
        tx: Option<&mut Transaction>,
    ) -> CayxResult<CommitResult> {
        let backup = self.graph.lock().clone();
        let outcome = self.apply_child_changes(changes).and_then(|()| match mode {
            CommitMode::ToParent => Ok(CommitResult::default()),
            CommitMode::Cascade => self.commit_with(CommitMode::Cascade, tx),
        });
        if outcome.is_err() {
            *self.graph.lock() = backup;
        }
        tracing::debug!(
            context = self.id,
            child = changes.context,
            objects = changes.objects.len(),
            ok = outcome.is_ok(),
            "child changes received"
        );
        outcome
    }

    fn rollback_changes(&self) -> CayxResult<()> {
        ObjectContext::rollback_changes(self)
    }
}

// ════════════════════════════════════════════
// Validation
// ════════════════════════════════════════════

/// Checks mandatory columns, lengths and mandatory to-one relationships of
/// inserted and updated objects.
fn validate(resolver: &EntityResolver, changes: &ChangeSet) -> CayxResult<()> {
    let mut failures = Vec::new();
    for diff in &changes.objects {
        let insert = match diff.operation {
            DiffOperation::Insert => true,
            DiffOperation::Update => false,
            DiffOperation::Delete => continue,
        };
        let db = resolver.db_entity_for(&diff.entity)?;
        for attr in resolver.attributes(&diff.entity)? {
            if attr.is_flattened() || !(insert || diff.attributes.contains_key(&attr.name)) {
                continue;
            }
            let Some(column) = db.attribute(&attr.db_attribute_path) else {
                continue;
            };
            let value = diff.attributes.get(&attr.name).unwrap_or(&Value::Null);
            if value.is_null() {
                let assigned = column.primary_key || column.generated || db.is_propagated_pk(&column.name);
                if column.mandatory && !assigned {
                    failures.push(format!("{}.{} is required", diff.entity, attr.name));
                }
                continue;
            }
            if let (Some(max), Some(text)) = (column.max_length, value.as_str()) {
                if text.chars().count() > max as usize {
                    failures.push(format!(
                        "{}.{} is longer than {max} characters",
                        diff.entity, attr.name
                    ));
                }
            }
        }
        for rel in db.relationships.iter().filter(|r| r.is_to_master()) {
            if !(insert || diff.to_one.contains_key(&rel.name)) {
                continue;
            }
            let required = rel.joins.iter().any(|j| {
                db.attribute(&j.source)
                    .is_some_and(|a| a.mandatory && !a.primary_key)
            });
            if required && diff.to_one.get(&rel.name).cloned().flatten().is_none() {
                let name = resolver
                    .relationships(&diff.entity)?
                    .into_iter()
                    .find(|r| r.db_relationship_path == rel.name)
                    .map_or_else(|| rel.name.clone(), |r| r.name.clone());
                failures.push(format!("{}.{name} is required", diff.entity));
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        tracing::debug!(failures = failures.len(), "validation failed");
        Err(CayxError::Validation(failures))
    }
}
