//! 객체 그래프 상태 — 등록된 객체, 관계 양방향 유지, 링크 테이블 변경
//!
//! I/O가 없는 순수 상태입니다. 조회가 필요한 fault 해결은 호출자가 먼저
//! 끝내고, 여기서는 락을 잡은 채 메모리만 수정합니다.
//!
//! 관계는 DB 관계 단위로 추적합니다. to-one 값은 FK를 가진 쪽(to-master)에서
//! 커밋 스냅샷과 비교되고, to-many 목록은 로드된 경우에만 함께 갱신됩니다.

use crate::context::{ObjectId, PersistenceState};
use crate::error::{CayxError, CayxResult};
use crate::map::{DbRelationship, EntityResolver, ObjRelationship};
use crate::row::DataRow;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};

/// 마지막으로 커밋된 상태
#[derive(Debug, Clone, Default)]
pub(crate) struct Committed {
    pub attributes: BTreeMap<String, Value>,
    /// To-master DbRelationship → target
    pub to_one: BTreeMap<String, Option<ObjectId>>,
    /// Row the object was loaded from
    pub row: DataRow,
}

/// 등록된 객체 하나
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub id: ObjectId,
    /// Concrete ObjEntity
    pub entity: String,
    pub state: PersistenceState,
    pub attributes: BTreeMap<String, Value>,
    /// DbRelationship → slot, for relationships changed or loaded in memory
    pub to_one: HashMap<String, Option<u64>>,
    /// ObjRelationship → slots; a missing key is an unresolved fault
    pub to_many: HashMap<String, Vec<u64>>,
    pub committed: Committed,
}

impl Entry {
    pub fn new_object(id: ObjectId, entity: impl Into<String>) -> Self {
        Self::with_state(id, entity, PersistenceState::New)
    }

    pub fn hollow(id: ObjectId, entity: impl Into<String>) -> Self {
        Self::with_state(id, entity, PersistenceState::Hollow)
    }

    fn with_state(id: ObjectId, entity: impl Into<String>, state: PersistenceState) -> Self {
        Self {
            id,
            entity: entity.into(),
            state,
            attributes: BTreeMap::new(),
            to_one: HashMap::new(),
            to_many: HashMap::new(),
            committed: Committed::default(),
        }
    }
}

/// Pending change of a flattened relationship.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LinkOp {
    pub source: u64,
    /// Flattened ObjRelationship of the source entity
    pub relationship: String,
    pub target: u64,
    pub insert: bool,
}

/// 컨텍스트 하나의 객체 그래프
#[derive(Debug, Clone, Default)]
pub(crate) struct ContextState {
    entries: BTreeMap<u64, Entry>,
    by_id: HashMap<ObjectId, u64>,
    next_slot: u64,
    pub links: Vec<LinkOp>,
}

impl ContextState {
    pub fn register(&mut self, entry: Entry) -> u64 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.by_id.insert(entry.id.clone(), slot);
        self.entries.insert(slot, entry);
        slot
    }

    pub fn slot_of(&self, id: &ObjectId) -> Option<u64> {
        self.by_id.get(id).copied()
    }

    pub fn try_entry(&self, slot: u64) -> Option<&Entry> {
        self.entries.get(&slot)
    }

    pub fn entry(&self, slot: u64) -> CayxResult<&Entry> {
        self.entries.get(&slot).ok_or_else(|| unregistered(slot))
    }

    pub fn entry_mut(&mut self, slot: u64) -> CayxResult<&mut Entry> {
        self.entries.get_mut(&slot).ok_or_else(|| unregistered(slot))
    }

    /// Entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, &Entry)> {
        self.entries.iter().map(|(s, e)| (*s, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn state(&self, slot: u64) -> PersistenceState {
        self.entries
            .get(&slot)
            .map_or(PersistenceState::Transient, |e| e.state)
    }

    /// Slot of an id, registering a hollow object when it is unknown.
    pub fn find_or_hollow(&mut self, id: &ObjectId, entity: &str) -> u64 {
        match self.slot_of(id) {
            Some(slot) => slot,
            None => self.register(Entry::hollow(id.clone(), entity)),
        }
    }

    /// Unregisters an object and drops every in-memory reference to it.
    pub fn forget(&mut self, slot: u64) -> Option<Entry> {
        let entry = self.entries.remove(&slot)?;
        self.by_id.remove(&entry.id);
        for other in self.entries.values_mut() {
            for list in other.to_many.values_mut() {
                list.retain(|s| *s != slot);
            }
            for target in other.to_one.values_mut() {
                if *target == Some(slot) {
                    *target = None;
                }
            }
        }
        self.links.retain(|l| l.source != slot && l.target != slot);
        Some(entry)
    }

    pub fn replace_id(&mut self, slot: u64, id: ObjectId) -> CayxResult<()> {
        let entry = self.entries.get_mut(&slot).ok_or_else(|| unregistered(slot))?;
        self.by_id.remove(&entry.id);
        self.by_id.insert(id.clone(), slot);
        entry.id = id;
        Ok(())
    }

    pub fn mark_modified(&mut self, slot: u64) {
        if let Some(e) = self.entries.get_mut(&slot) {
            if e.state == PersistenceState::Committed {
                e.state = PersistenceState::Modified;
            }
        }
    }

    // ════════════════════════════════════════════
    // Loading
    // ════════════════════════════════════════════

    /// Fills an entry from a fetched row and marks it committed.
    pub fn load_row(
        &mut self,
        resolver: &EntityResolver,
        slot: u64,
        entity: &str,
        row: &DataRow,
    ) -> CayxResult<()> {
        let attributes = attributes_from_row(resolver, entity, row)?;
        let to_one = fk_ids_from_row(resolver, entity, row)?;
        let masters: Vec<String> = resolver
            .db_entity_for(entity)?
            .relationships
            .iter()
            .filter(|r| r.is_to_master())
            .map(|r| r.name.clone())
            .collect();

        let e = self.entry_mut(slot)?;
        e.entity = entity.to_string();
        e.attributes = attributes.clone();
        e.committed = Committed {
            attributes,
            to_one,
            row: row.clone(),
        };
        e.state = PersistenceState::Committed;
        e.to_one.retain(|name, _| !masters.contains(name));
        Ok(())
    }

    /// Current values of an object as a row of its table.
    pub fn current_row(&self, resolver: &EntityResolver, slot: u64) -> CayxResult<DataRow> {
        let e = self.entry(slot)?;
        let mut row = e.committed.row.clone();
        for (col, v) in e.id.to_row().iter() {
            row.insert(col.clone(), v.clone());
        }
        for attr in resolver.attributes(&e.entity)? {
            if !attr.is_flattened() {
                row.insert(
                    attr.db_attribute_path.clone(),
                    e.attributes.get(&attr.name).cloned().unwrap_or_default(),
                );
            }
        }
        let db = resolver.db_entity_for(&e.entity)?;
        for rel in db.relationships.iter().filter(|r| r.is_to_master()) {
            let target = self.current_to_one_id(slot, &rel.name);
            let key = target.as_ref().and_then(|t| t.id_snapshot());
            for j in &rel.joins {
                let v = key.and_then(|k| k.get(&j.target)).cloned().unwrap_or_default();
                row.insert(j.source.clone(), v);
            }
        }
        Ok(row)
    }

    // ════════════════════════════════════════════
    // To-one
    // ════════════════════════════════════════════

    /// Current target of a to-one DbRelationship.
    ///
    /// `None` when it isn't known without a query (a dependent row of a
    /// committed object that was never loaded).
    pub fn current_to_one(
        &mut self,
        resolver: &EntityResolver,
        slot: u64,
        db_rel: &str,
    ) -> CayxResult<Option<Option<u64>>> {
        let e = self.entry(slot)?;
        if let Some(target) = e.to_one.get(db_rel) {
            return Ok(Some(*target));
        }
        if e.state == PersistenceState::New {
            return Ok(Some(None));
        }
        let is_master = resolver
            .db_entity_for(&e.entity)?
            .relationship(db_rel)
            .is_some_and(DbRelationship::is_to_master);
        if !is_master {
            return Ok(None);
        }
        match e.committed.to_one.get(db_rel).cloned().flatten() {
            Some(id) => {
                let entity = id.entity_name().to_string();
                Ok(Some(Some(self.find_or_hollow(&id, &entity))))
            }
            None => Ok(Some(None)),
        }
    }

    /// Current target id of a to-master DbRelationship.
    pub fn current_to_one_id(&self, slot: u64, db_rel: &str) -> Option<ObjectId> {
        let e = self.entries.get(&slot)?;
        match e.to_one.get(db_rel) {
            Some(target) => target.and_then(|t| self.entries.get(&t)).map(|t| t.id.clone()),
            None => e.committed.to_one.get(db_rel).cloned().flatten(),
        }
    }

    /// Points a to-one DbRelationship at `target` and updates the reverse side.
    pub fn set_to_one(
        &mut self,
        resolver: &EntityResolver,
        slot: u64,
        db_rel: &str,
        target: Option<u64>,
    ) -> CayxResult<()> {
        let entity = self.entry(slot)?.entity.clone();
        let db = resolver.db_entity_for(&entity)?;
        let rel = db.relationship(db_rel).ok_or_else(|| {
            CayxError::Configuration(format!("no DbRelationship '{db_rel}' in '{}'", db.name))
        })?;
        if rel.to_many {
            return Err(CayxError::invalid(
                format!("'{db_rel}' is a to-many relationship"),
                entity,
            ));
        }
        let old = self.current_to_one(resolver, slot, db_rel)?.flatten();
        let known = self.entry(slot)?.to_one.contains_key(db_rel);
        if old == target && known {
            return Ok(());
        }

        self.entry_mut(slot)?.to_one.insert(db_rel.to_string(), target);
        if rel.is_to_master() && old != target {
            self.mark_modified(slot);
        }

        let Some(reverse) = resolver.reverse_db_relationship(&db.name, rel)? else {
            return Ok(());
        };
        if reverse.to_many {
            if let Some(o) = old.filter(|o| Some(*o) != target) {
                self.list_remove_db(resolver, o, &reverse.name, slot)?;
            }
            if let Some(t) = target {
                self.list_add_db(resolver, t, &reverse.name, slot)?;
            }
            return Ok(());
        }

        // one-to-one
        if let Some(o) = old.filter(|o| Some(*o) != target) {
            if let Some(e) = self.entries.get_mut(&o) {
                e.to_one.insert(reverse.name.clone(), None);
            }
            if reverse.is_to_master() {
                self.mark_modified(o);
            }
        }
        if let Some(t) = target {
            let previous = self
                .entries
                .get(&t)
                .and_then(|e| e.to_one.get(&reverse.name).copied().flatten());
            if let Some(p) = previous.filter(|p| *p != slot) {
                if let Some(e) = self.entries.get_mut(&p) {
                    e.to_one.insert(db_rel.to_string(), None);
                }
                if rel.is_to_master() {
                    self.mark_modified(p);
                }
            }
            if let Some(e) = self.entries.get_mut(&t) {
                e.to_one.insert(reverse.name.clone(), Some(slot));
            }
            if reverse.is_to_master() {
                self.mark_modified(t);
            }
        }
        Ok(())
    }

    // ════════════════════════════════════════════
    // To-many
    // ════════════════════════════════════════════

    pub fn add_to_many(
        &mut self,
        resolver: &EntityResolver,
        slot: u64,
        rel_name: &str,
        target: u64,
    ) -> CayxResult<()> {
        let entity = self.entry(slot)?.entity.clone();
        let rel = resolver.require_relationship(&entity, rel_name)?;
        if rel.is_flattened() {
            self.list_insert(slot, rel_name, target);
            if let Some(rev) = resolver.reverse_relationship(&entity, rel_name)? {
                self.list_insert(target, &rev.name, slot);
            }
            return self.record_link(resolver, slot, rel_name, target, true);
        }
        let reverse = reverse_of_to_many(resolver, &entity, rel)?;
        self.set_to_one(resolver, target, &reverse, Some(slot))
    }

    pub fn remove_from_many(
        &mut self,
        resolver: &EntityResolver,
        slot: u64,
        rel_name: &str,
        target: u64,
    ) -> CayxResult<()> {
        let entity = self.entry(slot)?.entity.clone();
        let rel = resolver.require_relationship(&entity, rel_name)?;
        if rel.is_flattened() {
            self.list_remove(slot, rel_name, target);
            if let Some(rev) = resolver.reverse_relationship(&entity, rel_name)? {
                self.list_remove(target, &rev.name, slot);
            }
            return self.record_link(resolver, slot, rel_name, target, false);
        }
        let reverse = reverse_of_to_many(resolver, &entity, rel)?;
        if self.current_to_one(resolver, target, &reverse)? == Some(Some(slot)) {
            self.set_to_one(resolver, target, &reverse, None)
        } else {
            self.list_remove(slot, rel_name, target);
            Ok(())
        }
    }

    /// Records a link table change once; the opposite change cancels it.
    fn record_link(
        &mut self,
        resolver: &EntityResolver,
        source: u64,
        relationship: &str,
        target: u64,
        insert: bool,
    ) -> CayxResult<()> {
        let entity = self.entry(source)?.entity.clone();
        let reverse = resolver
            .reverse_relationship(&entity, relationship)?
            .map(|r| r.name.clone());
        let existing = self.links.iter().position(|l| {
            (l.source == source && l.target == target && l.relationship == relationship)
                || (l.source == target
                    && l.target == source
                    && reverse.as_deref() == Some(l.relationship.as_str()))
        });
        match existing {
            Some(i) if self.links[i].insert != insert => {
                self.links.remove(i);
            }
            Some(_) => {}
            None => self.links.push(LinkOp {
                source,
                relationship: relationship.to_string(),
                target,
                insert,
            }),
        }
        Ok(())
    }

    pub fn list_insert(&mut self, slot: u64, rel_name: &str, member: u64) {
        if let Some(list) = self
            .entries
            .get_mut(&slot)
            .and_then(|e| e.to_many.get_mut(rel_name))
        {
            if !list.contains(&member) {
                list.push(member);
            }
        }
    }

    pub fn list_remove(&mut self, slot: u64, rel_name: &str, member: u64) {
        if let Some(list) = self
            .entries
            .get_mut(&slot)
            .and_then(|e| e.to_many.get_mut(rel_name))
        {
            list.retain(|s| *s != member);
        }
    }

    fn list_add_db(
        &mut self,
        resolver: &EntityResolver,
        owner: u64,
        db_rel: &str,
        member: u64,
    ) -> CayxResult<()> {
        for name in self.obj_relationships_on(resolver, owner, db_rel)? {
            self.list_insert(owner, &name, member);
        }
        Ok(())
    }

    fn list_remove_db(
        &mut self,
        resolver: &EntityResolver,
        owner: u64,
        db_rel: &str,
        member: u64,
    ) -> CayxResult<()> {
        for name in self.obj_relationships_on(resolver, owner, db_rel)? {
            self.list_remove(owner, &name, member);
        }
        Ok(())
    }

    fn obj_relationships_on(
        &self,
        resolver: &EntityResolver,
        owner: u64,
        db_rel: &str,
    ) -> CayxResult<Vec<String>> {
        let Some(e) = self.entries.get(&owner) else {
            return Ok(Vec::new());
        };
        Ok(resolver
            .relationships(&e.entity)?
            .into_iter()
            .filter(|r| r.db_relationship_path == db_rel)
            .map(|r| r.name.clone())
            .collect())
    }

    // ════════════════════════════════════════════
    // Rollback
    // ════════════════════════════════════════════

    /// Drops new objects and restores every changed object to its committed state.
    pub fn revert(&mut self) {
        let new_slots: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| e.state == PersistenceState::New)
            .map(|(s, _)| *s)
            .collect();
        for slot in new_slots {
            self.forget(slot);
        }
        for e in self.entries.values_mut() {
            if matches!(e.state, PersistenceState::Modified | PersistenceState::Deleted) {
                e.attributes = e.committed.attributes.clone();
                e.state = PersistenceState::Committed;
            }
            e.to_one.clear();
            e.to_many.clear();
        }
        self.links.clear();
    }
}

fn unregistered(slot: u64) -> CayxError {
    CayxError::invalid("object is not registered in this context", format!("slot {slot}"))
}

// ════════════════════════════════════════════
// Row helpers
// ════════════════════════════════════════════

/// Topmost entity of an inheritance hierarchy; ObjectIds use its name.
pub(crate) fn root_entity(resolver: &EntityResolver, entity: &str) -> CayxResult<String> {
    Ok(resolver
        .hierarchy(entity)?
        .last()
        .map_or_else(|| entity.to_string(), |e| e.name.clone()))
}

/// Permanent id of the object a row belongs to.
pub(crate) fn row_object_id(
    resolver: &EntityResolver,
    entity: &str,
    row: &DataRow,
) -> CayxResult<Option<ObjectId>> {
    let db = resolver.db_entity_for(entity)?;
    Ok(ObjectId::from_row(
        root_entity(resolver, entity)?,
        db.primary_key().map(|a| a.name.as_str()),
        row,
    ))
}

/// Columns of an entity row worth caching: own columns plus flattened attributes.
pub(crate) fn snapshot_row(
    resolver: &EntityResolver,
    entity: &str,
    row: &DataRow,
) -> CayxResult<DataRow> {
    let flattened: Vec<String> = resolver
        .attributes(entity)?
        .into_iter()
        .filter(|a| a.is_flattened())
        .map(|a| a.db_attribute_path.clone())
        .collect();
    Ok(row
        .iter()
        .filter(|(k, _)| !k.contains('.') || flattened.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect())
}

pub(crate) fn attributes_from_row(
    resolver: &EntityResolver,
    entity: &str,
    row: &DataRow,
) -> CayxResult<BTreeMap<String, Value>> {
    Ok(resolver
        .attributes(entity)?
        .into_iter()
        .map(|a| (a.name.clone(), row.get(&a.db_attribute_path).clone()))
        .collect())
}

/// Targets of every to-master relationship, read from the FK columns.
pub(crate) fn fk_ids_from_row(
    resolver: &EntityResolver,
    entity: &str,
    row: &DataRow,
) -> CayxResult<BTreeMap<String, Option<ObjectId>>> {
    let db = resolver.db_entity_for(entity)?;
    let mut out = BTreeMap::new();
    for rel in db.relationships.iter().filter(|r| r.is_to_master()) {
        let Some(target) = target_entity(resolver, entity, rel)? else {
            continue;
        };
        let mut key = BTreeMap::new();
        for j in &rel.joins {
            let v = row.get(&j.source);
            if v.is_null() {
                break;
            }
            key.insert(j.target.clone(), v.clone());
        }
        let id = (key.len() == rel.joins.len() && !key.is_empty())
            .then(|| ObjectId::permanent(target, key));
        out.insert(rel.name.clone(), id);
    }
    Ok(out)
}

/// Root ObjEntity the target of a DbRelationship is registered as.
pub(crate) fn target_entity(
    resolver: &EntityResolver,
    entity: &str,
    rel: &DbRelationship,
) -> CayxResult<Option<String>> {
    if let Some(r) = resolver
        .relationships(entity)?
        .into_iter()
        .find(|r| r.db_relationship_path == rel.name)
    {
        return Ok(Some(root_entity(resolver, &r.target)?));
    }
    Ok(resolver
        .obj_entities()
        .find(|e| e.db_entity == rel.target && e.super_entity.is_none())
        .map(|e| e.name.clone()))
}

/// To-one DbRelationship of the target that mirrors a single-hop to-many.
pub(crate) fn reverse_of_to_many(
    resolver: &EntityResolver,
    entity: &str,
    rel: &ObjRelationship,
) -> CayxResult<String> {
    let db = resolver.db_entity_for(entity)?;
    let db_rel = db.relationship(&rel.db_relationship_path).ok_or_else(|| {
        CayxError::Configuration(format!(
            "no DbRelationship '{}' in '{}'",
            rel.db_relationship_path, db.name
        ))
    })?;
    resolver
        .reverse_db_relationship(&db.name, db_rel)?
        .map(|r| r.name.clone())
        .ok_or_else(|| {
            CayxError::Configuration(format!(
                "relationship {entity}.{} has no reverse DbRelationship",
                rel.name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures;

    fn committed(state: &mut ContextState, entity: &str, id: ObjectId, row: DataRow) -> u64 {
        let resolver = test_fixtures::resolver();
        let slot = state.register(Entry::hollow(id, entity));
        state.load_row(&resolver, slot, entity, &row).unwrap();
        slot
    }

    #[test]
    fn test_load_row_reads_foreign_keys() {
        let resolver = test_fixtures::resolver();
        let mut state = ContextState::default();
        let p = committed(
            &mut state,
            "Painting",
            ObjectId::of("Painting", "PAINTING_ID", 1),
            DataRow::new()
                .with("PAINTING_ID", 1)
                .with("PAINTING_TITLE", "P1")
                .with("ARTIST_ID", 7),
        );
        let e = state.entry(p).unwrap();
        assert_eq!(e.attributes["paintingTitle"].as_str(), Some("P1"));
        assert_eq!(
            e.committed.to_one["toArtist"],
            Some(ObjectId::of("Artist", "ARTIST_ID", 7))
        );
        assert_eq!(e.committed.to_one["toGallery"], None);

        // the artist is registered hollow on first access
        let artist = state.current_to_one(&resolver, p, "toArtist").unwrap().flatten().unwrap();
        assert_eq!(state.state(artist), PersistenceState::Hollow);
    }

    #[test]
    fn test_set_to_one_updates_loaded_list() {
        let resolver = test_fixtures::resolver();
        let mut state = ContextState::default();
        let a = state.register(Entry::new_object(ObjectId::temporary("Artist"), "Artist"));
        state.entry_mut(a).unwrap().to_many.insert("paintingArray".into(), Vec::new());
        let p = committed(
            &mut state,
            "Painting",
            ObjectId::of("Painting", "PAINTING_ID", 1),
            DataRow::new().with("PAINTING_ID", 1),
        );

        state.set_to_one(&resolver, p, "toArtist", Some(a)).unwrap();
        assert_eq!(state.entry(a).unwrap().to_many["paintingArray"], vec![p]);
        assert_eq!(state.state(p), PersistenceState::Modified);

        state.remove_from_many(&resolver, a, "paintingArray", p).unwrap();
        assert!(state.entry(a).unwrap().to_many["paintingArray"].is_empty());
        assert_eq!(state.current_to_one(&resolver, p, "toArtist").unwrap(), Some(None));
    }

    #[test]
    fn test_link_changes_cancel_out() {
        let resolver = test_fixtures::resolver();
        let mut state = ContextState::default();
        let a = committed(
            &mut state,
            "Artist",
            ObjectId::of("Artist", "ARTIST_ID", 1),
            DataRow::new().with("ARTIST_ID", 1),
        );
        let x = committed(
            &mut state,
            "Exhibit",
            ObjectId::of("Exhibit", "EXHIBIT_ID", 2),
            DataRow::new().with("EXHIBIT_ID", 2),
        );
        state.add_to_many(&resolver, a, "exhibitArray", x).unwrap();
        assert_eq!(state.links.len(), 1);
        // removing through the reverse relationship cancels the insert
        state.remove_from_many(&resolver, x, "artistArray", a).unwrap();
        assert!(state.links.is_empty());
        // flattened changes don't modify either side
        assert_eq!(state.state(a), PersistenceState::Committed);
    }

    #[test]
    fn test_forget_scrubs_references() {
        let resolver = test_fixtures::resolver();
        let mut state = ContextState::default();
        let a = state.register(Entry::new_object(ObjectId::temporary("Artist"), "Artist"));
        state.entry_mut(a).unwrap().to_many.insert("paintingArray".into(), Vec::new());
        let p = state.register(Entry::new_object(ObjectId::temporary("Painting"), "Painting"));
        state.add_to_many(&resolver, a, "paintingArray", p).unwrap();
        state.forget(p);
        assert!(state.entry(a).unwrap().to_many["paintingArray"].is_empty());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_revert_restores_committed_values() {
        let mut state = ContextState::default();
        let a = committed(
            &mut state,
            "Artist",
            ObjectId::of("Artist", "ARTIST_ID", 1),
            DataRow::new().with("ARTIST_ID", 1).with("ARTIST_NAME", "old"),
        );
        {
            let e = state.entry_mut(a).unwrap();
            e.attributes.insert("artistName".into(), Value::from("new"));
            e.state = PersistenceState::Modified;
        }
        state.register(Entry::new_object(ObjectId::temporary("Artist"), "Artist"));
        state.revert();
        assert_eq!(state.len(), 1);
        let e = state.entry(a).unwrap();
        assert_eq!(e.state, PersistenceState::Committed);
        assert_eq!(e.attributes["artistName"].as_str(), Some("old"));
    }

    #[test]
    fn test_snapshot_row_keeps_flattened_only() {
        let resolver = test_fixtures::resolver();
        let row = DataRow::new()
            .with("PAINTING_ID", 1)
            .with("toArtist.ARTIST_NAME", "a")
            .with("toGallery.GALLERY_NAME", "g");
        let snap = snapshot_row(&resolver, "Painting", &row).unwrap();
        assert!(snap.contains("toArtist.ARTIST_NAME"));
        assert!(!snap.contains("toGallery.GALLERY_NAME"));
    }
}
