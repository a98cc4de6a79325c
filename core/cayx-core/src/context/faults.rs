//! Fault 해결과 관계 읽기/쓰기
//!
//! hollow 객체는 스냅샷 캐시(또는 ID 조회)로 채워지고, 로드되지 않은 관계는
//! 역방향 DB 경로로 대상 엔티티를 조회해 채워집니다. 조회는 락 밖에서 실행되고,
//! 결과 병합과 관계 수정만 락 안에서 합니다.

use super::graph::reverse_of_to_many;
use super::{ObjRef, ObjectContext, PersistenceState};
use crate::error::{CayxError, CayxResult};
use crate::event::LifecycleEvent;
use crate::exp::Expression;
use crate::map::ObjRelationship;
use crate::query::SelectQuery;
use crate::row::DataRow;
use crate::value::Value;

impl ObjectContext {
    // ════════════════════════════════════════════
    // Public relationship API
    // ════════════════════════════════════════════

    /// Target of a to-one relationship.
    pub fn read_to_one(&self, obj: ObjRef, relationship: &str) -> CayxResult<Option<ObjRef>> {
        self.drain_events()?;
        let slot = self.slot(obj)?;
        self.resolve_fault(slot)?;
        let entity = self.entity_of(slot)?;
        let rel = self.resolver.require_relationship(&entity, relationship)?;
        if self.resolver.is_to_many(&entity, relationship)? {
            return Err(CayxError::invalid(
                format!("{entity}.{relationship} is a to-many relationship"),
                "read_to_one",
            ));
        }
        let target = if rel.is_flattened() {
            self.fetch_related(slot, &entity, rel)?.into_iter().next()
        } else {
            self.resolve_to_one(slot, &entity, rel)?
        };
        Ok(target.map(|t| self.obj(t)))
    }

    /// Members of a to-many relationship, fetched on first access.
    pub fn read_to_many(&self, obj: ObjRef, relationship: &str) -> CayxResult<Vec<ObjRef>> {
        self.drain_events()?;
        let slot = self.slot(obj)?;
        Ok(self
            .resolve_to_many(slot, relationship)?
            .into_iter()
            .map(|s| self.obj(s))
            .collect())
    }

    /// Sets a to-one relationship; the reverse side follows.
    pub fn set_to_one(&self, obj: ObjRef, relationship: &str, target: Option<ObjRef>) -> CayxResult<()> {
        self.drain_events()?;
        let slot = self.slot(obj)?;
        let target = target.map(|t| self.slot(t)).transpose()?;
        self.resolve_fault(slot)?;
        if let Some(t) = target {
            self.resolve_fault(t)?;
        }
        let entity = self.entity_of(slot)?;
        let rel = self.resolver.require_relationship(&entity, relationship)?;
        if self.resolver.is_to_many(&entity, relationship)? {
            return Err(CayxError::invalid(
                format!("{entity}.{relationship} is a to-many relationship"),
                "set_to_one",
            ));
        }
        if rel.is_flattened() {
            return Err(CayxError::invalid(
                format!("flattened relationship {entity}.{relationship} can't be set"),
                rel.db_relationship_path.clone(),
            ));
        }
        self.check_writable(slot, target, rel)?;

        let old = self.resolve_to_one(slot, &entity, rel)?;
        if let Some(o) = old.filter(|o| Some(*o) != target) {
            // the previous target of a one-to-one loses its side too
            self.resolve_fault(o)?;
        }
        self.graph
            .lock()
            .set_to_one(&self.resolver, slot, &rel.db_relationship_path, target)
    }

    pub fn add_to_many(&self, obj: ObjRef, relationship: &str, target: ObjRef) -> CayxResult<()> {
        self.change_to_many(obj, relationship, target, true)
    }

    pub fn remove_from_many(&self, obj: ObjRef, relationship: &str, target: ObjRef) -> CayxResult<()> {
        self.change_to_many(obj, relationship, target, false)
    }

    fn change_to_many(&self, obj: ObjRef, relationship: &str, target: ObjRef, add: bool) -> CayxResult<()> {
        self.drain_events()?;
        let slot = self.slot(obj)?;
        let target = self.slot(target)?;
        self.resolve_fault(slot)?;
        self.resolve_fault(target)?;
        let entity = self.entity_of(slot)?;
        let rel = self.resolver.require_relationship(&entity, relationship)?;
        if !self.resolver.is_to_many(&entity, relationship)? {
            return Err(CayxError::invalid(
                format!("{entity}.{relationship} is a to-one relationship"),
                "to-many change",
            ));
        }
        self.check_writable(slot, Some(target), rel)?;

        self.resolve_to_many(slot, relationship)?;
        if rel.is_flattened() {
            if let Some(rev) = self.resolver.reverse_relationship(&entity, relationship)? {
                let loaded = self.graph.lock().entry(target)?.to_many.contains_key(&rev.name);
                if !loaded {
                    self.resolve_to_many(target, &rev.name)?;
                }
            }
        }

        let mut g = self.graph.lock();
        if add {
            g.add_to_many(&self.resolver, slot, relationship, target)
        } else {
            g.remove_from_many(&self.resolver, slot, relationship, target)
        }
    }

    fn check_writable(&self, slot: u64, target: Option<u64>, rel: &ObjRelationship) -> CayxResult<()> {
        let g = self.graph.lock();
        let source = g.entry(slot)?;
        if source.state == PersistenceState::Deleted {
            return Err(CayxError::invalid(
                format!("can't change relationships of deleted object {}", source.id),
                rel.name.clone(),
            ));
        }
        if let Some(t) = target {
            let t = g.entry(t)?;
            if t.state == PersistenceState::Deleted {
                return Err(CayxError::invalid(
                    format!("can't relate to deleted object {}", t.id),
                    rel.name.clone(),
                ));
            }
            if t.entity != rel.target && !self.resolver.is_sub_entity_of(&t.entity, &rel.target) {
                return Err(CayxError::invalid(
                    format!("{} is not a {}", t.id, rel.target),
                    rel.name.clone(),
                ));
            }
        }
        Ok(())
    }

    // ════════════════════════════════════════════
    // Fault resolution
    // ════════════════════════════════════════════

    /// Loads the attributes of a hollow object.
    pub(crate) fn resolve_fault(&self, slot: u64) -> CayxResult<()> {
        let (id, entity) = {
            let g = self.graph.lock();
            let e = g.entry(slot)?;
            if e.state != PersistenceState::Hollow {
                return Ok(());
            }
            (e.id.clone(), e.entity.clone())
        };
        let row = self
            .channel
            .snapshot(&id)?
            .ok_or_else(|| CayxError::FaultFailure(format!("no matching row for {id}")))?;
        let concrete = self.resolver.entity_for_row(&entity, &row)?.name.clone();
        {
            let mut g = self.graph.lock();
            if g.state(slot) != PersistenceState::Hollow {
                return Ok(());
            }
            g.load_row(&self.resolver, slot, &concrete, &row)?;
        }
        tracing::trace!(context = self.id, %id, "fault resolved");
        self.fire(LifecycleEvent::PostLoad, &[slot]);
        Ok(())
    }

    pub(crate) fn resolve_to_one(
        &self,
        slot: u64,
        entity: &str,
        rel: &ObjRelationship,
    ) -> CayxResult<Option<u64>> {
        let path = rel.db_relationship_path.as_str();
        if let Some(known) = self.graph.lock().current_to_one(&self.resolver, slot, path)? {
            return Ok(known);
        }
        let found = self.fetch_related(slot, entity, rel)?.into_iter().next();
        self.graph
            .lock()
            .entry_mut(slot)?
            .to_one
            .insert(path.to_string(), found);
        Ok(found)
    }

    /// Loads a to-many list, merging the fetched objects with in-memory changes.
    pub(crate) fn resolve_to_many(&self, slot: u64, relationship: &str) -> CayxResult<Vec<u64>> {
        self.resolve_fault(slot)?;
        let entity = {
            let g = self.graph.lock();
            let e = g.entry(slot)?;
            if let Some(list) = e.to_many.get(relationship) {
                return Ok(list.clone());
            }
            e.entity.clone()
        };
        let rel = self.resolver.require_relationship(&entity, relationship)?;
        if !self.resolver.is_to_many(&entity, relationship)? {
            return Err(CayxError::invalid(
                format!("{entity}.{relationship} is a to-one relationship"),
                "read_to_many",
            ));
        }
        let fetched = self.fetch_related(slot, &entity, rel)?;

        let mut g = self.graph.lock();
        let mut list: Vec<u64> = Vec::with_capacity(fetched.len());
        for s in fetched {
            if g.state(s) != PersistenceState::Deleted && !list.contains(&s) {
                list.push(s);
            }
        }
        if rel.is_flattened() {
            let reverse = self
                .resolver
                .reverse_relationship(&entity, relationship)?
                .map(|r| r.name.clone());
            for link in g.links.clone() {
                let member = if link.source == slot && link.relationship == relationship {
                    link.target
                } else if link.target == slot && reverse.as_deref() == Some(link.relationship.as_str()) {
                    link.source
                } else {
                    continue;
                };
                if link.insert {
                    if !list.contains(&member) {
                        list.push(member);
                    }
                } else {
                    list.retain(|s| *s != member);
                }
            }
        } else {
            let reverse = reverse_of_to_many(&self.resolver, &entity, rel)?;
            let target_table = self.resolver.db_entity_for(&rel.target)?.name.clone();
            // moved away in memory
            list.retain(|s| {
                g.try_entry(*s)
                    .is_some_and(|e| e.to_one.get(&reverse).is_none_or(|t| *t == Some(slot)))
            });
            // moved here in memory
            let mut extra = Vec::new();
            for (s, e) in g.entries() {
                if e.state != PersistenceState::Deleted
                    && e.to_one.get(&reverse) == Some(&Some(slot))
                    && !list.contains(&s)
                    && self
                        .resolver
                        .db_entity_for(&e.entity)
                        .is_ok_and(|db| db.name == target_table)
                {
                    extra.push(s);
                }
            }
            list.extend(extra);
        }
        g.entry_mut(slot)?
            .to_many
            .insert(relationship.to_string(), list.clone());
        Ok(list)
    }

    /// Objects related to one committed object, straight from the database.
    fn fetch_related(&self, slot: u64, entity: &str, rel: &ObjRelationship) -> CayxResult<Vec<u64>> {
        let source = {
            let g = self.graph.lock();
            if g.entry(slot)?.id.is_temporary() {
                return Ok(Vec::new());
            }
            g.current_row(&self.resolver, slot)?
        };
        let qualifier = self.relationship_qualifier(entity, rel, std::slice::from_ref(&source))?;
        self.fetch_objects(&SelectQuery::new(rel.target.clone()).qualifier(qualifier))
    }

    /// Qualifier on `rel.target` matching the objects related to the given
    /// source rows, expressed through the reverse DB path.
    pub(crate) fn relationship_qualifier(
        &self,
        entity: &str,
        rel: &ObjRelationship,
        sources: &[DataRow],
    ) -> CayxResult<Expression> {
        let obj = self.resolver.obj_entity(entity)?;
        let hops = self
            .resolver
            .db_hops(&obj.db_entity, &rel.db_relationship_path, false)?;
        let mut reversed = Vec::with_capacity(hops.len());
        for hop in hops.iter().rev() {
            let reverse = self
                .resolver
                .reverse_db_relationship(hop.source, hop.relationship)?
                .ok_or_else(|| {
                    CayxError::Configuration(format!(
                        "DbRelationship {}.{} has no reverse",
                        hop.source, hop.relationship.name
                    ))
                })?;
            reversed.push(reverse);
        }
        let Some((last, through)) = reversed.split_last() else {
            return Err(CayxError::Configuration(format!(
                "empty relationship path for {entity}.{}",
                rel.name
            )));
        };
        let prefix: String = through.iter().map(|r| format!("{}.", r.name)).collect();

        if let [join] = last.joins.as_slice() {
            let path = format!("{prefix}{}", join.source);
            let values: Vec<Value> = sources.iter().map(|row| row.get(&join.target).clone()).collect();
            return Ok(match values.as_slice() {
                [single] => Expression::match_db(&path, single.clone()),
                _ => Expression::in_values(Expression::db_path(path), values),
            });
        }
        let per_source = sources.iter().filter_map(|row| {
            Expression::and_all(
                last.joins
                    .iter()
                    .map(|j| Expression::match_db(&format!("{prefix}{}", j.source), row.get(&j.target).clone()))
                    .collect(),
            )
        });
        per_source
            .reduce(Expression::or)
            .ok_or_else(|| CayxError::invalid("no source objects", rel.name.clone()))
    }

    pub(crate) fn entity_of(&self, slot: u64) -> CayxResult<String> {
        Ok(self.graph.lock().entry(slot)?.entity.clone())
    }
}
