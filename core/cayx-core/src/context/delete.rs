//! 삭제 — 관계의 삭제 규칙 적용
//!
//! - `Deny`: 관련 객체가 하나라도 있으면 [`CayxError::DeleteDenied`]
//! - `Cascade`: 관련 객체도 삭제
//! - `Nullify`: 관련 객체에서 이 객체를 떼어냄
//!
//! 삭제 도중 실패하면 그래프는 호출 전 상태로 돌아갑니다.

use super::{ObjRef, ObjectContext, PersistenceState};
use crate::error::{CayxError, CayxResult};
use crate::event::LifecycleEvent;
use crate::map::{DeleteRule, ObjRelationship};
use std::collections::HashSet;

impl ObjectContext {
    /// Schedules an object for deletion. A NEW object becomes TRANSIENT right away.
    pub fn delete_object(&self, obj: ObjRef) -> CayxResult<()> {
        self.delete_objects(&[obj])
    }

    pub fn delete_objects(&self, objects: &[ObjRef]) -> CayxResult<()> {
        self.drain_events()?;
        let slots = objects
            .iter()
            .map(|o| self.slot(*o))
            .collect::<CayxResult<Vec<_>>>()?;

        let backup = self.graph.lock().clone();
        let mut deleting = HashSet::new();
        if let Err(e) = slots.iter().try_for_each(|&s| self.delete_slot(s, &mut deleting)) {
            *self.graph.lock() = backup;
            tracing::debug!(context = self.id, error = %e, "delete reverted");
            return Err(e);
        }
        tracing::debug!(context = self.id, objects = deleting.len(), "objects deleted");
        Ok(())
    }

    fn delete_slot(&self, slot: u64, deleting: &mut HashSet<u64>) -> CayxResult<()> {
        if matches!(
            self.graph.lock().state(slot),
            PersistenceState::Transient | PersistenceState::Deleted
        ) || !deleting.insert(slot)
        {
            return Ok(());
        }
        self.resolve_fault(slot)?;
        let entity = self.entity_of(slot)?;

        let mut plan = Vec::new();
        for rel in self.resolver.relationships(&entity)? {
            if rel.delete_rule == DeleteRule::NoAction {
                continue;
            }
            let related = self.related_slots(slot, &entity, rel)?;
            if rel.delete_rule == DeleteRule::Deny && !related.is_empty() {
                return Err(CayxError::DeleteDenied {
                    entity: entity.clone(),
                    relationship: rel.name.clone(),
                });
            }
            plan.push((rel, related));
        }
        self.fire(LifecycleEvent::PreRemove, &[slot]);

        for (rel, related) in plan {
            match rel.delete_rule {
                DeleteRule::Nullify => self.unlink(slot, &entity, rel, &related)?,
                DeleteRule::Cascade => {
                    if rel.is_flattened() {
                        self.unlink(slot, &entity, rel, &related)?;
                    }
                    for target in related {
                        self.delete_slot(target, deleting)?;
                    }
                }
                DeleteRule::Deny | DeleteRule::NoAction => {}
            }
        }

        let mut g = self.graph.lock();
        if g.state(slot) == PersistenceState::New {
            g.forget(slot);
        } else {
            g.entry_mut(slot)?.state = PersistenceState::Deleted;
        }
        Ok(())
    }

    /// Live objects on the other side of a relationship.
    fn related_slots(&self, slot: u64, entity: &str, rel: &ObjRelationship) -> CayxResult<Vec<u64>> {
        let related: Vec<u64> = if self.resolver.is_to_many(entity, &rel.name)? {
            self.resolve_to_many(slot, &rel.name)?
        } else if rel.is_flattened() {
            self.read_to_one(self.obj(slot), &rel.name)?
                .map(|o| o.slot)
                .into_iter()
                .collect()
        } else {
            self.resolve_to_one(slot, entity, rel)?.into_iter().collect()
        };
        let g = self.graph.lock();
        Ok(related
            .into_iter()
            .filter(|s| {
                !matches!(
                    g.state(*s),
                    PersistenceState::Deleted | PersistenceState::Transient
                )
            })
            .collect())
    }

    fn unlink(&self, slot: u64, entity: &str, rel: &ObjRelationship, related: &[u64]) -> CayxResult<()> {
        let mut g = self.graph.lock();
        if self.resolver.is_to_many(entity, &rel.name)? {
            for &target in related {
                g.remove_from_many(&self.resolver, slot, &rel.name, target)?;
            }
        } else if !rel.is_flattened() {
            g.set_to_one(&self.resolver, slot, &rel.db_relationship_path, None)?;
        }
        Ok(())
    }
}
