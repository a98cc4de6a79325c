//! EntitySorter — FK 의존성에 따른 테이블 정렬
//!
//! INSERT 는 마스터 테이블을 먼저, DELETE 는 역순으로 실행합니다.

use crate::error::CayxResult;
use crate::map::resolver::EntityResolver;
use std::collections::{BTreeMap, BTreeSet};

/// DbEntity 이름의 의존성 순서
#[derive(Debug, Clone)]
pub struct EntitySorter {
    order: Vec<String>,
    rank: BTreeMap<String, usize>,
}

impl EntitySorter {
    /// Builds the order from every to-master relationship in the resolver.
    ///
    /// Reflexive relationships are ignored. A cycle between different tables
    /// is broken at the alphabetically smallest remaining entity.
    pub fn new(resolver: &EntityResolver) -> CayxResult<Self> {
        // entity -> masters it depends on
        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for db in resolver.db_entities() {
            let entry = deps.entry(db.name.clone()).or_default();
            for rel in db.relationships.iter().filter(|r| r.is_to_master()) {
                if rel.target != db.name {
                    entry.insert(rel.target.clone());
                }
            }
        }

        let mut order = Vec::with_capacity(deps.len());
        let mut remaining = deps;
        while !remaining.is_empty() {
            let ready: Vec<String> = remaining
                .iter()
                .filter(|(_, masters)| masters.iter().all(|m| !remaining.contains_key(m)))
                .map(|(name, _)| name.clone())
                .collect();

            let batch = if ready.is_empty() {
                let stuck = remaining.keys().next().cloned().into_iter().collect::<Vec<_>>();
                tracing::warn!(entity = ?stuck, "FK dependency cycle, breaking arbitrarily");
                stuck
            } else {
                ready
            };
            for name in batch {
                remaining.remove(&name);
                order.push(name);
            }
        }

        let rank = order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Ok(Self { order, rank })
    }

    /// Masters first.
    pub fn insert_order(&self) -> &[String] {
        &self.order
    }

    /// Dependents first.
    pub fn delete_order(&self) -> impl Iterator<Item = &String> {
        self.order.iter().rev()
    }

    /// Position of a DbEntity in insert order; unknown entities sort last.
    pub fn rank(&self, db_entity: &str) -> usize {
        self.rank.get(db_entity).copied().unwrap_or(usize::MAX)
    }
}
