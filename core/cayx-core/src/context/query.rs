//! 조회 — 결과 행을 객체로 등록하고 프리페치 관계를 채웁니다.
//!
//! 이미 변경된 객체(NEW/MODIFIED)는 조회 결과로 덮어쓰지 않으며, 삭제 예정
//! 객체는 결과에서 빠집니다. COMMITTED/HOLLOW 객체는 가져온 행으로 갱신됩니다.

use super::graph::{ContextState, Entry, reverse_of_to_many, row_object_id, snapshot_row};
use super::{ObjRef, ObjectContext, ObjectId, PersistenceState};
use crate::access::{prefetched_row, root_row};
use crate::error::{CayxError, CayxResult};
use crate::event::LifecycleEvent;
use crate::map::EntityResolver;
use crate::query::{CacheStrategy, PrefetchSemantics, SelectQuery};
use crate::row::{DataRow, FromDataRow};
use crate::translator::select::pages_by_root;
use std::collections::{HashMap, HashSet};

impl ObjectContext {
    /// Runs a select and returns the matching objects, registered in this context.
    pub fn perform_query(&self, query: &SelectQuery) -> CayxResult<Vec<ObjRef>> {
        if query.fetching_data_rows {
            return Err(CayxError::invalid(
                "query fetches data rows, use select_rows",
                query.root.clone(),
            ));
        }
        self.drain_events()?;
        Ok(self
            .fetch_objects(query)?
            .into_iter()
            .map(|s| self.obj(s))
            .collect())
    }

    /// Runs a select and returns raw rows without registering objects.
    pub fn select_rows(&self, query: &SelectQuery) -> CayxResult<Vec<DataRow>> {
        self.drain_events()?;
        self.cached_rows(query)
    }

    /// Runs a select as a data-row query and maps every row onto `T`.
    pub fn perform_query_as<T: FromDataRow>(&self, query: &SelectQuery) -> CayxResult<Vec<T>> {
        let query = query.clone().data_rows();
        self.select_rows(&query)?.iter().map(T::from_row).collect()
    }

    fn cached_rows(&self, query: &SelectQuery) -> CayxResult<Vec<DataRow>> {
        if query.cache_strategy != CacheStrategy::LocalCache {
            return self.channel.select_rows(query);
        }
        let key = query.cache_key();
        if let Some(rows) = self.local_cache.get(&key) {
            return Ok(rows.as_ref().clone());
        }
        let rows = self.channel.select_rows(query)?;
        self.local_cache.put(key, query.cache_group.clone(), rows.clone());
        Ok(rows)
    }

    /// Fetches and registers the objects of a query, prefetches included.
    pub(crate) fn fetch_objects(&self, query: &SelectQuery) -> CayxResult<Vec<u64>> {
        let mut rows = self.cached_rows(query)?;
        if pages_by_root(query, &self.resolver)? {
            rows = page_rows_by_root(&self.resolver, query, rows)?;
        }
        let joint = query.prefetch.paths(PrefetchSemantics::Joint);
        let disjoint = query.prefetch.paths(PrefetchSemantics::Disjoint);

        let mut loaded = Vec::new();
        let mut roots = Vec::new();
        let mut reached: HashMap<String, Vec<u64>> = HashMap::new();
        {
            let mut g = self.graph.lock();
            let mut seen = HashSet::new();
            let mut lists: Vec<((u64, String), Vec<u64>)> = Vec::new();
            let mut singles: Vec<(u64, String, Option<u64>)> = Vec::new();

            for row in &rows {
                let Some(root) = register_row(&self.resolver, &mut g, &query.root, row, &mut loaded)? else {
                    continue;
                };
                if seen.insert(root) {
                    roots.push(root);
                }
                if joint.is_empty() {
                    continue;
                }
                let mut at: HashMap<&str, Option<u64>> = HashMap::new();
                at.insert("", Some(root));
                for path in &joint {
                    let (prefix, name) = path.rsplit_once('.').unwrap_or(("", path.as_str()));
                    let Some(Some(parent)) = at.get(prefix).copied() else {
                        at.insert(path, None);
                        continue;
                    };
                    let parent_entity = g.entry(parent)?.entity.clone();
                    let rel = self.resolver.require_relationship(&parent_entity, name)?;
                    let target_db = self.resolver.db_entity_for(&rel.target)?;
                    let child = match prefetched_row(row, path, target_db) {
                        Some(sub) => register_row(&self.resolver, &mut g, &rel.target, &sub, &mut loaded)?,
                        None => None,
                    };
                    at.insert(path, child);
                    let members = reached.entry(path.clone()).or_default();
                    if let Some(c) = child.filter(|c| !members.contains(c)) {
                        members.push(c);
                    }

                    if self.resolver.is_to_many(&parent_entity, name)? {
                        let key = (parent, name.to_string());
                        let list = match lists.iter().position(|(k, _)| *k == key) {
                            Some(i) => &mut lists[i].1,
                            None => {
                                lists.push((key, Vec::new()));
                                let last = lists.len() - 1;
                                &mut lists[last].1
                            }
                        };
                        if let Some(c) = child.filter(|c| !list.contains(c)) {
                            list.push(c);
                        }
                    } else if !rel.is_flattened() {
                        singles.push((parent, rel.db_relationship_path.clone(), child));
                    }
                }
            }

            for ((parent, name), list) in lists {
                install_list(&mut g, parent, &name, list);
            }
            for (parent, db_rel, child) in singles {
                install_to_one(&self.resolver, &mut g, parent, &db_rel, child)?;
            }
        }
        reached.insert(String::new(), roots.clone());

        for path in &disjoint {
            let members = self.prefetch_disjoint(path, &reached)?;
            reached.insert(path.clone(), members);
        }

        tracing::debug!(
            context = self.id,
            root = %query.root,
            rows = rows.len(),
            objects = roots.len(),
            "objects fetched"
        );
        self.fire(LifecycleEvent::PostLoad, &loaded);
        Ok(roots)
    }

    /// One follow-up query for the objects at `path`, grouped back onto their parents.
    fn prefetch_disjoint(&self, path: &str, reached: &HashMap<String, Vec<u64>>) -> CayxResult<Vec<u64>> {
        let (prefix, name) = path.rsplit_once('.').unwrap_or(("", path));
        let parents = reached.get(prefix).cloned().unwrap_or_default();
        let (entity, sources) = {
            let g = self.graph.lock();
            let mut entity = None;
            let mut sources = Vec::new();
            for &p in &parents {
                let Some(e) = g.try_entry(p) else { continue };
                if e.id.is_temporary() || e.state == PersistenceState::Hollow {
                    continue;
                }
                entity.get_or_insert_with(|| e.entity.clone());
                sources.push((p, g.current_row(&self.resolver, p)?));
            }
            (entity, sources)
        };
        let Some(entity) = entity else {
            return Ok(Vec::new());
        };
        let rel = self.resolver.require_relationship(&entity, name)?;
        let to_many = self.resolver.is_to_many(&entity, name)?;

        if rel.is_flattened() {
            // link rows can't be grouped by parent, so each list faults on its own
            let mut members = Vec::new();
            for (p, _) in &sources {
                let list = if to_many {
                    self.resolve_to_many(*p, name)?
                } else {
                    self.read_to_one(self.obj(*p), name)?
                        .map(|o| o.slot)
                        .into_iter()
                        .collect()
                };
                for m in list {
                    if !members.contains(&m) {
                        members.push(m);
                    }
                }
            }
            return Ok(members);
        }

        let rows: Vec<DataRow> = sources.iter().map(|(_, r)| r.clone()).collect();
        let qualifier = self.relationship_qualifier(&entity, rel, &rows)?;
        let fetched = self.fetch_objects(&SelectQuery::new(rel.target.clone()).qualifier(qualifier))?;

        let db = self.resolver.db_entity_for(&entity)?;
        let db_rel = db.relationship(&rel.db_relationship_path).ok_or_else(|| {
            CayxError::Configuration(format!(
                "no DbRelationship '{}' in '{}'",
                rel.db_relationship_path, db.name
            ))
        })?;
        if db_rel.is_to_master() {
            return Ok(fetched);
        }

        // group children by the parent their FK points at
        let reverse = if to_many {
            reverse_of_to_many(&self.resolver, &entity, rel)?
        } else {
            self.resolver
                .reverse_db_relationship(&db.name, db_rel)?
                .map(|r| r.name.clone())
                .ok_or_else(|| {
                    CayxError::Configuration(format!("{entity}.{name} has no reverse DbRelationship"))
                })?
        };
        let mut g = self.graph.lock();
        let mut grouped: HashMap<u64, Vec<u64>> = HashMap::new();
        for &child in &fetched {
            if let Some(Some(parent)) = g.current_to_one(&self.resolver, child, &reverse)? {
                grouped.entry(parent).or_default().push(child);
            }
        }
        for (p, _) in &sources {
            let children = grouped.remove(p).unwrap_or_default();
            if to_many {
                install_list(&mut g, *p, name, children);
            } else {
                install_to_one(&self.resolver, &mut g, *p, &rel.db_relationship_path, children.first().copied())?;
            }
        }
        Ok(fetched)
    }
}

/// Registers or refreshes the object of a fetched row.
///
/// `None` for objects deleted in this context.
fn register_row(
    resolver: &EntityResolver,
    g: &mut ContextState,
    root: &str,
    row: &DataRow,
    loaded: &mut Vec<u64>,
) -> CayxResult<Option<u64>> {
    let concrete = resolver.entity_for_row(root, row)?.name.clone();
    let id = row_object_id(resolver, &concrete, row)?.ok_or_else(|| {
        CayxError::invalid("fetched row has no primary key value", concrete.clone())
    })?;
    let snapshot = snapshot_row(resolver, &concrete, row)?;
    let slot = match g.slot_of(&id) {
        Some(slot) => match g.state(slot) {
            PersistenceState::Hollow | PersistenceState::Committed => slot,
            PersistenceState::Deleted => return Ok(None),
            _ => return Ok(Some(slot)),
        },
        None => g.register(Entry::hollow(id, &concrete)),
    };
    g.load_row(resolver, slot, &concrete, &snapshot)?;
    loaded.push(slot);
    Ok(Some(slot))
}

/// Installs a prefetched list unless the relationship already has in-memory state.
fn install_list(g: &mut ContextState, parent: u64, relationship: &str, list: Vec<u64>) {
    if let Some(e) = g.try_entry(parent) {
        if e.state != PersistenceState::Committed {
            return;
        }
    }
    if let Ok(e) = g.entry_mut(parent) {
        e.to_many.entry(relationship.to_string()).or_insert(list);
    }
}

fn install_to_one(
    resolver: &EntityResolver,
    g: &mut ContextState,
    parent: u64,
    db_rel: &str,
    child: Option<u64>,
) -> CayxResult<()> {
    let e = g.entry(parent)?;
    let is_master = resolver
        .db_entity_for(&e.entity)?
        .relationship(db_rel)
        .is_some_and(|r| r.is_to_master());
    if is_master || e.state != PersistenceState::Committed {
        return Ok(());
    }
    g.entry_mut(parent)?
        .to_one
        .entry(db_rel.to_string())
        .or_insert(child);
    Ok(())
}

/// Keeps the rows of the roots inside the query's offset/limit window, roots
/// counted in order of first appearance.
fn page_rows_by_root(
    resolver: &EntityResolver,
    query: &SelectQuery,
    rows: Vec<DataRow>,
) -> CayxResult<Vec<DataRow>> {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(usize::MAX);
    let mut positions: HashMap<Option<ObjectId>, usize> = HashMap::new();
    let mut kept = Vec::new();
    for row in rows {
        let id = row_object_id(resolver, &query.root, &root_row(&row))?;
        let next = positions.len();
        let position = *positions.entry(id).or_insert(next);
        if position >= offset && position - offset < limit {
            kept.push(row);
        }
    }
    Ok(kept)
}
