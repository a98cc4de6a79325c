//! DataDomain — 최상위 채널
//!
//! 매핑, 데이터 노드, 공유 스냅샷 캐시, 공유 쿼리 캐시, 이벤트를 묶습니다.
//! 최상위 컨텍스트의 커밋은 여기서 SQL 배치로 바뀌어 하나의 트랜잭션 안에서
//! 실행됩니다.
//!
//! ## 커밋 순서
//!
//! 1. 읽기 전용 엔티티 검사
//! 2. PK 사전 생성 (AUTO_PK_SUPPORT, 커밋 트랜잭션 밖)
//! 3. INSERT (마스터 테이블 먼저) → 링크 INSERT → UPDATE → 링크 DELETE → DELETE (역순)
//! 4. 커밋 후 스냅샷 캐시 갱신, 공유 캐시 비우기, 이벤트 전달

use crate::access::node::DataNode;
use crate::access::observer::QueryResult;
use crate::access::pk::{DEFAULT_PK_CACHE_SIZE, PkGenerator};
use crate::access::snapshot::{DEFAULT_SNAPSHOT_CACHE_SIZE, DataRowStore, SnapshotEvent};
use crate::access::transaction::Transaction;
use crate::context::graph::{root_entity, row_object_id, snapshot_row};
use crate::context::{
    ChangeSet, CommitMode, CommitResult, ContextOptions, DataChannel, DiffOperation, LinkDiff,
    ObjectContext, ObjectDiff, ObjectId,
};
use crate::error::{CayxError, CayxResult};
use crate::event::{CallbackRegistry, Event, EventManager};
use crate::exp::Expression;
use crate::map::{DbEntity, EntityResolver, EntitySorter, LockType};
use crate::query::{
    CacheStrategy, DeleteBatch, InsertBatch, Query, QueryCache, SelectQuery, UpdateBatch,
    UpdateRow,
};
use crate::row::DataRow;
use crate::value::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

/// Default capacity of the shared query cache.
pub const DEFAULT_QUERY_CACHE_SIZE: usize = 1_000;

/// 데이터 도메인
pub struct DataDomain {
    name: String,
    resolver: Arc<EntityResolver>,
    nodes: Vec<Arc<DataNode>>,
    store: Arc<DataRowStore>,
    query_cache: QueryCache,
    events: Arc<EventManager>,
    callbacks: Arc<CallbackRegistry>,
    pk_generator: PkGenerator,
    sorter: EntitySorter,
    context_options: ContextOptions,
}

impl DataDomain {
    pub fn new(name: impl Into<String>, resolver: Arc<EntityResolver>) -> CayxResult<Self> {
        let sorter = EntitySorter::new(&resolver)?;
        Ok(Self {
            name: name.into(),
            resolver,
            nodes: Vec::new(),
            store: Arc::new(DataRowStore::new(DEFAULT_SNAPSHOT_CACHE_SIZE)),
            query_cache: QueryCache::new(DEFAULT_QUERY_CACHE_SIZE),
            events: Arc::new(EventManager::new()),
            callbacks: Arc::new(CallbackRegistry::new()),
            pk_generator: PkGenerator::new(DEFAULT_PK_CACHE_SIZE),
            sorter,
            context_options: ContextOptions::default(),
        })
    }

    pub fn with_node(mut self, node: DataNode) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn with_snapshot_cache_size(mut self, size: usize) -> Self {
        self.store = Arc::new(DataRowStore::new(size));
        self
    }

    pub fn with_query_cache_size(mut self, size: usize) -> Self {
        self.query_cache = QueryCache::new(size);
        self
    }

    pub fn with_pk_cache_size(mut self, size: i64) -> Self {
        self.pk_generator = PkGenerator::new(size);
        self
    }

    pub fn with_context_options(mut self, options: ContextOptions) -> Self {
        self.context_options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Arc<DataNode>] {
        &self.nodes
    }

    pub fn query_cache(&self) -> &QueryCache {
        &self.query_cache
    }

    pub fn pk_generator(&self) -> &PkGenerator {
        &self.pk_generator
    }

    /// New top-level context committing through this domain.
    pub fn create_context(self: &Arc<Self>) -> Arc<ObjectContext> {
        let channel: Arc<dyn DataChannel> = Arc::clone(self) as Arc<dyn DataChannel>;
        ObjectContext::with_options(channel, self.context_options)
    }

    // ════════════════════════════════════════════
    // Routing
    // ════════════════════════════════════════════

    /// Node serving the DataMap of an ObjEntity.
    pub fn node_for_entity(&self, obj_entity: &str) -> CayxResult<&DataNode> {
        let map = self.resolver.data_map_for(obj_entity)?;
        self.node_for_map(&map.name)
    }

    /// Node serving the DataMap that declares a table.
    pub fn node_for_table(&self, db_entity: &str) -> CayxResult<&DataNode> {
        let map = self
            .resolver
            .data_maps()
            .iter()
            .find(|m| m.db_entity(db_entity).is_some())
            .ok_or_else(|| CayxError::Configuration(format!("no DataMap declares table '{db_entity}'")))?;
        self.node_for_map(&map.name)
    }

    fn node_for_map(&self, map: &str) -> CayxResult<&DataNode> {
        if let Some(node) = self.nodes.iter().find(|n| n.serves(map)) {
            return Ok(node);
        }
        match self.nodes.as_slice() {
            [only] => Ok(only),
            _ => Err(CayxError::Configuration(format!(
                "domain '{}' has no DataNode for DataMap '{map}'",
                self.name
            ))),
        }
    }

    fn execute(&self, node: &DataNode, query: Query, tx: &mut Transaction) -> CayxResult<QueryResult> {
        let mut result = QueryResult::new();
        node.perform_queries(std::slice::from_ref(&query), &mut result, Some(tx));
        result.into_result()
    }

    // ════════════════════════════════════════════
    // Flush
    // ════════════════════════════════════════════

    fn check_read_only(&self, changes: &ChangeSet) -> CayxResult<()> {
        for diff in &changes.objects {
            if self.resolver.obj_entity(&diff.entity)?.read_only {
                let operation = match diff.operation {
                    DiffOperation::Insert => "insert",
                    DiffOperation::Update => "update",
                    DiffOperation::Delete => "delete",
                };
                return Err(CayxError::ReadOnlyEntity {
                    entity: diff.entity.clone(),
                    operation: operation.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Insert rows of every new object, with keys generated ahead of the
    /// commit transaction where cayx owns the key.
    fn insert_rows(&self, changes: &ChangeSet) -> CayxResult<Vec<(usize, DataRow)>> {
        let mut rows = Vec::new();
        for (i, diff) in changes.objects.iter().enumerate() {
            if diff.operation != DiffOperation::Insert {
                continue;
            }
            let db = self.resolver.db_entity_for(&diff.entity)?;
            let mut row = diff.id.to_row();
            for attr in self.resolver.attributes(&diff.entity)? {
                if !attr.is_flattened() {
                    let value = diff.attributes.get(&attr.name).cloned().unwrap_or_default();
                    if !(value.is_null() && row.contains(&attr.db_attribute_path)) {
                        row.insert(attr.db_attribute_path.clone(), value);
                    }
                }
            }
            if let Some(pk) = db.generated_pk_candidate() {
                if row.get(&pk.name).is_null() {
                    let node = self.node_for_table(&db.name)?;
                    let key = self.pk_generator.generate(node, &db.name)?;
                    row.insert(pk.name.clone(), key);
                }
            }
            rows.push((i, row));
        }
        Ok(rows)
    }

    #[instrument(skip_all, fields(domain = %self.name, tx = tx.id()))]
    fn flush(
        &self,
        changes: &ChangeSet,
        mut inserts: Vec<(usize, DataRow)>,
        tx: &mut Transaction,
    ) -> CayxResult<CommitResult> {
        let mut result = CommitResult::default();

        // masters first; a stable sort keeps the context's order within a table
        inserts.sort_by_key(|(i, _)| {
            self.resolver
                .db_entity_for(&changes.objects[*i].entity)
                .map_or(usize::MAX, |db| self.sorter.rank(&db.name))
        });
        let mut start = 0;
        while start < inserts.len() {
            let table = self.resolver.db_entity_for(&changes.objects[inserts[start].0].entity)?;
            let end = inserts[start..]
                .iter()
                .position(|(i, _)| {
                    self.resolver
                        .db_entity_for(&changes.objects[*i].entity)
                        .map_or(true, |db| db.name != table.name)
                })
                .map_or(inserts.len(), |n| start + n);
            self.insert_table(changes, table, &mut inserts[start..end], &mut result, tx)?;
            start = end;
        }

        self.flush_links(changes, &result, true, tx)?;
        self.flush_updates(changes, &mut result, tx)?;
        self.flush_links(changes, &result, false, tx)?;
        self.flush_deletes(changes, tx)?;
        Ok(result)
    }

    fn insert_table(
        &self,
        changes: &ChangeSet,
        table: &DbEntity,
        rows: &mut [(usize, DataRow)],
        result: &mut CommitResult,
        tx: &mut Transaction,
    ) -> CayxResult<()> {
        // pre-generated keys are final; a row may reference itself
        for (i, row) in rows.iter() {
            let diff = &changes.objects[*i];
            if diff.id.is_temporary() {
                if let Some(id) = row_object_id(&self.resolver, &diff.entity, row)? {
                    result.id_map.insert(diff.id.clone(), id);
                }
            }
        }

        // masters of a reflexive relationship go in an earlier batch than their dependents
        let mut pending: Vec<usize> = (0..rows.len()).collect();
        while !pending.is_empty() {
            let waiting_ids: HashSet<ObjectId> = pending
                .iter()
                .map(|n| changes.objects[rows[*n].0].id.clone())
                .collect();
            let (ready, waiting): (Vec<usize>, Vec<usize>) = pending
                .iter()
                .partition(|n| Self::foreign_keys_ready(table, &changes.objects[rows[**n].0], &waiting_ids));
            if ready.is_empty() {
                return Err(CayxError::invalid(
                    "rows reference each other in a cycle",
                    format!("table '{}'", table.name),
                ));
            }
            self.insert_wave(changes, table, rows, &ready, result, tx)?;
            pending = waiting;
        }
        tracing::debug!(table = %table.name, rows = rows.len(), "inserted");
        Ok(())
    }

    /// True when no related object of this table is still waiting for its insert.
    fn foreign_keys_ready(table: &DbEntity, diff: &ObjectDiff, waiting: &HashSet<ObjectId>) -> bool {
        diff.to_one.iter().all(|(rel_name, target)| match target {
            Some(target) if *target != diff.id && table.relationship(rel_name).is_some() => {
                !waiting.contains(target)
            }
            _ => true,
        })
    }

    fn insert_wave(
        &self,
        changes: &ChangeSet,
        table: &DbEntity,
        rows: &mut [(usize, DataRow)],
        wave: &[usize],
        result: &mut CommitResult,
        tx: &mut Transaction,
    ) -> CayxResult<()> {
        for n in wave {
            let (i, row) = &mut rows[*n];
            self.fill_foreign_keys(table, &changes.objects[*i], row, result)?;
        }
        let mut batch = InsertBatch::new(table.name.clone());
        for n in wave {
            batch = batch.row(rows[*n].1.clone());
        }
        let node = self.node_for_table(&table.name)?;
        let outcome = self.execute(node, Query::Insert(batch), tx)?;
        let keys = outcome.generated_keys();

        for (k, n) in wave.iter().enumerate() {
            let (i, row) = &mut rows[*n];
            if let Some(generated) = keys.get(k) {
                for (col, v) in generated.iter() {
                    row.insert(col.clone(), v.clone());
                }
            }
            let diff = &changes.objects[*i];
            let id = row_object_id(&self.resolver, &diff.entity, row)?.ok_or_else(|| {
                CayxError::invalid(
                    format!("no primary key value for new {}", diff.entity),
                    format!("table '{}'", table.name),
                )
            })?;
            if diff.id.is_temporary() {
                result.id_map.insert(diff.id.clone(), id.clone());
            }
            result.snapshots.insert(id, row.clone());
        }
        Ok(())
    }

    /// Copies the keys of related objects into the FK columns of a row.
    fn fill_foreign_keys(
        &self,
        table: &DbEntity,
        diff: &ObjectDiff,
        row: &mut DataRow,
        result: &CommitResult,
    ) -> CayxResult<()> {
        for (rel_name, target) in &diff.to_one {
            let Some(rel) = table.relationship(rel_name) else {
                continue;
            };
            match target {
                Some(target) => {
                    let key = permanent_key(result, target)?;
                    for j in &rel.joins {
                        row.insert(j.source.clone(), key.get(&j.target).cloned().unwrap_or_default());
                    }
                }
                None => {
                    for j in &rel.joins {
                        if !row.contains(&j.source) {
                            row.insert(j.source.clone(), Value::Null);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn flush_updates(&self, changes: &ChangeSet, result: &mut CommitResult, tx: &mut Transaction) -> CayxResult<()> {
        let mut batches: BTreeMap<(usize, String, bool), UpdateBatch> = BTreeMap::new();
        let mut applied = Vec::new();
        for diff in changes.objects.iter().filter(|d| d.operation == DiffOperation::Update) {
            let db = self.resolver.db_entity_for(&diff.entity)?;
            let mut values = DataRow::new();
            for (name, value) in &diff.attributes {
                let attr = self.resolver.require_attribute(&diff.entity, name)?;
                if !attr.is_flattened() {
                    values.insert(attr.db_attribute_path.clone(), value.clone());
                }
            }
            for (rel_name, target) in &diff.to_one {
                let Some(rel) = db.relationship(rel_name) else { continue };
                let key = match target {
                    Some(t) => Some(permanent_key(result, t)?),
                    None => None,
                };
                for j in &rel.joins {
                    let v = key.and_then(|k| k.get(&j.target)).cloned().unwrap_or_default();
                    values.insert(j.source.clone(), v);
                }
            }
            if values.is_empty() {
                continue;
            }
            let (qualifier, locking) = self.qualifier_for(diff, db)?;
            let rank = self.sorter.rank(&db.name);
            let batch = batches
                .entry((rank, db.name.clone(), locking))
                .or_insert_with(|| {
                    let batch = UpdateBatch::new(db.name.clone());
                    if locking { batch.locking() } else { batch }
                });
            batch.rows.push(UpdateRow {
                qualifier,
                values: values.clone(),
            });
            applied.push((diff.id.clone(), values));
        }
        for ((_, table, _), batch) in batches {
            let node = self.node_for_table(&table)?;
            self.execute(node, Query::Update(batch), tx)?;
        }
        // snapshots of updated objects are known only when the old row is cached
        for (id, values) in applied {
            if let Some(snapshot) = self.store.get(&id) {
                let mut row = snapshot.row.clone();
                for (col, v) in values.iter() {
                    row.insert(col.clone(), v.clone());
                }
                result.snapshots.insert(id, row);
            }
        }
        Ok(())
    }

    fn flush_deletes(&self, changes: &ChangeSet, tx: &mut Transaction) -> CayxResult<()> {
        let mut batches: BTreeMap<(std::cmp::Reverse<usize>, String, bool), DeleteBatch> = BTreeMap::new();
        for diff in changes.objects.iter().filter(|d| d.operation == DiffOperation::Delete) {
            if diff.id.is_temporary() {
                continue;
            }
            let db = self.resolver.db_entity_for(&diff.entity)?;
            let (qualifier, locking) = self.qualifier_for(diff, db)?;
            let key = (std::cmp::Reverse(self.sorter.rank(&db.name)), db.name.clone(), locking);
            let batch = batches.entry(key).or_insert_with(|| {
                let batch = DeleteBatch::new(db.name.clone());
                if locking { batch.locking() } else { batch }
            });
            batch.qualifiers.push(qualifier);
        }
        for ((_, table, _), batch) in batches {
            let node = self.node_for_table(&table)?;
            self.execute(node, Query::Delete(batch), tx)?;
        }
        Ok(())
    }

    /// PK values plus, for optimistic locking, the committed values of the
    /// locking attributes and relationships.
    fn qualifier_for(&self, diff: &ObjectDiff, db: &DbEntity) -> CayxResult<(DataRow, bool)> {
        let mut qualifier = diff.id.to_row();
        if qualifier.is_empty() {
            return Err(CayxError::invalid(
                format!("{} has no permanent id", diff.id),
                format!("table '{}'", db.name),
            ));
        }
        let entity = self.resolver.obj_entity(&diff.entity)?;
        if entity.lock_type != LockType::Optimistic {
            return Ok((qualifier, false));
        }
        for attr in self.resolver.attributes(&diff.entity)? {
            if attr.used_for_locking && !attr.is_flattened() {
                let v = diff.committed_attributes.get(&attr.name).cloned().unwrap_or_default();
                qualifier.insert(attr.db_attribute_path.clone(), v);
            }
        }
        for rel in self.resolver.relationships(&diff.entity)? {
            if !rel.used_for_locking || rel.is_flattened() {
                continue;
            }
            let Some(db_rel) = db.relationship(&rel.db_relationship_path).filter(|r| r.is_to_master()) else {
                continue;
            };
            let target = diff.committed_to_one.get(&db_rel.name).cloned().flatten();
            let key = target.as_ref().and_then(ObjectId::id_snapshot);
            for j in &db_rel.joins {
                let v = key.and_then(|k| k.get(&j.target)).cloned().unwrap_or_default();
                qualifier.insert(j.source.clone(), v);
            }
        }
        Ok((qualifier, true))
    }

    fn flush_links(
        &self,
        changes: &ChangeSet,
        result: &CommitResult,
        insert: bool,
        tx: &mut Transaction,
    ) -> CayxResult<()> {
        let mut inserts: BTreeMap<String, InsertBatch> = BTreeMap::new();
        let mut deletes: BTreeMap<String, DeleteBatch> = BTreeMap::new();
        for link in changes.links.iter().filter(|l| l.insert == insert) {
            let (table, row) = self.link_row(link, result)?;
            if insert {
                let batch = inserts
                    .entry(table.clone())
                    .or_insert_with(|| InsertBatch::new(table));
                batch.rows.push(row);
            } else {
                let batch = deletes
                    .entry(table.clone())
                    .or_insert_with(|| DeleteBatch::new(table));
                batch.qualifiers.push(row);
            }
        }
        for (table, batch) in inserts {
            self.execute(self.node_for_table(&table)?, Query::Insert(batch), tx)?;
        }
        for (table, batch) in deletes {
            self.execute(self.node_for_table(&table)?, Query::Delete(batch), tx)?;
        }
        Ok(())
    }

    /// Link table row joining the two objects of a flattened relationship.
    fn link_row(&self, link: &LinkDiff, result: &CommitResult) -> CayxResult<(String, DataRow)> {
        let source = self.resolver.obj_entity(&link.source_entity)?;
        let rel = self.resolver.require_relationship(&source.name, &link.relationship)?;
        let hops = self.resolver.db_hops(&source.db_entity, &rel.db_relationship_path, false)?;
        let [to_link, to_target] = hops.as_slice() else {
            return Err(CayxError::NotSupported(format!(
                "flattened relationship {}.{} must go through exactly one link table",
                source.name, rel.name
            )));
        };
        let source_key = permanent_key(result, &link.source)?;
        let target_key = permanent_key(result, &link.target)?;
        let mut row = DataRow::new();
        for j in &to_link.relationship.joins {
            row.insert(j.target.clone(), source_key.get(&j.source).cloned().unwrap_or_default());
        }
        for j in &to_target.relationship.joins {
            row.insert(j.source.clone(), target_key.get(&j.target).cloned().unwrap_or_default());
        }
        Ok((to_link.relationship.target.clone(), row))
    }

    /// Snapshot cache, shared cache and listeners after a successful commit.
    fn post_commit(&self, changes: &ChangeSet, result: &CommitResult) {
        let mut event = SnapshotEvent {
            source: Some(changes.context),
            ..Default::default()
        };
        for diff in &changes.objects {
            let id = result.resolve(&diff.id).clone();
            match diff.operation {
                DiffOperation::Delete => event.deleted.push(id),
                DiffOperation::Insert | DiffOperation::Update => match result.snapshots.get(&id) {
                    Some(row) => event.modified.push((id, row.clone())),
                    None => event.invalidated.push(id),
                },
            }
        }
        event.replaced = result
            .id_map
            .iter()
            .map(|(old, new)| (old.clone(), new.clone()))
            .collect();
        self.store.process(&event);
        self.query_cache.clear();
        self.events.post(Event::SnapshotChanged(Arc::new(event)));
        self.events.post(Event::ContextCommitted {
            context: changes.context,
        });
    }
}

/// Key of an object after this commit's inserts; temporary ids are an error.
fn permanent_key<'a>(result: &'a CommitResult, id: &'a ObjectId) -> CayxResult<&'a BTreeMap<String, Value>> {
    result.resolve(id).id_snapshot().ok_or_else(|| {
        CayxError::invalid(
            format!("related object {id} was not saved in this commit"),
            "foreign key",
        )
    })
}

impl DataChannel for DataDomain {
    fn entity_resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    fn event_manager(&self) -> &Arc<EventManager> {
        &self.events
    }

    fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    fn snapshot_store(&self) -> &Arc<DataRowStore> {
        &self.store
    }

    fn select_rows(&self, query: &SelectQuery) -> CayxResult<Vec<DataRow>> {
        let shared = query.cache_strategy == CacheStrategy::SharedCache;
        let key = shared.then(|| query.cache_key());
        if let Some(rows) = key.as_deref().and_then(|k| self.query_cache.get(k)) {
            return Ok(rows.as_ref().clone());
        }

        let node = self.node_for_entity(&query.root)?;
        let mut result = QueryResult::new();
        node.perform_queries(&[Query::Select(query.clone())], &mut result, None);
        let rows = result.into_rows()?;

        if !query.fetching_data_rows && !query.is_column_query() {
            for row in &rows {
                let entity = &self.resolver.entity_for_row(&query.root, row)?.name;
                if let Some(id) = row_object_id(&self.resolver, entity, row)? {
                    self.store.put(id, snapshot_row(&self.resolver, entity, row)?);
                }
            }
        }
        if let Some(key) = key {
            self.query_cache.put(key, query.cache_group.clone(), rows.clone());
        }
        Ok(rows)
    }

    fn snapshot(&self, id: &ObjectId) -> CayxResult<Option<DataRow>> {
        if let Some(snapshot) = self.store.get(id) {
            return Ok(Some(snapshot.row.clone()));
        }
        let Some(key) = id.id_snapshot() else {
            return Ok(None);
        };
        let root = root_entity(&self.resolver, id.entity_name())?;
        let query = SelectQuery::new(root).qualifier(Expression::match_all_db(key.iter()));
        Ok(self.select_rows(&query)?.into_iter().next())
    }

    #[instrument(skip_all, fields(domain = %self.name, context = changes.context, objects = changes.objects.len()))]
    fn commit_changes(
        &self,
        changes: &ChangeSet,
        _mode: CommitMode,
        tx: Option<&mut Transaction>,
    ) -> CayxResult<CommitResult> {
        if changes.is_empty() {
            return Ok(CommitResult::default());
        }
        self.check_read_only(changes)?;
        let inserts = self.insert_rows(changes)?;

        let result = match tx {
            Some(tx) => {
                let outcome = self.flush(changes, inserts, tx);
                if outcome.is_err() {
                    tx.set_rollback_only();
                }
                outcome
            }
            None => {
                let mut tx = Transaction::internal();
                let outcome = self
                    .flush(changes, inserts, &mut tx)
                    .and_then(|r| tx.commit().map(|()| r));
                if outcome.is_err() {
                    if let Err(e) = tx.rollback() {
                        tracing::warn!(error = %e, "rollback after failed commit failed");
                    }
                }
                outcome
            }
        }
        .map_err(CayxError::commit)?;

        self.post_commit(changes, &result);
        tracing::info!(
            inserted = changes.count(DiffOperation::Insert),
            updated = changes.count(DiffOperation::Update),
            deleted = changes.count(DiffOperation::Delete),
            "commit flushed"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for DataDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataDomain")
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("snapshots", &self.store.len())
            .finish()
    }
}
