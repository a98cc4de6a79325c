//! DataNode — 하나의 데이터 소스에 대한 쿼리 실행기
//!
//! `perform_queries` 호출 하나는 최대 하나의 커넥션을 사용합니다. 커넥션은
//! [`Transaction`]이 소유하고, 트랜잭션이 끝나거나 drop 될 때 풀로 돌아갑니다.
//! 실행 중 실패는 반환되지 않고 observer의 `next_global_exception` 으로 전달됩니다.

use crate::access::connection::{Connection, DataSource};
use crate::access::observer::OperationObserver;
use crate::access::row_reader::RowReader;
use crate::access::transaction::Transaction;
use crate::dba::DbAdapter;
use crate::error::{CayxError, CayxResult};
use crate::logging::SQL_TARGET;
use crate::map::EntityResolver;
use crate::query::{DeleteBatch, InsertBatch, Query, RawQuery, SelectQuery, UpdateBatch};
use crate::row::DataRow;
use crate::translator::{BatchTranslator, SchemaGenerator, SelectTranslator};
use crate::value::Value;
use std::sync::Arc;
use tracing::instrument;

/// 데이터 노드
#[derive(Debug, Clone)]
pub struct DataNode {
    name: String,
    data_source: Arc<dyn DataSource>,
    adapter: Arc<dyn DbAdapter>,
    resolver: Arc<EntityResolver>,
    data_maps: Vec<String>,
}

impl DataNode {
    pub fn new(
        name: impl Into<String>,
        data_source: Arc<dyn DataSource>,
        adapter: Arc<dyn DbAdapter>,
        resolver: Arc<EntityResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            data_source,
            adapter,
            resolver,
            data_maps: Vec::new(),
        }
    }

    /// Serves the queries of the named DataMap.
    pub fn with_data_map(mut self, data_map: impl Into<String>) -> Self {
        self.data_maps.push(data_map.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn adapter(&self) -> &dyn DbAdapter {
        self.adapter.as_ref()
    }

    pub fn data_source(&self) -> &dyn DataSource {
        self.data_source.as_ref()
    }

    pub fn data_maps(&self) -> &[String] {
        &self.data_maps
    }

    pub fn serves(&self, data_map: &str) -> bool {
        self.data_maps.iter().any(|m| m == data_map)
    }

    // ════════════════════════════════════════════
    // Execution
    // ════════════════════════════════════════════

    /// 쿼리 목록을 순서대로 실행합니다.
    ///
    /// 활성 트랜잭션이 주어지면 그 트랜잭션에 참여하고, 실패 시 rollback-only로
    /// 표시합니다. 주어지지 않으면 내부 트랜잭션을 열고 직접 커밋/롤백합니다.
    #[instrument(skip_all, fields(node = %self.name, queries = queries.len()))]
    pub fn perform_queries(
        &self,
        queries: &[Query],
        observer: &mut dyn OperationObserver,
        tx: Option<&mut Transaction>,
    ) {
        if queries.len() > 1 && observer.is_iterated_result() {
            observer.next_global_exception(CayxError::Configuration(format!(
                "iterated results are only supported for a single query, got {}",
                queries.len()
            )));
            return;
        }
        if queries.is_empty() {
            return;
        }

        match tx {
            Some(tx) if tx.is_active() => {
                if let Err(e) = self.run_all(queries, observer, tx) {
                    tx.set_rollback_only();
                    observer.next_global_exception(e);
                }
            }
            Some(tx) => observer.next_global_exception(CayxError::invalid(
                format!("transaction is {:?}", tx.status()),
                format!("node '{}'", self.name),
            )),
            None => {
                let mut tx = Transaction::internal();
                let outcome = self
                    .run_all(queries, observer, &mut tx)
                    .and_then(|()| tx.commit());
                if let Err(e) = outcome {
                    if let Err(rollback_err) = tx.rollback() {
                        tracing::warn!(error = %rollback_err, "rollback after failure failed");
                    }
                    observer.next_global_exception(e);
                }
            }
        }
    }

    fn run_all(
        &self,
        queries: &[Query],
        observer: &mut dyn OperationObserver,
        tx: &mut Transaction,
    ) -> CayxResult<()> {
        let conn = tx.connection(&self.name, self.data_source.as_ref())?;
        for query in queries {
            match query {
                Query::Select(q) => self.run_select(conn, query, q, observer)?,
                Query::Insert(b) => self.run_insert(conn, query, b, observer)?,
                Query::Update(b) => self.run_update(conn, query, b, observer)?,
                Query::Delete(b) => self.run_delete(conn, query, b, observer)?,
                Query::Raw(r) => self.run_raw(conn, query, r, observer)?,
            }
        }
        Ok(())
    }

    fn run_select(
        &self,
        conn: &mut dyn Connection,
        query: &Query,
        select: &SelectQuery,
        observer: &mut dyn OperationObserver,
    ) -> CayxResult<()> {
        let translated =
            SelectTranslator::new(select, &self.resolver, self.adapter.as_ref()).create_sql()?;
        log_sql(&translated.sql, &translated.bindings);
        let mut reader = RowReader::new(&translated);

        if observer.is_iterated_result() {
            let mut count = 0usize;
            conn.query(&translated.sql, &translated.bindings, &mut |_, values| {
                if let Some(row) = reader.read(values)? {
                    count += 1;
                    observer.next_row(query, row);
                }
                Ok(())
            })?;
            tracing::debug!(target: SQL_TARGET, rows = count, "iterated");
            return Ok(());
        }

        let mut rows = Vec::new();
        conn.query(&translated.sql, &translated.bindings, &mut |_, values| {
            if let Some(row) = reader.read(values)? {
                rows.push(row);
            }
            Ok(())
        })?;
        tracing::debug!(target: SQL_TARGET, rows = rows.len(), "fetched");
        observer.next_rows(query, rows);
        Ok(())
    }

    fn run_insert(
        &self,
        conn: &mut dyn Connection,
        query: &Query,
        batch: &InsertBatch,
        observer: &mut dyn OperationObserver,
    ) -> CayxResult<()> {
        let entity = self.resolver.db_entity(&batch.db_entity)?;
        let translator = BatchTranslator::new(self.adapter.as_ref());
        let generated: Vec<&str> = entity
            .primary_key()
            .filter(|a| a.generated)
            .map(|a| a.name.as_str())
            .collect();

        let mut keys = Vec::with_capacity(batch.rows.len());
        let mut any_key = false;
        for row in &batch.rows {
            let stmt = translator.insert(entity, row)?;
            log_sql(&stmt.sql, &stmt.bindings);
            conn.execute(&stmt.sql, &stmt.bindings)?;

            let mut key = DataRow::new();
            // only a single generated column can be read back
            if let [column] = generated.as_slice() {
                if row.get(column).is_null() && self.adapter.supports_generated_keys() {
                    if let Some(v) = conn.last_generated_key()? {
                        key.insert(*column, v);
                        any_key = true;
                    }
                }
            }
            keys.push(key);
        }
        observer.next_count(query, batch.rows.len());
        if any_key {
            observer.next_generated_keys(query, keys);
        }
        Ok(())
    }

    fn run_update(
        &self,
        conn: &mut dyn Connection,
        query: &Query,
        batch: &UpdateBatch,
        observer: &mut dyn OperationObserver,
    ) -> CayxResult<()> {
        let entity = self.resolver.db_entity(&batch.db_entity)?;
        let translator = BatchTranslator::new(self.adapter.as_ref());
        let mut total = 0;
        for row in &batch.rows {
            let stmt = translator.update(entity, row)?;
            log_sql(&stmt.sql, &stmt.bindings);
            let count = conn.execute(&stmt.sql, &stmt.bindings)?;
            if batch.optimistic_locking && count != 1 {
                return Err(CayxError::OptimisticLock {
                    entity: entity.name.clone(),
                    message: format!("{count} rows updated for snapshot {:?}", row.qualifier),
                });
            }
            total += count;
        }
        observer.next_count(query, total);
        Ok(())
    }

    fn run_delete(
        &self,
        conn: &mut dyn Connection,
        query: &Query,
        batch: &DeleteBatch,
        observer: &mut dyn OperationObserver,
    ) -> CayxResult<()> {
        let entity = self.resolver.db_entity(&batch.db_entity)?;
        let translator = BatchTranslator::new(self.adapter.as_ref());
        let mut total = 0;
        for qualifier in &batch.qualifiers {
            let stmt = translator.delete(entity, qualifier)?;
            log_sql(&stmt.sql, &stmt.bindings);
            let count = conn.execute(&stmt.sql, &stmt.bindings)?;
            if batch.optimistic_locking && count != 1 {
                return Err(CayxError::OptimisticLock {
                    entity: entity.name.clone(),
                    message: format!("{count} rows deleted for snapshot {qualifier:?}"),
                });
            }
            total += count;
        }
        observer.next_count(query, total);
        Ok(())
    }

    fn run_raw(
        &self,
        conn: &mut dyn Connection,
        query: &Query,
        raw: &RawQuery,
        observer: &mut dyn OperationObserver,
    ) -> CayxResult<()> {
        log_sql(&raw.sql, &raw.bindings);
        if raw.returns_rows {
            let mut rows = Vec::new();
            conn.query(&raw.sql, &raw.bindings, &mut |labels, values| {
                rows.push(labels.iter().cloned().zip(values).collect::<DataRow>());
                Ok(())
            })?;
            observer.next_rows(query, rows);
        } else {
            let count = conn.execute(&raw.sql, &raw.bindings)?;
            observer.next_count(query, count);
        }
        Ok(())
    }

    // ════════════════════════════════════════════
    // Schema
    // ════════════════════════════════════════════

    /// Creates the schema of every mapped table (and the key-range table)
    /// in one transaction.
    pub fn create_schema(&self, drop_first: bool) -> CayxResult<()> {
        let mut generator = SchemaGenerator::new(&self.resolver, self.adapter.as_ref());
        if drop_first {
            generator = generator.with_drop();
        }
        let queries: Vec<Query> = generator
            .statements()?
            .into_iter()
            .map(|sql| Query::Raw(RawQuery::execute(sql)))
            .collect();
        tracing::info!(node = %self.name, statements = queries.len(), "creating schema");

        let mut result = crate::access::observer::QueryResult::new();
        self.perform_queries(&queries, &mut result, None);
        result.into_result().map(|_| ())
    }
}

fn log_sql(sql: &str, bindings: &[Value]) {
    if bindings.is_empty() {
        tracing::debug!(target: SQL_TARGET, "{sql}");
    } else {
        let values: Vec<String> = bindings.iter().map(Value::to_sql_literal).collect();
        tracing::debug!(target: SQL_TARGET, bindings = %values.join(", "), "{sql}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::observer::QueryResult;
    use crate::access::sqlite::SqliteDataSource;
    use crate::dba::{QuotingStrategy, SqliteAdapter};
    use crate::exp::Expression;
    use crate::test_fixtures::resolver;

    struct Iterated(QueryResult);

    impl OperationObserver for Iterated {
        fn next_rows(&mut self, query: &Query, rows: Vec<DataRow>) {
            self.0.next_rows(query, rows);
        }
        fn next_count(&mut self, query: &Query, count: usize) {
            self.0.next_count(query, count);
        }
        fn next_global_exception(&mut self, error: CayxError) {
            self.0.next_global_exception(error);
        }
        fn is_iterated_result(&self) -> bool {
            true
        }
    }

    fn node() -> (DataNode, Arc<SqliteDataSource>) {
        let ds = Arc::new(SqliteDataSource::in_memory(2).unwrap());
        let node = DataNode::new(
            "node",
            ds.clone(),
            Arc::new(SqliteAdapter::new(QuotingStrategy::default())),
            Arc::new(resolver()),
        )
        .with_data_map("testmap");
        node.create_schema(false).unwrap();
        (node, ds)
    }

    fn insert_artist(node: &DataNode, id: i64, name: &str) {
        let q = Query::Insert(
            InsertBatch::new("ARTIST").row(DataRow::new().with("ARTIST_ID", id).with("ARTIST_NAME", name)),
        );
        let mut result = QueryResult::new();
        node.perform_queries(&[q], &mut result, None);
        result.into_result().unwrap();
    }

    #[test]
    fn test_insert_then_select_trims_char() {
        let (node, ds) = node();
        insert_artist(&node, 1, "Monet");
        let q = Query::Select(SelectQuery::new("Artist").qualifier(Expression::match_path("artistName", "Monet")));
        let mut result = QueryResult::new();
        node.perform_queries(&[q], &mut result, None);
        let rows = result.into_rows().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ARTIST_NAME"), &Value::from("Monet"));
        assert_eq!(ds.stats().in_use, 0);
    }

    #[test]
    fn test_iterated_multi_query_rejected_before_checkout() {
        let (node, ds) = node();
        let before = ds.stats().checkouts;
        let q = Query::Select(SelectQuery::new("Artist"));
        let mut observer = Iterated(QueryResult::new());
        node.perform_queries(&[q.clone(), q], &mut observer, None);
        assert!(matches!(observer.0.error(), Some(CayxError::Configuration(_))));
        assert_eq!(ds.stats().checkouts, before);
    }

    #[test]
    fn test_failure_rolls_back_and_releases_connection() {
        let (node, ds) = node();
        let good = Query::Insert(
            InsertBatch::new("ARTIST").row(DataRow::new().with("ARTIST_ID", 1).with("ARTIST_NAME", "a")),
        );
        let bad = Query::Raw(RawQuery::execute("INSERT INTO NO_SUCH_TABLE VALUES (1)"));
        let mut result = QueryResult::new();
        node.perform_queries(&[good, bad], &mut result, None);
        assert!(result.error().is_some());
        assert_eq!(ds.stats().in_use, 0);

        let mut check = QueryResult::new();
        node.perform_queries(&[Query::Select(SelectQuery::new("Artist"))], &mut check, None);
        assert!(check.into_rows().unwrap().is_empty());
    }

    #[test]
    fn test_external_transaction_participation() {
        let (node, _ds) = node();
        let mut tx = Transaction::external();
        let insert = Query::Insert(
            InsertBatch::new("ARTIST").row(DataRow::new().with("ARTIST_ID", 5).with("ARTIST_NAME", "x")),
        );
        let mut result = QueryResult::new();
        node.perform_queries(&[insert], &mut result, Some(&mut tx));
        assert!(result.error().is_none());
        assert!(tx.is_active());
        tx.rollback().unwrap();

        let mut check = QueryResult::new();
        node.perform_queries(&[Query::Select(SelectQuery::new("Artist"))], &mut check, None);
        assert!(check.into_rows().unwrap().is_empty());
    }

    #[test]
    fn test_generated_keys_reported() {
        let (node, _ds) = node();
        let q = Query::Insert(
            InsertBatch::new("GALLERY")
                .row(DataRow::new().with("GALLERY_ID", Value::Null).with("GALLERY_NAME", "g1"))
                .row(DataRow::new().with("GALLERY_ID", Value::Null).with("GALLERY_NAME", "g2")),
        );
        let mut result = QueryResult::new();
        node.perform_queries(&[q], &mut result, None);
        let result = result.into_result().unwrap();
        let keys = result.generated_keys();
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0].get("GALLERY_ID"), keys[1].get("GALLERY_ID"));
    }

    #[test]
    fn test_optimistic_lock_failure() {
        let (node, _ds) = node();
        insert_artist(&node, 1, "a");
        let q = Query::Update(
            UpdateBatch::new("ARTIST")
                .row(
                    DataRow::new().with("ARTIST_ID", 1).with("ARTIST_NAME", "stale"),
                    DataRow::new().with("ARTIST_NAME", "b"),
                )
                .locking(),
        );
        let mut result = QueryResult::new();
        node.perform_queries(&[q], &mut result, None);
        assert!(matches!(result.error(), Some(CayxError::OptimisticLock { .. })));
    }
}
