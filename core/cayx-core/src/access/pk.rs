//! PkGenerator — AUTO_PK_SUPPORT 테이블 기반 키 범위 할당
//!
//! 테이블마다 `cache_size` 개의 키 범위를 한 번에 예약하고 메모리에서 나눠 줍니다.
//! 범위 예약은 커밋 트랜잭션과 분리된 짧은 트랜잭션에서 실행되므로, 커밋이
//! 롤백되어도 예약된 키는 재사용되지 않습니다.

use crate::access::node::DataNode;
use crate::access::observer::QueryResult;
use crate::access::transaction::Transaction;
use crate::error::{CayxError, CayxResult};
use crate::query::{Query, RawQuery};
use crate::translator::ddl::{AUTO_PK_INITIAL_VALUE, AUTO_PK_TABLE};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Default number of keys reserved per round trip.
pub const DEFAULT_PK_CACHE_SIZE: i64 = 20;

const MAX_RESERVE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy)]
struct KeyRange {
    next: i64,
    /// exclusive
    end: i64,
}

/// 테이블별 키 생성기
#[derive(Debug)]
pub struct PkGenerator {
    cache_size: i64,
    ranges: Mutex<HashMap<String, KeyRange>>,
}

impl Default for PkGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PK_CACHE_SIZE)
    }
}

impl PkGenerator {
    pub fn new(cache_size: i64) -> Self {
        Self {
            cache_size: cache_size.max(1),
            ranges: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache_size(&self) -> i64 {
        self.cache_size
    }

    /// Next key of `table`, reserving a new range through `node` when the
    /// cached one is used up.
    pub fn generate(&self, node: &DataNode, table: &str) -> CayxResult<i64> {
        let mut ranges = self.ranges.lock();
        if let Some(range) = ranges.get_mut(table) {
            if range.next < range.end {
                let key = range.next;
                range.next += 1;
                return Ok(key);
            }
        }
        let start = self.reserve(node, table)?;
        ranges.insert(
            table.to_string(),
            KeyRange {
                next: start + 1,
                end: start + self.cache_size,
            },
        );
        Ok(start)
    }

    /// Forgets cached ranges (after the key table was recreated).
    pub fn reset(&self) {
        self.ranges.lock().clear();
    }

    fn reserve(&self, node: &DataNode, table: &str) -> CayxResult<i64> {
        let adapter = node.adapter();
        let pk_table = adapter.quote(AUTO_PK_TABLE);
        let table_col = adapter.quote("TABLE_NAME");
        let next_col = adapter.quote("NEXT_ID");

        for attempt in 0..MAX_RESERVE_ATTEMPTS {
            let mut tx = Transaction::internal();
            let select = Query::Raw(
                RawQuery::select(format!(
                    "SELECT {next_col} FROM {pk_table} WHERE {table_col} = ?"
                ))
                .bind(table),
            );
            let mut result = QueryResult::new();
            node.perform_queries(&[select], &mut result, Some(&mut tx));
            let rows = result.into_rows()?;

            let (start, reserve) = match rows.first() {
                None => {
                    let seed = RawQuery::execute(format!(
                        "INSERT INTO {pk_table} ({table_col}, {next_col}) VALUES (?, ?)"
                    ))
                    .bind(table)
                    .bind(AUTO_PK_INITIAL_VALUE + self.cache_size);
                    (AUTO_PK_INITIAL_VALUE, Query::Raw(seed))
                }
                Some(row) => {
                    let start = row
                        .iter()
                        .next()
                        .and_then(|(_, v)| v.as_i64())
                        .ok_or_else(|| {
                            CayxError::Configuration(format!(
                                "{AUTO_PK_TABLE} has no usable NEXT_ID for '{table}'"
                            ))
                        })?;
                    // conditional on the value just read, so concurrent reservations
                    // can't hand out the same range
                    let update = RawQuery::execute(format!(
                        "UPDATE {pk_table} SET {next_col} = ? WHERE {table_col} = ? AND {next_col} = ?"
                    ))
                    .bind(start + self.cache_size)
                    .bind(table)
                    .bind(start);
                    (start, Query::Raw(update))
                }
            };

            let mut result = QueryResult::new();
            node.perform_queries(&[reserve], &mut result, Some(&mut tx));
            let result = match result.into_result() {
                Ok(r) => r,
                Err(e) => {
                    tx.rollback()?;
                    return Err(e);
                }
            };
            if result.counts().first() == Some(&1) {
                tx.commit()?;
                tracing::debug!(table, start, size = self.cache_size, "reserved key range");
                return Ok(start);
            }
            tx.rollback()?;
            tracing::debug!(table, attempt, "key range taken concurrently, retrying");
        }
        Err(CayxError::invalid(
            format!("couldn't reserve a key range after {MAX_RESERVE_ATTEMPTS} attempts"),
            format!("table '{table}'"),
        ))
    }
}
