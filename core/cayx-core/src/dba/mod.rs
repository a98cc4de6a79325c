//! DbAdapter — 데이터베이스별 SQL 방언
//!
//! 식별자 인용, DDL 타입 이름, LIMIT/OFFSET, 스키마 DDL 생성을 담당합니다.
//! 번역기는 이 trait만 보고 SQL을 만듭니다.

pub mod jdbc;
pub mod sqlite;

pub use jdbc::JdbcAdapter;
pub use sqlite::SqliteAdapter;

use crate::error::{CayxError, CayxResult};
use crate::map::{DbAttribute, DbEntity, DbRelationship, EntityResolver};
use crate::translator::ddl;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 식별자 인용 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotingStrategy {
    pub enabled: bool,
    pub start: String,
    pub end: String,
}

impl Default for QuotingStrategy {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "\"".to_string(),
            end: "\"".to_string(),
        }
    }
}

impl QuotingStrategy {
    pub fn quoted() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn quote(&self, identifier: &str) -> String {
        if self.enabled {
            format!("{}{identifier}{}", self.start, self.end)
        } else {
            identifier.to_string()
        }
    }
}

/// SQL 방언 전략
pub trait DbAdapter: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn quoting(&self) -> &QuotingStrategy;

    fn quote(&self, identifier: &str) -> String {
        self.quoting().quote(identifier)
    }

    /// Quoted, schema-qualified table name.
    fn table_name(&self, entity: &DbEntity) -> String {
        match &entity.schema {
            Some(schema) => format!("{}.{}", self.quote(schema), self.quote(&entity.name)),
            None => self.quote(&entity.name),
        }
    }

    /// DDL type of a column, with length/scale where the type takes one.
    fn type_name(&self, attribute: &DbAttribute) -> String {
        let base = attribute.jdbc_type.sql_name();
        match (attribute.jdbc_type.takes_length(), attribute.max_length) {
            (true, Some(len)) => format!("{base}({len})"),
            _ => match (attribute.jdbc_type.is_numeric(), attribute.max_length, attribute.scale) {
                (true, Some(p), Some(s)) => format!("{base}({p}, {s})"),
                _ => base.to_string(),
            },
        }
    }

    fn supports_batch_updates(&self) -> bool {
        true
    }

    /// FKs can be added with `ALTER TABLE`; otherwise they are inlined in `CREATE TABLE`.
    fn supports_fk_via_alter(&self) -> bool {
        true
    }

    fn supports_generated_keys(&self) -> bool {
        true
    }

    /// Column clause for a DB-generated key.
    fn identity_clause(&self) -> &'static str {
        "GENERATED BY DEFAULT AS IDENTITY"
    }

    /// `identity_clause` already declares the column as the primary key.
    fn identity_declares_pk(&self) -> bool {
        false
    }

    /// Pagination clause appended after ORDER BY, if any.
    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> Option<String>;

    fn create_table(&self, entity: &DbEntity, resolver: &EntityResolver) -> CayxResult<String> {
        ddl::create_table(self, entity, resolver, false)
    }

    fn drop_table(&self, entity: &DbEntity) -> Vec<String> {
        vec![ddl::drop_table(self, entity)]
    }

    fn create_fk(
        &self,
        entity: &DbEntity,
        relationship: &DbRelationship,
        resolver: &EntityResolver,
    ) -> CayxResult<Option<String>> {
        ddl::create_fk(self, entity, relationship, resolver)
    }

    fn create_unique(&self, entity: &DbEntity, columns: &[String]) -> String {
        ddl::create_unique(self, entity, columns)
    }
}

/// 이름으로 어댑터를 찾습니다 (`generic`, `sqlite`).
pub fn adapter_for(name: &str, quoting: QuotingStrategy) -> CayxResult<Arc<dyn DbAdapter>> {
    match name.to_ascii_lowercase().as_str() {
        "generic" | "jdbc" => Ok(Arc::new(JdbcAdapter::new(quoting))),
        "sqlite" => Ok(Arc::new(SqliteAdapter::new(quoting))),
        other => Err(CayxError::Configuration(format!(
            "unmapped DbAdapter '{other}'"
        ))),
    }
}
