//! SQLite 어댑터
//!
//! SQLite는 `ALTER TABLE ... ADD FOREIGN KEY` 를 지원하지 않으므로 FK 제약을
//! `CREATE TABLE` 안에 함께 선언합니다.

use crate::dba::{DbAdapter, QuotingStrategy};
use crate::error::CayxResult;
use crate::map::{DbAttribute, DbEntity, EntityResolver, JdbcType};
use crate::translator::ddl;

#[derive(Debug, Clone, Default)]
pub struct SqliteAdapter {
    quoting: QuotingStrategy,
}

impl SqliteAdapter {
    pub fn new(quoting: QuotingStrategy) -> Self {
        Self { quoting }
    }
}

impl DbAdapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quoting(&self) -> &QuotingStrategy {
        &self.quoting
    }

    fn type_name(&self, attribute: &DbAttribute) -> String {
        match attribute.jdbc_type {
            // INTEGER PRIMARY KEY is the rowid alias required for AUTOINCREMENT
            _ if attribute.generated => "INTEGER".to_string(),
            JdbcType::Binary | JdbcType::VarBinary | JdbcType::LongVarBinary | JdbcType::Blob => {
                "BLOB".to_string()
            }
            JdbcType::Clob | JdbcType::NClob | JdbcType::LongVarchar => "TEXT".to_string(),
            _ => {
                let base = attribute.jdbc_type.sql_name();
                match (attribute.jdbc_type.takes_length(), attribute.max_length) {
                    (true, Some(len)) => format!("{base}({len})"),
                    _ => base.to_string(),
                }
            }
        }
    }

    fn supports_fk_via_alter(&self) -> bool {
        false
    }

    fn identity_clause(&self) -> &'static str {
        "PRIMARY KEY AUTOINCREMENT"
    }

    fn identity_declares_pk(&self) -> bool {
        true
    }

    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {l}")),
            (None, Some(o)) => Some(format!("LIMIT -1 OFFSET {o}")),
            (Some(l), Some(o)) => Some(format!("LIMIT {l} OFFSET {o}")),
        }
    }

    fn create_table(&self, entity: &DbEntity, resolver: &EntityResolver) -> CayxResult<String> {
        ddl::create_table(self, entity, resolver, true)
    }

    // no ALTER TABLE ... ADD UNIQUE in SQLite
    fn create_unique(&self, entity: &DbEntity, columns: &[String]) -> String {
        format!(
            "CREATE UNIQUE INDEX {} ON {} ({})",
            self.quote(&format!("U_{}_{}", entity.name, columns.join("_"))),
            self.table_name(entity),
            columns
                .iter()
                .map(|c| self.quote(c))
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
