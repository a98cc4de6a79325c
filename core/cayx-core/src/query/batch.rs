//! 커밋 시 생성되는 INSERT/UPDATE/DELETE 배치와 원시 SQL 쿼리

use crate::row::DataRow;
use crate::value::Value;

/// 한 테이블에 대한 INSERT 묶음
#[derive(Debug, Clone, PartialEq)]
pub struct InsertBatch {
    pub db_entity: String,
    /// Column values per row; generated columns are omitted while `NULL`.
    pub rows: Vec<DataRow>,
}

/// UPDATE 한 건. `qualifier` 는 PK 컬럼과 잠금 컬럼의 스냅샷 값입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRow {
    pub qualifier: DataRow,
    pub values: DataRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateBatch {
    pub db_entity: String,
    pub rows: Vec<UpdateRow>,
    /// Zero rows updated is an optimistic lock failure.
    pub optimistic_locking: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteBatch {
    pub db_entity: String,
    pub qualifiers: Vec<DataRow>,
    pub optimistic_locking: bool,
}

/// 매핑을 거치지 않는 SQL 문 (스키마 생성, PK 테이블 갱신)
#[derive(Debug, Clone, PartialEq)]
pub struct RawQuery {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub returns_rows: bool,
}

impl InsertBatch {
    pub fn new(db_entity: impl Into<String>) -> Self {
        Self {
            db_entity: db_entity.into(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, row: DataRow) -> Self {
        self.rows.push(row);
        self
    }
}

impl UpdateBatch {
    pub fn new(db_entity: impl Into<String>) -> Self {
        Self {
            db_entity: db_entity.into(),
            rows: Vec::new(),
            optimistic_locking: false,
        }
    }

    pub fn row(mut self, qualifier: DataRow, values: DataRow) -> Self {
        self.rows.push(UpdateRow { qualifier, values });
        self
    }

    pub fn locking(mut self) -> Self {
        self.optimistic_locking = true;
        self
    }
}

impl DeleteBatch {
    pub fn new(db_entity: impl Into<String>) -> Self {
        Self {
            db_entity: db_entity.into(),
            qualifiers: Vec::new(),
            optimistic_locking: false,
        }
    }

    pub fn row(mut self, qualifier: DataRow) -> Self {
        self.qualifiers.push(qualifier);
        self
    }

    pub fn locking(mut self) -> Self {
        self.optimistic_locking = true;
        self
    }
}

impl RawQuery {
    pub fn execute(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
            returns_rows: false,
        }
    }

    pub fn select(sql: impl Into<String>) -> Self {
        Self {
            returns_rows: true,
            ..Self::execute(sql)
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.bindings.push(value.into());
        self
    }
}
