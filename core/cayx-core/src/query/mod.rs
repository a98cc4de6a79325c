//! 쿼리 모델 — SELECT, 배치, 정렬, 프리페치, 결과 캐시

pub mod batch;
pub mod cache;
pub mod ordering;
pub mod prefetch;
pub mod select;

pub use batch::{DeleteBatch, InsertBatch, RawQuery, UpdateBatch, UpdateRow};
pub use cache::{CacheStats, QueryCache};
pub use ordering::{Ordering, SortOrder};
pub use prefetch::{PrefetchSemantics, PrefetchTreeNode};
pub use select::{CacheStrategy, ResultColumn, SelectQuery};

/// DataNode가 실행하는 쿼리
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Select(SelectQuery),
    Insert(InsertBatch),
    Update(UpdateBatch),
    Delete(DeleteBatch),
    Raw(RawQuery),
}

impl Query {
    /// Short label used in logs and observer callbacks.
    pub fn label(&self) -> String {
        match self {
            Query::Select(q) => format!("select {}", q.root),
            Query::Insert(b) => format!("insert {}", b.db_entity),
            Query::Update(b) => format!("update {}", b.db_entity),
            Query::Delete(b) => format!("delete {}", b.db_entity),
            Query::Raw(r) => r.sql.clone(),
        }
    }
}

impl From<SelectQuery> for Query {
    fn from(q: SelectQuery) -> Self {
        Query::Select(q)
    }
}

impl From<RawQuery> for Query {
    fn from(q: RawQuery) -> Self {
        Query::Raw(q)
    }
}
