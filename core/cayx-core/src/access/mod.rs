//! 데이터 접근 계층
//!
//! 커넥션 풀, 명시적 트랜잭션, 쿼리 실행기([`DataNode`]), PK 생성, 스냅샷 캐시,
//! 그리고 이들을 묶는 [`DataDomain`]으로 구성됩니다.

pub mod connection;
pub mod domain;
pub mod node;
pub mod observer;
pub mod pk;
pub mod row_reader;
pub mod snapshot;
pub mod sqlite;
pub mod transaction;

pub use connection::{Connection, ConnectionPool, DataSource, PoolStats, PooledConnection, RowHandler};
pub use domain::{DEFAULT_QUERY_CACHE_SIZE, DataDomain};
pub use node::DataNode;
pub use observer::{OperationObserver, QueryOutcome, QueryResult};
pub use pk::{DEFAULT_PK_CACHE_SIZE, PkGenerator};
pub use row_reader::{RowReader, prefetched_row, root_row};
pub use snapshot::{DEFAULT_SNAPSHOT_CACHE_SIZE, DataRowStore, Snapshot, SnapshotEvent};
pub use sqlite::{SqliteConnection, SqliteDataSource};
pub use transaction::{Transaction, TransactionStatus};
