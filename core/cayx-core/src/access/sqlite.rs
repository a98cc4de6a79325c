//! SQLite DataSource (rusqlite)
//!
//! 인메모리 DB는 `file:cayx-mem-N?mode=memory&cache=shared` URI로 열어 풀의 모든
//! 커넥션이 같은 DB를 보게 합니다. 앵커 커넥션이 DB 수명을 붙잡고 있습니다.

use crate::access::connection::{
    Connection, ConnectionPool, DataSource, PoolStats, PooledConnection, RowHandler,
};
use crate::error::CayxResult;
use crate::value::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// rusqlite 커넥션 래퍼
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open(uri: &str) -> CayxResult<Self> {
        let conn = rusqlite::Connection::open(uri)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        Ok(Self { conn })
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, bindings: &[Value]) -> CayxResult<usize> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(rusqlite::params_from_iter(bindings.iter()))?)
    }

    fn query(&mut self, sql: &str, bindings: &[Value], on_row: &mut RowHandler<'_>) -> CayxResult<()> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(rusqlite::params_from_iter(bindings.iter()))?;
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                values.push(Value::from(row.get_ref(i)?));
            }
            on_row(&columns, values)?;
        }
        Ok(())
    }

    fn last_generated_key(&mut self) -> CayxResult<Option<Value>> {
        match self.conn.last_insert_rowid() {
            0 => Ok(None),
            id => Ok(Some(Value::Int(id))),
        }
    }

    fn begin(&mut self) -> CayxResult<()> {
        Ok(self.conn.execute_batch("BEGIN")?)
    }

    fn commit(&mut self) -> CayxResult<()> {
        Ok(self.conn.execute_batch("COMMIT")?)
    }

    fn rollback(&mut self) -> CayxResult<()> {
        Ok(self.conn.execute_batch("ROLLBACK")?)
    }

    fn reset(&mut self) -> CayxResult<()> {
        if !self.conn.is_autocommit() {
            tracing::warn!("connection returned inside a transaction, rolling back");
            self.conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

/// SQLite 커넥션 풀
pub struct SqliteDataSource {
    location: String,
    pool: ConnectionPool,
    // keeps a shared in-memory database alive while the pool is idle
    _anchor: Option<Mutex<rusqlite::Connection>>,
}

impl SqliteDataSource {
    /// Opens a file database, or a private in-memory one for `:memory:`.
    pub fn open(location: &str, max_connections: usize) -> CayxResult<Self> {
        let (uri, anchor) = if location.is_empty() || location == ":memory:" {
            let uri = format!(
                "file:cayx-mem-{}?mode=memory&cache=shared",
                MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed)
            );
            let anchor = rusqlite::Connection::open(&uri)?;
            (uri, Some(Mutex::new(anchor)))
        } else {
            (location.to_string(), None)
        };

        let factory_uri = uri.clone();
        let pool = ConnectionPool::new(uri, max_connections, move || {
            Ok(Box::new(SqliteConnection::open(&factory_uri)?) as Box<dyn Connection>)
        });
        tracing::info!(location, max_connections, "SQLite data source ready");
        Ok(Self {
            location: location.to_string(),
            pool,
            _anchor: anchor,
        })
    }

    pub fn in_memory(max_connections: usize) -> CayxResult<Self> {
        Self::open(":memory:", max_connections)
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

impl DataSource for SqliteDataSource {
    fn connection(&self) -> CayxResult<PooledConnection> {
        self.pool.checkout()
    }

    fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

impl fmt::Debug for SqliteDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDataSource")
            .field("location", &self.location)
            .field("pool", &self.pool)
            .finish()
    }
}
