//! 커넥션 추상화와 풀
//!
//! `DataNode`는 [`DataSource`]에서 커넥션을 빌려 쓰고, [`PooledConnection`]이
//! drop 될 때 풀로 돌아갑니다. 에러 경로에서도 반환이 보장됩니다.

use crate::error::{CayxError, CayxResult};
use crate::value::Value;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Row callback: column labels and the values of one row.
pub type RowHandler<'h> = dyn FnMut(&[String], Vec<Value>) -> CayxResult<()> + 'h;

/// 하나의 DB 커넥션
pub trait Connection: Send {
    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, bindings: &[Value]) -> CayxResult<usize>;

    /// Runs a query, calling `on_row` for every result row.
    fn query(&mut self, sql: &str, bindings: &[Value], on_row: &mut RowHandler<'_>) -> CayxResult<()>;

    /// Key generated by the last INSERT, if the database assigned one.
    fn last_generated_key(&mut self) -> CayxResult<Option<Value>>;

    fn begin(&mut self) -> CayxResult<()>;
    fn commit(&mut self) -> CayxResult<()>;
    fn rollback(&mut self) -> CayxResult<()>;

    /// Leaves the connection clean before it goes back to the pool.
    fn reset(&mut self) -> CayxResult<()> {
        Ok(())
    }
}

/// 커넥션 공급자
pub trait DataSource: Send + Sync + fmt::Debug {
    fn connection(&self) -> CayxResult<PooledConnection>;

    fn stats(&self) -> PoolStats;
}

/// 풀 사용 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections handed out since the pool was created
    pub checkouts: u64,
    /// Physical connections opened
    pub opened: usize,
    pub idle: usize,
    pub in_use: usize,
}

type ConnectionFactory = dyn Fn() -> CayxResult<Box<dyn Connection>> + Send + Sync;

struct PoolState {
    idle: Vec<Box<dyn Connection>>,
    opened: usize,
}

struct PoolShared {
    name: String,
    state: Mutex<PoolState>,
    available: Condvar,
    max_connections: usize,
    timeout: Duration,
    checkouts: AtomicU64,
    factory: Box<ConnectionFactory>,
}

/// 고정 크기 커넥션 풀
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    pub fn new(
        name: impl Into<String>,
        max_connections: usize,
        factory: impl Fn() -> CayxResult<Box<dyn Connection>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    opened: 0,
                }),
                available: Condvar::new(),
                max_connections: max_connections.max(1),
                timeout: Duration::from_secs(30),
                checkouts: AtomicU64::new(0),
                factory: Box::new(factory),
            }),
        }
    }

    /// Waits up to `timeout` for a free connection when the pool is exhausted.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Arc::try_unwrap(self.shared) {
            Ok(mut shared) => {
                shared.timeout = timeout;
                Self {
                    shared: Arc::new(shared),
                }
            }
            Err(shared) => Self { shared },
        }
    }

    pub fn checkout(&self) -> CayxResult<PooledConnection> {
        let shared = &self.shared;
        let mut state = shared.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                shared.checkouts.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection::new(conn, Arc::clone(shared)));
            }
            if state.opened < shared.max_connections {
                state.opened += 1;
                drop(state);
                return match (shared.factory)() {
                    Ok(conn) => {
                        shared.checkouts.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(pool = %shared.name, "opened connection");
                        Ok(PooledConnection::new(conn, Arc::clone(shared)))
                    }
                    Err(e) => {
                        shared.state.lock().opened -= 1;
                        Err(e)
                    }
                };
            }
            if shared
                .available
                .wait_for(&mut state, shared.timeout)
                .timed_out()
            {
                return Err(CayxError::invalid(
                    format!("no connection available after {:?}", shared.timeout),
                    format!("pool '{}' ({} connections)", shared.name, shared.max_connections),
                ));
            }
        }
    }
}

impl DataSource for ConnectionPool {
    fn connection(&self) -> CayxResult<PooledConnection> {
        self.checkout()
    }

    fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            checkouts: self.shared.checkouts.load(Ordering::Relaxed),
            opened: state.opened,
            idle: state.idle.len(),
            in_use: state.opened - state.idle.len(),
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.shared.name)
            .field("max_connections", &self.shared.max_connections)
            .field("stats", &self.stats())
            .finish()
    }
}

/// 풀에서 빌린 커넥션. drop 시 풀로 반환됩니다.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<PoolShared>,
}

impl PooledConnection {
    fn new(conn: Box<dyn Connection>, pool: Arc<PoolShared>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    fn inner(&mut self) -> CayxResult<&mut Box<dyn Connection>> {
        self.conn.as_mut().ok_or_else(|| {
            CayxError::invalid("connection already returned", format!("pool '{}'", self.pool.name))
        })
    }
}

impl Connection for PooledConnection {
    fn execute(&mut self, sql: &str, bindings: &[Value]) -> CayxResult<usize> {
        self.inner()?.execute(sql, bindings)
    }

    fn query(&mut self, sql: &str, bindings: &[Value], on_row: &mut RowHandler<'_>) -> CayxResult<()> {
        self.inner()?.query(sql, bindings, on_row)
    }

    fn last_generated_key(&mut self) -> CayxResult<Option<Value>> {
        self.inner()?.last_generated_key()
    }

    fn begin(&mut self) -> CayxResult<()> {
        self.inner()?.begin()
    }

    fn commit(&mut self) -> CayxResult<()> {
        self.inner()?.commit()
    }

    fn rollback(&mut self) -> CayxResult<()> {
        self.inner()?.rollback()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let mut state = self.pool.state.lock();
        match conn.reset() {
            Ok(()) => state.idle.push(conn),
            Err(e) => {
                // broken connection is discarded; a new one is opened on demand
                tracing::warn!(pool = %self.pool.name, error = %e, "discarding connection");
                state.opened -= 1;
            }
        }
        drop(state);
        self.pool.available.notify_one();
    }
}
