//! Transaction — 명시적 트랜잭션 핸들
//!
//! 스레드에 묶인 암묵적 상태 대신, 트랜잭션 범위가 필요한 호출에 핸들을 직접
//! 넘깁니다. 노드마다 커넥션 하나를 빌려 첫 사용 시 `BEGIN` 합니다.
//!
//! - internal: `DataNode`/`DataDomain`이 만들고 커밋/롤백까지 책임집니다.
//! - external: 사용자가 만들고 커밋/롤백합니다. 노드는 참여만 합니다.

use crate::access::connection::{Connection, DataSource, PooledConnection};
use crate::error::{CayxError, CayxResult};
use std::sync::atomic::{AtomicU64, Ordering};

static TRANSACTION_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    /// Still open, but can only be rolled back
    MarkedRollback,
    Committed,
    RolledBack,
}

pub struct Transaction {
    id: u64,
    external: bool,
    status: TransactionStatus,
    connections: Vec<(String, PooledConnection)>,
}

impl Transaction {
    /// A transaction owned by the caller.
    pub fn external() -> Self {
        Self::create(true)
    }

    pub(crate) fn internal() -> Self {
        Self::create(false)
    }

    fn create(external: bool) -> Self {
        let id = TRANSACTION_SEQ.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tx = id, external, "transaction started");
        Self {
            id,
            external,
            status: TransactionStatus::Active,
            connections: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_external(&self) -> bool {
        self.external
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Number of connections enlisted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn set_rollback_only(&mut self) {
        if self.status == TransactionStatus::Active {
            self.status = TransactionStatus::MarkedRollback;
        }
    }

    /// 노드의 커넥션. 처음 요청 시 풀에서 빌리고 트랜잭션을 시작합니다.
    pub(crate) fn connection(
        &mut self,
        node: &str,
        data_source: &dyn DataSource,
    ) -> CayxResult<&mut PooledConnection> {
        if self.status != TransactionStatus::Active {
            return Err(CayxError::invalid(
                format!("transaction is {:?}", self.status),
                format!("tx #{} on node '{node}'", self.id),
            ));
        }
        let idx = match self.connections.iter().position(|(n, _)| n == node) {
            Some(idx) => idx,
            None => {
                let mut conn = data_source.connection()?;
                conn.begin()?;
                self.connections.push((node.to_string(), conn));
                self.connections.len() - 1
            }
        };
        Ok(&mut self.connections[idx].1)
    }

    /// 모든 커넥션을 커밋하고 풀로 반환합니다.
    pub fn commit(&mut self) -> CayxResult<()> {
        match self.status {
            TransactionStatus::Active => {}
            TransactionStatus::MarkedRollback => {
                self.rollback()?;
                return Err(CayxError::invalid(
                    "transaction was marked rollback-only",
                    format!("tx #{}", self.id),
                ));
            }
            other => {
                return Err(CayxError::invalid(
                    format!("can't commit a {other:?} transaction"),
                    format!("tx #{}", self.id),
                ));
            }
        }
        let mut failure = None;
        for (node, conn) in self.connections.iter_mut() {
            if failure.is_some() {
                // nodes after the failed one can still be rolled back
                let _ = conn.rollback();
                continue;
            }
            if let Err(e) = conn.commit() {
                tracing::warn!(tx = self.id, node = %node, error = %e, "commit failed");
                failure = Some(e);
            }
        }
        self.connections.clear();
        if let Some(e) = failure {
            self.status = TransactionStatus::RolledBack;
            return Err(e);
        }
        self.status = TransactionStatus::Committed;
        tracing::debug!(tx = self.id, "transaction committed");
        Ok(())
    }

    /// 모든 커넥션을 롤백합니다. 첫 번째 에러를 반환하지만 나머지도 롤백을 시도합니다.
    pub fn rollback(&mut self) -> CayxResult<()> {
        if matches!(
            self.status,
            TransactionStatus::Committed | TransactionStatus::RolledBack
        ) {
            return Ok(());
        }
        let mut first_error = None;
        for (node, conn) in self.connections.iter_mut() {
            if let Err(e) = conn.rollback() {
                tracing::warn!(tx = self.id, node = %node, error = %e, "rollback failed");
                first_error.get_or_insert(e);
            }
        }
        self.connections.clear();
        self.status = TransactionStatus::RolledBack;
        tracing::debug!(tx = self.id, "transaction rolled back");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.connections.is_empty() {
            tracing::warn!(tx = self.id, "transaction dropped while open, rolling back");
            let _ = self.rollback();
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("external", &self.external)
            .field("status", &self.status)
            .field("connections", &self.connections.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::sqlite::SqliteDataSource;
    use crate::value::Value;

    fn count(ds: &SqliteDataSource) -> i64 {
        let mut n = 0;
        ds.connection()
            .unwrap()
            .query("SELECT COUNT(*) FROM T", &[], &mut |_, v| {
                n = v[0].as_i64().unwrap_or(-1);
                Ok(())
            })
            .unwrap();
        n
    }

    fn setup() -> SqliteDataSource {
        let ds = SqliteDataSource::in_memory(2).unwrap();
        ds.connection().unwrap().execute("CREATE TABLE T (ID INTEGER)", &[]).unwrap();
        ds
    }

    #[test]
    fn test_commit_releases_connections() {
        let ds = setup();
        let mut tx = Transaction::external();
        tx.connection("node", &ds)
            .unwrap()
            .execute("INSERT INTO T VALUES (?)", &[Value::Int(1)])
            .unwrap();
        // same node reuses its connection
        tx.connection("node", &ds).unwrap();
        assert_eq!(tx.connection_count(), 1);
        assert_eq!(ds.stats().in_use, 1);

        tx.commit().unwrap();
        assert_eq!(tx.status(), TransactionStatus::Committed);
        assert_eq!(ds.stats().in_use, 0);
        assert_eq!(count(&ds), 1);
    }

    #[test]
    fn test_rollback_only_commit_fails() {
        let ds = setup();
        let mut tx = Transaction::internal();
        tx.connection("node", &ds)
            .unwrap()
            .execute("INSERT INTO T VALUES (1)", &[])
            .unwrap();
        tx.set_rollback_only();
        assert!(tx.commit().is_err());
        assert_eq!(tx.status(), TransactionStatus::RolledBack);
        assert_eq!(count(&ds), 0);
    }

    #[test]
    fn test_drop_rolls_back() {
        let ds = setup();
        {
            let mut tx = Transaction::internal();
            tx.connection("node", &ds)
                .unwrap()
                .execute("INSERT INTO T VALUES (1)", &[])
                .unwrap();
        }
        assert_eq!(ds.stats().in_use, 0);
        assert_eq!(count(&ds), 0);
    }

    #[test]
    fn test_finished_transaction_rejects_work() {
        let ds = setup();
        let mut tx = Transaction::external();
        tx.commit().unwrap();
        assert!(tx.connection("node", &ds).is_err());
        assert!(tx.commit().is_err());
    }
}
