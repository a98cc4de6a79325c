//! 범용 ANSI 어댑터

use crate::dba::{DbAdapter, QuotingStrategy};

/// Generic adapter emitting SQL:2008 syntax.
#[derive(Debug, Clone, Default)]
pub struct JdbcAdapter {
    quoting: QuotingStrategy,
}

impl JdbcAdapter {
    pub fn new(quoting: QuotingStrategy) -> Self {
        Self { quoting }
    }
}

impl DbAdapter for JdbcAdapter {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn quoting(&self) -> &QuotingStrategy {
        &self.quoting
    }

    fn limit_clause(&self, limit: Option<usize>, offset: Option<usize>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("FETCH FIRST {l} ROWS ONLY")),
            (None, Some(o)) => Some(format!("OFFSET {o} ROWS")),
            (Some(l), Some(o)) => Some(format!("OFFSET {o} ROWS FETCH NEXT {l} ROWS ONLY")),
        }
    }
}
