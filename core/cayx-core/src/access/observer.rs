//! OperationObserver — 쿼리 실행 결과 콜백

use crate::error::{CayxError, CayxResult};
use crate::query::Query;
use crate::row::DataRow;

/// `DataNode::perform_queries` 결과를 받는 콜백
///
/// 실패는 반환값이 아니라 `next_global_exception` 으로 전달됩니다.
pub trait OperationObserver {
    fn next_rows(&mut self, query: &Query, rows: Vec<DataRow>);

    /// One row of an iterated (streaming) select.
    fn next_row(&mut self, query: &Query, row: DataRow) {
        self.next_rows(query, vec![row]);
    }

    fn next_count(&mut self, query: &Query, count: usize);

    /// DB-generated keys of an insert batch, one row per inserted row
    /// (empty when nothing was generated).
    fn next_generated_keys(&mut self, _query: &Query, _keys: Vec<DataRow>) {}

    fn next_global_exception(&mut self, error: CayxError);

    fn is_iterated_result(&self) -> bool {
        false
    }
}

/// Result of one query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Rows(Vec<DataRow>),
    Count(usize),
    GeneratedKeys(Vec<DataRow>),
}

/// 결과를 모두 모으는 기본 observer
#[derive(Debug, Default)]
pub struct QueryResult {
    outcomes: Vec<(String, QueryOutcome)>,
    error: Option<CayxError>,
}

impl QueryResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> &[(String, QueryOutcome)] {
        &self.outcomes
    }

    pub fn error(&self) -> Option<&CayxError> {
        self.error.as_ref()
    }

    /// Rows of every select, in execution order.
    pub fn rows(&self) -> impl Iterator<Item = &DataRow> {
        self.outcomes.iter().flat_map(|(_, o)| match o {
            QueryOutcome::Rows(rows) => rows.as_slice(),
            _ => &[],
        })
    }

    pub fn counts(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                QueryOutcome::Count(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    pub fn generated_keys(&self) -> Vec<&DataRow> {
        self.outcomes
            .iter()
            .flat_map(|(_, o)| match o {
                QueryOutcome::GeneratedKeys(keys) => keys.iter().collect::<Vec<_>>(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// The collected result, or the failure reported during execution.
    pub fn into_result(self) -> CayxResult<Self> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }

    pub fn into_rows(self) -> CayxResult<Vec<DataRow>> {
        let result = self.into_result()?;
        Ok(result
            .outcomes
            .into_iter()
            .flat_map(|(_, o)| match o {
                QueryOutcome::Rows(rows) => rows,
                _ => Vec::new(),
            })
            .collect())
    }
}

impl OperationObserver for QueryResult {
    fn next_rows(&mut self, query: &Query, rows: Vec<DataRow>) {
        // iterated rows of the same query extend the previous outcome
        if let Some((label, QueryOutcome::Rows(existing))) = self.outcomes.last_mut() {
            if *label == query.label() {
                existing.extend(rows);
                return;
            }
        }
        self.outcomes.push((query.label(), QueryOutcome::Rows(rows)));
    }

    fn next_count(&mut self, query: &Query, count: usize) {
        self.outcomes.push((query.label(), QueryOutcome::Count(count)));
    }

    fn next_generated_keys(&mut self, query: &Query, keys: Vec<DataRow>) {
        self.outcomes
            .push((query.label(), QueryOutcome::GeneratedKeys(keys)));
    }

    fn next_global_exception(&mut self, error: CayxError) {
        tracing::debug!(error = %error, "query failed");
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{RawQuery, SelectQuery};

    #[test]
    fn test_collects_outcomes() {
        let select = Query::from(SelectQuery::new("Artist"));
        let update = Query::from(RawQuery::execute("UPDATE ARTIST SET ARTIST_NAME = 'x'"));
        let mut result = QueryResult::new();
        result.next_rows(&select, vec![DataRow::new().with("ARTIST_ID", 1)]);
        result.next_count(&update, 3);

        assert_eq!(result.rows().count(), 1);
        assert_eq!(result.counts(), vec![3]);
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_first_error_wins() {
        let mut result = QueryResult::new();
        result.next_global_exception(CayxError::FaultFailure("a".into()));
        result.next_global_exception(CayxError::FaultFailure("b".into()));
        let err = result.into_rows().unwrap_err();
        assert!(err.to_string().contains('a'));
    }
}
