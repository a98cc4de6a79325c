//! SelectQuery — 객체/데이터 행 조회 쿼리
//!
//! 불변 입력으로 취급되며, 번역은 매번 새 SelectTranslator가 수행합니다.

use crate::error::CayxResult;
use crate::exp::Expression;
use crate::query::ordering::Ordering;
use crate::query::prefetch::{PrefetchSemantics, PrefetchTreeNode};
use crate::value::Value;
use std::collections::HashMap;

/// 결과 캐시 전략
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheStrategy {
    #[default]
    NoCache,
    /// Cached per ObjectContext
    LocalCache,
    /// Cached in the DataDomain, shared by all contexts
    SharedCache,
}

/// 결과 컬럼 (컬럼 쿼리용)
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    pub expression: Expression,
    /// Label of the value in the result row
    pub label: String,
}

/// 조회 쿼리
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Root ObjEntity name
    pub root: String,
    pub qualifier: Option<Expression>,
    pub orderings: Vec<Ordering>,
    pub prefetch: PrefetchTreeNode,
    pub distinct: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Return raw DataRows instead of registering objects
    pub fetching_data_rows: bool,
    /// Non-empty turns this into a column query (scalars or aggregates)
    pub columns: Vec<ResultColumn>,
    pub having: Option<Expression>,
    pub cache_strategy: CacheStrategy,
    pub cache_group: Option<String>,
}

impl SelectQuery {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            qualifier: None,
            orderings: Vec::new(),
            prefetch: PrefetchTreeNode::root(),
            distinct: false,
            limit: None,
            offset: None,
            fetching_data_rows: false,
            columns: Vec::new(),
            having: None,
            cache_strategy: CacheStrategy::NoCache,
            cache_group: None,
        }
    }

    /// Replaces the qualifier.
    pub fn qualifier(mut self, qualifier: Expression) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    /// ANDs a condition onto the current qualifier.
    pub fn and_qualifier(mut self, qualifier: Expression) -> Self {
        self.qualifier = Some(match self.qualifier.take() {
            Some(q) => q.and(qualifier),
            None => qualifier,
        });
        self
    }

    pub fn order_by(mut self, ordering: Ordering) -> Self {
        self.orderings.push(ordering);
        self
    }

    pub fn prefetch(mut self, path: &str, semantics: PrefetchSemantics) -> Self {
        self.prefetch.add_path(path, semantics);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn data_rows(mut self) -> Self {
        self.fetching_data_rows = true;
        self
    }

    /// Adds a result column. Labels default to the expression text.
    pub fn column(mut self, expression: Expression) -> Self {
        let label = expression.to_string();
        self.columns.push(ResultColumn { expression, label });
        self.fetching_data_rows = true;
        self
    }

    pub fn column_as(mut self, expression: Expression, label: impl Into<String>) -> Self {
        self.columns.push(ResultColumn {
            expression,
            label: label.into(),
        });
        self.fetching_data_rows = true;
        self
    }

    pub fn having(mut self, having: Expression) -> Self {
        self.having = Some(having);
        self
    }

    pub fn cache(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }

    pub fn cache_group(mut self, group: impl Into<String>) -> Self {
        self.cache_group = Some(group.into());
        self
    }

    pub fn is_column_query(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Column query with at least one aggregate: non-aggregate columns become GROUP BY.
    pub fn is_aggregate(&self) -> bool {
        self.columns.iter().any(|c| c.expression.is_aggregate())
    }

    /// 파라미터를 바인딩한 새 쿼리. 바인딩되지 않은 조건은 제거됩니다.
    pub fn params_with(&self, params: &HashMap<String, Value>) -> CayxResult<SelectQuery> {
        let mut q = self.clone();
        q.qualifier = match &self.qualifier {
            Some(e) => e.params_with(params, true)?,
            None => None,
        };
        q.having = match &self.having {
            Some(e) => e.params_with(params, true)?,
            None => None,
        };
        Ok(q)
    }

    /// Key of the result in a query cache.
    pub fn cache_key(&self) -> String {
        let mut key = format!("{}:{}", self.root, self.fetching_data_rows);
        if let Some(q) = &self.qualifier {
            key.push_str(&format!(":q={q}"));
        }
        for o in &self.orderings {
            key.push_str(&format!(":o={}{:?}{}", o.expression, o.order, o.case_insensitive));
        }
        for c in &self.columns {
            key.push_str(&format!(":c={}", c.expression));
        }
        if let Some(h) = &self.having {
            key.push_str(&format!(":h={h}"));
        }
        for p in self.prefetch.paths(PrefetchSemantics::Joint) {
            key.push_str(&format!(":pj={p}"));
        }
        for p in self.prefetch.paths(PrefetchSemantics::Disjoint) {
            key.push_str(&format!(":pd={p}"));
        }
        key.push_str(&format!(
            ":d={}:l={:?}:f={:?}",
            self.distinct, self.limit, self.offset
        ));
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exp::CompareOp;

    #[test]
    fn test_and_qualifier_combines() {
        let q = SelectQuery::new("Artist")
            .and_qualifier(Expression::match_path("artistName", "a"))
            .and_qualifier(Expression::match_path("dateOfBirth", 1));
        assert!(matches!(q.qualifier, Some(Expression::And(ref p)) if p.len() == 2));
    }

    #[test]
    fn test_params_prune_unbound() {
        let q = SelectQuery::new("Artist").qualifier(
            Expression::path("artistName")
                .compare(CompareOp::Eq, Expression::param("name"))
                .and(Expression::path("dateOfBirth").compare(CompareOp::Gt, Expression::param("dob"))),
        );
        let mut params = HashMap::new();
        params.insert("name".to_string(), Value::from("x"));
        let bound = q.params_with(&params).unwrap();
        assert_eq!(bound.qualifier, Some(Expression::match_path("artistName", "x")));
        assert!(q.params_with(&HashMap::new()).unwrap().qualifier.is_none());
    }

    #[test]
    fn test_cache_key_distinguishes_queries() {
        let a = SelectQuery::new("Artist").qualifier(Expression::match_path("artistName", "a"));
        let b = SelectQuery::new("Artist").qualifier(Expression::match_path("artistName", "b"));
        assert_ne!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), a.clone().cache_key());
        assert_ne!(a.cache_key(), a.clone().limit(1).cache_key());
    }

    #[test]
    fn test_column_query_flags() {
        let q = SelectQuery::new("Painting")
            .column(Expression::path("toArtist.artistName"))
            .column(Expression::count_all());
        assert!(q.is_column_query());
        assert!(q.is_aggregate());
        assert!(q.fetching_data_rows);
        assert_eq!(q.columns[1].label, "count(*)");
    }
}
