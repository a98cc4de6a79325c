//! SelectTranslator — SelectQuery → 파라미터화된 SELECT 문
//!
//! # 번역 순서
//!
//! 1. 루트 테이블에 `t0` 별칭 할당
//! 2. 루트 DbEntity 컬럼 + 평탄화 속성 컬럼 (조인 필요 시 LEFT JOIN)
//! 3. Joint 프리페치 컬럼 (`path.COL` 라벨, 중복 FK 컬럼은 복사로 대체)
//! 4. 한정자 (상속 판별 조건과 AND 결합) → WHERE
//! 5. 정렬 → ORDER BY, DISTINCT 일 때 선택되지 않은 정렬 컬럼은 SELECT 목록에 추가
//! 6. `SELECT [DISTINCT] cols FROM t0 [JOIN ...] [WHERE] [GROUP BY] [HAVING] [ORDER BY] [LIMIT]`
//!
//! 번역기는 한 번만 사용할 수 있습니다.

use crate::dba::DbAdapter;
use crate::error::{CayxError, CayxResult};
use crate::exp::Expression;
use crate::map::{EntityResolver, JdbcType, PathEnd};
use crate::query::{PrefetchSemantics, SelectQuery};
use crate::translator::join::{JoinType, ROOT};
use crate::translator::qualifier::QualifierTranslator;
use crate::value::Value;
use std::collections::HashMap;

/// 결과 컬럼 설명
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Key of the value in the DataRow (`ARTIST_NAME`, `toArtist.ARTIST_NAME`)
    pub label: String,
    /// SQL expression in the select list
    pub sql: String,
    pub jdbc_type: Option<JdbcType>,
    /// Added only so that ORDER BY works with DISTINCT; not part of the row
    pub order_only: bool,
}

/// Limit/offset of an object query whose joint prefetch goes through a to-many
/// relationship count root objects, not rows, so they are applied after the
/// rows are grouped by root instead of in SQL.
pub fn pages_by_root(query: &SelectQuery, resolver: &EntityResolver) -> CayxResult<bool> {
    if query.limit.is_none() && query.offset.is_none() {
        return Ok(false);
    }
    for path in query.prefetch.paths(PrefetchSemantics::Joint) {
        if resolver.resolve_obj_path(&query.root, &path)?.traverses_to_many() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// 번역 결과
#[derive(Debug, Clone)]
pub struct TranslatedSelect {
    pub sql: String,
    pub bindings: Vec<Value>,
    pub columns: Vec<ColumnDescriptor>,
    /// Labels filled from another column of the same row: `(target, source)`
    pub copied_columns: Vec<(String, String)>,
    pub distinct: bool,
    /// DISTINCT was needed but dropped because of LOB columns; the caller
    /// must remove duplicate rows in memory.
    pub suppressing_distinct: bool,
}

/// 단일 사용 SELECT 번역기 (스레드 간 공유 불가)
pub struct SelectTranslator<'a> {
    query: &'a SelectQuery,
    resolver: &'a EntityResolver,
    adapter: &'a dyn DbAdapter,
    used: bool,
    suppressing_distinct: bool,
}

impl<'a> SelectTranslator<'a> {
    pub fn new(
        query: &'a SelectQuery,
        resolver: &'a EntityResolver,
        adapter: &'a dyn DbAdapter,
    ) -> Self {
        Self {
            query,
            resolver,
            adapter,
            used: false,
            suppressing_distinct: false,
        }
    }

    pub fn is_suppressing_distinct(&self) -> bool {
        self.suppressing_distinct
    }

    /// SQL을 생성합니다. 두 번째 호출은 에러입니다.
    pub fn create_sql(&mut self) -> CayxResult<TranslatedSelect> {
        if self.used {
            return Err(CayxError::invalid(
                "SelectTranslator can only be used once",
                format!("query on '{}'", self.query.root),
            ));
        }
        self.used = true;

        let result = if self.query.is_column_query() {
            self.translate_columns()
        } else {
            self.translate_entity()
        }?;
        self.suppressing_distinct = result.suppressing_distinct;
        tracing::trace!(sql = %result.sql, "translated select");
        Ok(result)
    }

    fn translate_entity(&self) -> CayxResult<TranslatedSelect> {
        let q = self.query;
        let obj = self.resolver.obj_entity(&q.root)?;
        let db = self.resolver.db_entity(&obj.db_entity)?;
        if !q.fetching_data_rows && !db.has_primary_key() {
            return Err(CayxError::Configuration(format!(
                "ObjEntity '{}' maps to table '{}' without a primary key; \
                 objects can't be fetched from it, fetch data rows instead",
                obj.name, db.name
            )));
        }

        let mut exp = QualifierTranslator::for_obj_entity(self.resolver, self.adapter, &q.root)?;
        let mut columns: Vec<ColumnDescriptor> = Vec::new();
        let mut copied_columns = Vec::new();
        // "alias.COLUMN" of everything selected so far -> label
        let mut selected: HashMap<String, String> = HashMap::new();

        // 2. root columns
        for attr in &db.attributes {
            let sql = exp.root_column(&attr.name)?;
            selected.insert(sql.clone(), attr.name.clone());
            columns.push(ColumnDescriptor {
                label: attr.name.clone(),
                sql,
                jdbc_type: Some(attr.jdbc_type),
                order_only: false,
            });
        }

        // flattened attributes of the entity and its sub-entities
        let mut flattened: Vec<String> = Vec::new();
        for e in std::iter::once(obj).chain(self.resolver.descendants(&obj.name)) {
            for attr in self.resolver.attributes(&e.name)? {
                if attr.is_flattened() && !flattened.contains(&attr.db_attribute_path) {
                    flattened.push(attr.db_attribute_path.clone());
                }
            }
        }
        for path in flattened {
            let col = exp.column(&Expression::db_path(path.as_str()), true)?;
            if columns.iter().any(|c| c.label == path) {
                continue;
            }
            selected.entry(col.sql.clone()).or_insert_with(|| path.clone());
            columns.push(ColumnDescriptor {
                label: path,
                sql: col.sql,
                jdbc_type: col.attribute.map(|a| a.jdbc_type),
                order_only: false,
            });
        }
        let to_many_in_columns = exp.traversed_to_many();

        // 3. joint prefetches; to-many here multiplies rows on purpose
        for path in q.prefetch.paths(PrefetchSemantics::Joint) {
            let resolved = self.resolver.resolve_obj_path(&q.root, &path)?;
            if !matches!(resolved.end, PathEnd::Relationship) {
                return Err(CayxError::Configuration(format!(
                    "prefetch path '{path}' of '{}' doesn't end in a relationship",
                    q.root
                )));
            }
            let mut node = ROOT;
            for hop in &resolved.hops {
                node = exp.joins.join(
                    node,
                    hop.relationship,
                    JoinType::LeftOuter,
                    self.resolver,
                    self.adapter,
                )?;
            }
            let (parent, rel) = exp.joins.incoming(node).ok_or_else(|| {
                CayxError::translation(format!("prefetch '{path}' produced no join"), "prefetch")
            })?;
            let parent_alias = exp.joins.alias(parent)?.to_string();
            let alias = exp.joins.alias(node)?.to_string();
            let copies: HashMap<String, String> = rel
                .joins
                .iter()
                .map(|j| (j.target.clone(), j.source.clone()))
                .collect();
            let target = self.resolver.db_entity(&rel.target)?;

            for attr in &target.attributes {
                let label = format!("{path}.{}", attr.name);
                if let Some(source_col) = copies.get(&attr.name) {
                    let source_sql = format!("{parent_alias}.{}", self.adapter.quote(source_col));
                    if let Some(source_label) = selected.get(&source_sql) {
                        copied_columns.push((label, source_label.clone()));
                        continue;
                    }
                }
                let sql = format!("{alias}.{}", self.adapter.quote(&attr.name));
                // same join already selected for a flattened attribute
                if let Some(existing) = selected.get(&sql) {
                    if *existing != label {
                        copied_columns.push((label, existing.clone()));
                    }
                    continue;
                }
                selected.insert(sql.clone(), label.clone());
                columns.push(ColumnDescriptor {
                    label,
                    sql,
                    jdbc_type: Some(attr.jdbc_type),
                    order_only: false,
                });
            }
        }

        // 4. WHERE
        let mut where_bindings = Vec::new();
        let qualifier = match (&q.qualifier, self.resolver.inheritance_qualifier(&q.root)?) {
            (Some(a), Some(b)) => Some(a.clone().and(b)),
            (Some(a), None) => Some(a.clone()),
            (None, b) => b,
        };
        let where_sql = match &qualifier {
            Some(e) => Some(exp.translate(e, &mut where_bindings)?),
            None => None,
        };

        // 5. ORDER BY
        let mut order_items = Vec::new();
        for o in &q.orderings {
            let col = exp.column(&o.expression, false)?;
            let sql = if o.case_insensitive {
                format!("UPPER({})", col.sql)
            } else {
                col.sql
            };
            order_items.push((sql, o.is_ascending(), col.attribute.map(|a| a.jdbc_type)));
        }

        let distinct_needed = q.distinct || to_many_in_columns || exp.traversed_to_many();
        if distinct_needed {
            for (i, (sql, _, jdbc_type)) in order_items.iter().enumerate() {
                if !columns.iter().any(|c| &c.sql == sql) {
                    columns.push(ColumnDescriptor {
                        label: format!("__order_{i}"),
                        sql: sql.clone(),
                        jdbc_type: *jdbc_type,
                        order_only: true,
                    });
                }
            }
        }
        let has_lob = columns
            .iter()
            .any(|c| c.jdbc_type.is_some_and(JdbcType::is_lob));
        let suppressing_distinct = distinct_needed && has_lob;
        let distinct = distinct_needed && !has_lob;

        let order_sql: Vec<String> = order_items
            .iter()
            .map(|(sql, asc, _)| format!("{sql} {}", if *asc { "ASC" } else { "DESC" }))
            .collect();

        let paging = q.fetching_data_rows || !pages_by_root(q, self.resolver)?;
        let sql = self.assemble(
            distinct,
            &columns,
            &exp,
            where_sql.as_deref(),
            &[],
            None,
            &order_sql,
            paging,
        )?;

        Ok(TranslatedSelect {
            sql,
            bindings: where_bindings,
            columns,
            copied_columns,
            distinct,
            suppressing_distinct,
        })
    }

    fn translate_columns(&self) -> CayxResult<TranslatedSelect> {
        let q = self.query;
        let mut exp = QualifierTranslator::for_obj_entity(self.resolver, self.adapter, &q.root)?;
        let mut select_bindings = Vec::new();
        let mut columns = Vec::new();
        let mut group_by = Vec::new();
        let aggregate = q.is_aggregate();

        for rc in &q.columns {
            let (sql, jdbc_type) = match &rc.expression {
                e @ (Expression::ObjPath(_) | Expression::DbPath(_)) => {
                    let col = exp.column(e, false)?;
                    (col.sql, col.attribute.map(|a| a.jdbc_type))
                }
                e => (exp.operand(e, &mut select_bindings)?, None),
            };
            if aggregate
                && !rc.expression.is_aggregate()
                && !matches!(rc.expression, Expression::Literal(_))
            {
                group_by.push(sql.clone());
            }
            columns.push(ColumnDescriptor {
                label: rc.label.clone(),
                sql,
                jdbc_type,
                order_only: false,
            });
        }

        let mut where_bindings = Vec::new();
        let qualifier = match (&q.qualifier, self.resolver.inheritance_qualifier(&q.root)?) {
            (Some(a), Some(b)) => Some(a.clone().and(b)),
            (Some(a), None) => Some(a.clone()),
            (None, b) => b,
        };
        let where_sql = match &qualifier {
            Some(e) => Some(exp.translate(e, &mut where_bindings)?),
            None => None,
        };

        let mut having_bindings = Vec::new();
        let having_sql = match &q.having {
            Some(h) if !aggregate => {
                return Err(CayxError::invalid(
                    format!("HAVING '{h}' without aggregate columns"),
                    format!("query on '{}'", q.root),
                ));
            }
            Some(h) => Some(exp.translate(h, &mut having_bindings)?),
            None => None,
        };

        let mut order_items = Vec::new();
        for o in &q.orderings {
            let col = exp.column(&o.expression, false)?;
            let sql = if o.case_insensitive {
                format!("UPPER({})", col.sql)
            } else {
                col.sql
            };
            order_items.push((sql, o.is_ascending(), col.attribute.map(|a| a.jdbc_type)));
        }

        // grouping already collapses the rows a to-many join multiplies
        let distinct_needed = q.distinct || (!aggregate && exp.traversed_to_many());
        if distinct_needed && !aggregate {
            for (i, (sql, _, jdbc_type)) in order_items.iter().enumerate() {
                if !columns.iter().any(|c| &c.sql == sql) {
                    columns.push(ColumnDescriptor {
                        label: format!("__order_{i}"),
                        sql: sql.clone(),
                        jdbc_type: *jdbc_type,
                        order_only: true,
                    });
                }
            }
        }
        let has_lob = columns
            .iter()
            .any(|c| c.jdbc_type.is_some_and(JdbcType::is_lob));
        let suppressing_distinct = distinct_needed && has_lob;
        let distinct = distinct_needed && !has_lob;

        let order_sql: Vec<String> = order_items
            .iter()
            .map(|(sql, asc, _)| format!("{sql} {}", if *asc { "ASC" } else { "DESC" }))
            .collect();

        let sql = self.assemble(
            distinct,
            &columns,
            &exp,
            where_sql.as_deref(),
            &group_by,
            having_sql.as_deref(),
            &order_sql,
            true,
        )?;

        let mut bindings = select_bindings;
        bindings.extend(where_bindings);
        bindings.extend(having_bindings);
        Ok(TranslatedSelect {
            sql,
            bindings,
            columns,
            copied_columns: Vec::new(),
            distinct,
            suppressing_distinct,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        distinct: bool,
        columns: &[ColumnDescriptor],
        exp: &QualifierTranslator<'_>,
        where_sql: Option<&str>,
        group_by: &[String],
        having_sql: Option<&str>,
        order_sql: &[String],
        paging: bool,
    ) -> CayxResult<String> {
        let mut sql = String::from("SELECT ");
        if distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(
            &columns
                .iter()
                .map(|c| c.sql.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        );
        sql.push_str(" FROM ");
        sql.push_str(&exp.joins().from_clause(self.adapter)?);
        if let Some(w) = where_sql {
            sql.push_str(" WHERE ");
            sql.push_str(w);
        }
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        if let Some(h) = having_sql {
            sql.push_str(" HAVING ");
            sql.push_str(h);
        }
        if !order_sql.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_sql.join(", "));
        }
        if paging {
            if let Some(limit) = self.adapter.limit_clause(self.query.limit, self.query.offset) {
                sql.push(' ');
                sql.push_str(&limit);
            }
        }
        Ok(sql)
    }
}
