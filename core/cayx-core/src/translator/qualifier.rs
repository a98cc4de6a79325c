//! QualifierTranslator — 표현식 → SQL 조건
//!
//! SELECT 번역기와 같은 조인 트리를 공유하므로 WHERE/HAVING/ORDER BY/컬럼 목록의
//! 별칭이 항상 일치합니다. 리터럴은 모두 `?` 바인딩이 됩니다.

use crate::dba::DbAdapter;
use crate::error::{CayxError, CayxResult};
use crate::exp::{CompareOp, Expression};
use crate::map::{DbAttribute, EntityResolver, PathEnd, ResolvedPath};
use crate::translator::join::{JoinTree, ROOT};
use crate::value::Value;

/// A translated column reference.
#[derive(Debug, Clone)]
pub struct ColumnRef<'a> {
    pub sql: String,
    pub attribute: Option<&'a DbAttribute>,
}

/// 표현식 번역기
pub struct QualifierTranslator<'a> {
    resolver: &'a EntityResolver,
    adapter: &'a dyn DbAdapter,
    root_obj: Option<String>,
    root_db: String,
    pub(crate) joins: JoinTree,
    traversed_to_many: bool,
}

impl<'a> QualifierTranslator<'a> {
    /// Translator rooted at an ObjEntity (object and DB paths allowed).
    pub fn for_obj_entity(
        resolver: &'a EntityResolver,
        adapter: &'a dyn DbAdapter,
        obj_entity: &str,
    ) -> CayxResult<Self> {
        let db = resolver.db_entity_for(obj_entity)?;
        Ok(Self {
            resolver,
            adapter,
            root_obj: Some(obj_entity.to_string()),
            root_db: db.name.clone(),
            joins: JoinTree::new(&db.name, adapter.table_name(db)),
            traversed_to_many: false,
        })
    }

    /// Whether a to-many relationship has been joined so far.
    pub fn traversed_to_many(&self) -> bool {
        self.traversed_to_many
    }

    pub fn joins(&self) -> &JoinTree {
        &self.joins
    }

    /// 조건식 번역
    pub fn translate(&mut self, expr: &Expression, bindings: &mut Vec<Value>) -> CayxResult<String> {
        match expr {
            Expression::And(parts) => self.junction(parts, " AND ", bindings),
            Expression::Or(parts) => self.junction(parts, " OR ", bindings),
            Expression::Not(inner) => Ok(format!("NOT ({})", self.translate(inner, bindings)?)),
            Expression::Compare { op, left, right } => self.comparison(*op, left, right, bindings),
            Expression::Like {
                expr,
                pattern,
                ignore_case,
                negated,
            } => {
                let l = self.operand(expr, bindings)?;
                let r = self.operand(pattern, bindings)?;
                let not = if *negated { "NOT " } else { "" };
                if *ignore_case {
                    Ok(format!("UPPER({l}) {not}LIKE UPPER({r})"))
                } else {
                    Ok(format!("{l} {not}LIKE {r}"))
                }
            }
            Expression::In { expr, list, negated } => {
                if list.is_empty() {
                    return Ok(if *negated { "1 = 1" } else { "1 = 0" }.to_string());
                }
                let l = self.operand(expr, bindings)?;
                let items = list
                    .iter()
                    .map(|e| self.operand(e, bindings))
                    .collect::<CayxResult<Vec<_>>>()?;
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{l} {not}IN ({})", items.join(", ")))
            }
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let e = self.operand(expr, bindings)?;
                let lo = self.operand(low, bindings)?;
                let hi = self.operand(high, bindings)?;
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{e} {not}BETWEEN {lo} AND {hi}"))
            }
            Expression::Literal(Value::Bool(b)) => {
                Ok(if *b { "1 = 1" } else { "1 = 0" }.to_string())
            }
            other => Err(CayxError::translation(
                format!("'{other}' is not a condition"),
                "QualifierTranslator::translate",
            )),
        }
    }

    fn junction(
        &mut self,
        parts: &[Expression],
        sep: &str,
        bindings: &mut Vec<Value>,
    ) -> CayxResult<String> {
        let mut out = Vec::with_capacity(parts.len());
        for p in parts {
            let sql = self.translate(p, bindings)?;
            if matches!(p, Expression::And(_) | Expression::Or(_)) {
                out.push(format!("({sql})"));
            } else {
                out.push(sql);
            }
        }
        Ok(out.join(sep))
    }

    fn comparison(
        &mut self,
        op: CompareOp,
        left: &Expression,
        right: &Expression,
        bindings: &mut Vec<Value>,
    ) -> CayxResult<String> {
        let null_side = match (left, right) {
            (_, Expression::Literal(Value::Null)) => Some(left),
            (Expression::Literal(Value::Null), _) => Some(right),
            _ => None,
        };
        if let Some(side) = null_side {
            let col = self.operand(side, bindings)?;
            return match op {
                CompareOp::Eq => Ok(format!("{col} IS NULL")),
                CompareOp::NotEq => Ok(format!("{col} IS NOT NULL")),
                other => Err(CayxError::translation(
                    format!("NULL can't be compared with '{}'", other.sql()),
                    "QualifierTranslator::comparison",
                )),
            };
        }
        let l = self.operand(left, bindings)?;
        let r = self.operand(right, bindings)?;
        Ok(format!("{l} {} {r}", op.sql()))
    }

    /// 피연산자 번역 (경로 → 컬럼, 리터럴 → `?`, 집계 함수)
    pub fn operand(&mut self, expr: &Expression, bindings: &mut Vec<Value>) -> CayxResult<String> {
        match expr {
            Expression::ObjPath(_) | Expression::DbPath(_) => Ok(self.column(expr, false)?.sql),
            Expression::Literal(v) => {
                bindings.push(v.clone());
                Ok("?".to_string())
            }
            Expression::Param(name) => Err(CayxError::translation(
                format!("parameter '${name}' is not bound"),
                "QualifierTranslator::operand",
            )),
            Expression::Aggregate { func, arg } => match arg {
                Some(a) => Ok(format!("{}({})", func.sql(), self.operand(a, bindings)?)),
                None => Ok(format!("{}(*)", func.sql())),
            },
            other => Ok(format!("({})", self.translate(other, bindings)?)),
        }
    }

    /// 경로 표현식을 컬럼으로 번역합니다.
    ///
    /// A path ending on a to-one relationship resolves to the FK column on
    /// the source side, so `toArtist = 5` needs no join to ARTIST.
    pub fn column(&mut self, expr: &Expression, force_outer: bool) -> CayxResult<ColumnRef<'a>> {
        let resolved = self.resolve(expr)?;
        if resolved.traverses_to_many() {
            self.traversed_to_many = true;
        }

        match resolved.end {
            PathEnd::Attribute { attribute, .. } => {
                let node = self
                    .joins
                    .join_hops(&resolved.hops, force_outer, self.resolver, self.adapter)?;
                Ok(ColumnRef {
                    sql: format!("{}.{}", self.joins.alias(node)?, self.adapter.quote(&attribute.name)),
                    attribute: Some(attribute),
                })
            }
            PathEnd::Relationship => {
                let Some((last, prefix)) = resolved.hops.split_last() else {
                    return Err(CayxError::translation("empty relationship path", "column"));
                };
                let rel = last.relationship;
                let [join] = rel.joins.as_slice() else {
                    return Err(CayxError::NotSupported(format!(
                        "comparing relationship '{}' with a compound key",
                        rel.name
                    )));
                };
                if rel.to_many {
                    let node =
                        self.joins
                            .join_hops(&resolved.hops, force_outer, self.resolver, self.adapter)?;
                    let target = self.resolver.db_entity(&rel.target)?;
                    let mut pk = target.primary_key();
                    let (Some(pk), None) = (pk.next(), pk.next()) else {
                        return Err(CayxError::NotSupported(format!(
                            "comparing to-many '{}' with a compound key target",
                            rel.name
                        )));
                    };
                    return Ok(ColumnRef {
                        sql: format!("{}.{}", self.joins.alias(node)?, self.adapter.quote(&pk.name)),
                        attribute: Some(pk),
                    });
                }
                let node = self
                    .joins
                    .join_hops(prefix, force_outer, self.resolver, self.adapter)?;
                let source = self.resolver.db_entity(last.source)?;
                Ok(ColumnRef {
                    sql: format!("{}.{}", self.joins.alias(node)?, self.adapter.quote(&join.source)),
                    attribute: source.attribute(&join.source),
                })
            }
        }
    }

    fn resolve(&self, expr: &Expression) -> CayxResult<ResolvedPath<'a>> {
        match expr {
            Expression::ObjPath(path) => {
                let Some(root) = &self.root_obj else {
                    return Err(CayxError::translation(
                        format!("object path '{path}' in a DB-only query"),
                        "QualifierTranslator::resolve",
                    ));
                };
                self.resolver.resolve_obj_path(root, path)
            }
            Expression::DbPath(path) => self.resolver.resolve_db_path(&self.root_db, path),
            other => Err(CayxError::translation(
                format!("'{other}' is not a path"),
                "QualifierTranslator::resolve",
            )),
        }
    }

    /// Column of the root table, for callers that select by DB attribute.
    pub fn root_column(&self, attribute: &str) -> CayxResult<String> {
        Ok(format!("{}.{}", self.joins.alias(ROOT)?, self.adapter.quote(attribute)))
    }
}
