//! 조인 트리 — 테이블 별칭(t0, t1, ...)과 조인 조건
//!
//! 같은 부모 노드에서 같은 관계를 같은 조인 종류로 두 번 조인하지 않습니다.

use crate::dba::DbAdapter;
use crate::error::{CayxError, CayxResult};
use crate::map::{DbHop, DbRelationship, EntityResolver};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    LeftOuter,
}

impl JoinType {
    fn sql(self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::LeftOuter => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct Join {
    parent: usize,
    relationship: DbRelationship,
    kind: JoinType,
}

/// FROM 절의 테이블 하나
#[derive(Debug, Clone)]
pub struct TableNode {
    pub alias: String,
    pub db_entity: String,
    table: String,
    join: Option<Join>,
}

/// 별칭 테이블
#[derive(Debug, Clone)]
pub struct JoinTree {
    nodes: Vec<TableNode>,
    index: HashMap<(usize, String, JoinType), usize>,
}

/// Node index of the root table (`t0`).
pub const ROOT: usize = 0;

impl JoinTree {
    pub fn new(root_db_entity: &str, table: String) -> Self {
        Self {
            nodes: vec![TableNode {
                alias: "t0".to_string(),
                db_entity: root_db_entity.to_string(),
                table,
                join: None,
            }],
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 별칭 조회. FROM 목록에 없는 노드는 번역기 내부 오류입니다.
    pub fn alias(&self, node: usize) -> CayxResult<&str> {
        self.nodes
            .get(node)
            .map(|n| n.alias.as_str())
            .ok_or_else(|| {
                CayxError::translation(
                    format!("no table alias for node #{node}"),
                    format!("FROM list has {} tables", self.nodes.len()),
                )
            })
    }

    pub fn node(&self, node: usize) -> CayxResult<&TableNode> {
        self.nodes.get(node).ok_or_else(|| {
            CayxError::translation(format!("no table node #{node}"), "JoinTree::node")
        })
    }

    /// Joins one relationship from `parent`, reusing an identical existing join.
    pub fn join(
        &mut self,
        parent: usize,
        relationship: &DbRelationship,
        kind: JoinType,
        resolver: &EntityResolver,
        adapter: &dyn DbAdapter,
    ) -> CayxResult<usize> {
        self.node(parent)?;
        let key = (parent, relationship.name.clone(), kind);
        if let Some(existing) = self.index.get(&key) {
            return Ok(*existing);
        }

        let target = resolver.db_entity(&relationship.target)?;
        let idx = self.nodes.len();
        self.nodes.push(TableNode {
            alias: format!("t{idx}"),
            db_entity: target.name.clone(),
            table: adapter.table_name(target),
            join: Some(Join {
                parent,
                relationship: relationship.clone(),
                kind,
            }),
        });
        self.index.insert(key, idx);
        Ok(idx)
    }

    /// Joins a chain of hops starting at the root; returns the last node.
    ///
    /// `force_outer` turns every hop into a LEFT JOIN.
    pub fn join_hops(
        &mut self,
        hops: &[DbHop<'_>],
        force_outer: bool,
        resolver: &EntityResolver,
        adapter: &dyn DbAdapter,
    ) -> CayxResult<usize> {
        let mut current = ROOT;
        for hop in hops {
            let kind = if force_outer || hop.outer {
                JoinType::LeftOuter
            } else {
                JoinType::Inner
            };
            current = self.join(current, hop.relationship, kind, resolver, adapter)?;
        }
        Ok(current)
    }

    /// FROM 절 (ANSI JOIN ... ON)
    pub fn from_clause(&self, adapter: &dyn DbAdapter) -> CayxResult<String> {
        let mut sql = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            match &node.join {
                None if i == ROOT => {
                    sql.push_str(&format!("{} {}", node.table, node.alias));
                }
                None => {
                    return Err(CayxError::translation(
                        format!("table {} has no join condition", node.alias),
                        "JoinTree::from_clause",
                    ));
                }
                Some(join) => {
                    let parent_alias = self.alias(join.parent)?;
                    let on = join
                        .relationship
                        .joins
                        .iter()
                        .map(|j| {
                            format!(
                                "{parent_alias}.{} = {}.{}",
                                adapter.quote(&j.source),
                                node.alias,
                                adapter.quote(&j.target)
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(" AND ");
                    sql.push_str(&format!(
                        " {} {} {} ON {on}",
                        join.kind.sql(),
                        node.table,
                        node.alias
                    ));
                }
            }
        }
        Ok(sql)
    }

    /// Source side of the join that created `node`: `(parent, relationship)`.
    pub fn incoming(&self, node: usize) -> Option<(usize, &DbRelationship)> {
        self.nodes
            .get(node)
            .and_then(|n| n.join.as_ref())
            .map(|j| (j.parent, &j.relationship))
    }
}
