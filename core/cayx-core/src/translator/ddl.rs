//! DDL 생성 — CREATE/DROP TABLE, FK, UNIQUE, AUTO_PK_SUPPORT
//!
//! 어댑터의 기본 메서드가 이 함수들을 호출하므로 `A: DbAdapter + ?Sized` 로 받습니다.

use crate::dba::DbAdapter;
use crate::error::{CayxError, CayxResult};
use crate::map::{DbEntity, DbRelationship, EntityResolver, EntitySorter};

/// Name of the key-range table used by the PK generator.
pub const AUTO_PK_TABLE: &str = "AUTO_PK_SUPPORT";

/// First key handed out for a table with no AUTO_PK_SUPPORT row yet.
pub const AUTO_PK_INITIAL_VALUE: i64 = 200;

/// `CREATE TABLE` statement.
///
/// With `inline_fks`, FK constraints of to-master relationships are declared
/// inside the statement instead of through `ALTER TABLE`.
pub fn create_table<A: DbAdapter + ?Sized>(
    adapter: &A,
    entity: &DbEntity,
    resolver: &EntityResolver,
    inline_fks: bool,
) -> CayxResult<String> {
    if entity.attributes.is_empty() {
        return Err(CayxError::Configuration(format!(
            "DbEntity '{}' has no attributes",
            entity.name
        )));
    }

    let pk: Vec<_> = entity.primary_key().collect();
    let identity_pk = adapter.identity_declares_pk() && pk.len() == 1 && pk[0].generated;

    let mut parts = Vec::with_capacity(entity.attributes.len() + 2);
    for attr in &entity.attributes {
        let mut col = format!("{} {}", adapter.quote(&attr.name), adapter.type_name(attr));
        if attr.generated {
            col.push(' ');
            col.push_str(adapter.identity_clause());
        }
        if attr.mandatory && !(identity_pk && attr.primary_key) {
            col.push_str(" NOT NULL");
        }
        parts.push(col);
    }

    if !pk.is_empty() && !identity_pk {
        parts.push(format!("PRIMARY KEY ({})", column_list(adapter, pk.iter().map(|a| a.name.as_str()))));
    }

    if inline_fks {
        for rel in &entity.relationships {
            if let Some(fk) = fk_clause(adapter, entity, rel, resolver)? {
                parts.push(fk);
            }
        }
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        adapter.table_name(entity),
        parts.join(", ")
    ))
}

pub fn drop_table<A: DbAdapter + ?Sized>(adapter: &A, entity: &DbEntity) -> String {
    format!("DROP TABLE {}", adapter.table_name(entity))
}

/// `ALTER TABLE ... ADD FOREIGN KEY`, or `None` when the relationship holds
/// no FK on this side.
pub fn create_fk<A: DbAdapter + ?Sized>(
    adapter: &A,
    entity: &DbEntity,
    relationship: &DbRelationship,
    resolver: &EntityResolver,
) -> CayxResult<Option<String>> {
    Ok(fk_clause(adapter, entity, relationship, resolver)?
        .map(|fk| format!("ALTER TABLE {} ADD {fk}", adapter.table_name(entity))))
}

pub fn create_unique<A: DbAdapter + ?Sized>(
    adapter: &A,
    entity: &DbEntity,
    columns: &[String],
) -> String {
    format!(
        "ALTER TABLE {} ADD UNIQUE ({})",
        adapter.table_name(entity),
        column_list(adapter, columns.iter().map(String::as_str))
    )
}

/// `FOREIGN KEY (..) REFERENCES T (..)` for a to-master relationship whose
/// join targets the master's primary key.
fn fk_clause<A: DbAdapter + ?Sized>(
    adapter: &A,
    entity: &DbEntity,
    relationship: &DbRelationship,
    resolver: &EntityResolver,
) -> CayxResult<Option<String>> {
    if !relationship.is_to_master() || relationship.joins.is_empty() {
        return Ok(None);
    }
    let target = resolver.db_entity(&relationship.target)?;
    let to_pk = relationship.joins.iter().all(|j| {
        target
            .attribute(&j.target)
            .is_some_and(|attr| attr.primary_key)
    });
    if !to_pk {
        return Ok(None);
    }
    for join in &relationship.joins {
        if entity.attribute(&join.source).is_none() {
            return Err(CayxError::Configuration(format!(
                "FK column '{}' of '{}.{}' is not mapped",
                join.source, entity.name, relationship.name
            )));
        }
    }
    Ok(Some(format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        column_list(adapter, relationship.joins.iter().map(|j| j.source.as_str())),
        adapter.table_name(target),
        column_list(adapter, relationship.joins.iter().map(|j| j.target.as_str()))
    )))
}

fn column_list<'c, A: DbAdapter + ?Sized>(adapter: &A, columns: impl Iterator<Item = &'c str>) -> String {
    columns
        .map(|c| adapter.quote(c))
        .collect::<Vec<_>>()
        .join(", ")
}

// ════════════════════════════════════════════
// SchemaGenerator
// ════════════════════════════════════════════

/// 매핑된 모든 테이블의 스키마 DDL 생성기
///
/// 생성 순서는 DROP(종속 테이블 먼저) → CREATE(마스터 먼저) → UNIQUE → FK → AUTO_PK_SUPPORT 입니다.
pub struct SchemaGenerator<'a> {
    resolver: &'a EntityResolver,
    adapter: &'a dyn DbAdapter,
    pub drop_tables: bool,
    pub create_tables: bool,
    pub create_fks: bool,
    pub create_pk_support: bool,
}

impl<'a> SchemaGenerator<'a> {
    pub fn new(resolver: &'a EntityResolver, adapter: &'a dyn DbAdapter) -> Self {
        Self {
            resolver,
            adapter,
            drop_tables: false,
            create_tables: true,
            create_fks: true,
            create_pk_support: true,
        }
    }

    pub fn with_drop(mut self) -> Self {
        self.drop_tables = true;
        self
    }

    /// Entities that need cayx-generated keys, in insert order.
    pub fn pk_support_entities(&self) -> CayxResult<Vec<&'a DbEntity>> {
        let sorter = EntitySorter::new(self.resolver)?;
        let mut out = Vec::new();
        for name in sorter.insert_order() {
            let entity = self.resolver.db_entity(name)?;
            if entity.generated_pk_candidate().is_some() {
                out.push(entity);
            }
        }
        Ok(out)
    }

    /// All statements in execution order.
    pub fn statements(&self) -> CayxResult<Vec<String>> {
        let sorter = EntitySorter::new(self.resolver)?;
        let mut out = Vec::new();

        if self.drop_tables {
            for name in sorter.delete_order() {
                let entity = self.resolver.db_entity(name)?;
                out.extend(self.adapter.drop_table(entity));
            }
            if self.create_pk_support {
                out.push(format!("DROP TABLE {}", self.adapter.quote(AUTO_PK_TABLE)));
            }
        }

        if self.create_tables {
            for name in sorter.insert_order() {
                let entity = self.resolver.db_entity(name)?;
                out.push(self.adapter.create_table(entity, self.resolver)?);
            }
            for name in sorter.insert_order() {
                let entity = self.resolver.db_entity(name)?;
                for columns in &entity.unique_keys {
                    out.push(self.adapter.create_unique(entity, columns));
                }
            }
        }

        if self.create_fks && self.adapter.supports_fk_via_alter() {
            for name in sorter.insert_order() {
                let entity = self.resolver.db_entity(name)?;
                for rel in &entity.relationships {
                    if let Some(sql) = self.adapter.create_fk(entity, rel, self.resolver)? {
                        out.push(sql);
                    }
                }
            }
        }

        if self.create_pk_support {
            let entities = self.pk_support_entities()?;
            if !entities.is_empty() {
                out.push(pk_support_table(self.adapter));
                for entity in entities {
                    out.push(pk_support_seed(self.adapter, &entity.name));
                }
            }
        }
        Ok(out)
    }
}

/// `CREATE TABLE AUTO_PK_SUPPORT`
pub fn pk_support_table<A: DbAdapter + ?Sized>(adapter: &A) -> String {
    format!(
        "CREATE TABLE {} ({} CHAR(100) NOT NULL, {} BIGINT NOT NULL, UNIQUE ({}))",
        adapter.quote(AUTO_PK_TABLE),
        adapter.quote("TABLE_NAME"),
        adapter.quote("NEXT_ID"),
        adapter.quote("TABLE_NAME")
    )
}

/// Initial key-range row for one table.
pub fn pk_support_seed<A: DbAdapter + ?Sized>(adapter: &A, table: &str) -> String {
    format!(
        "INSERT INTO {} ({}, {}) VALUES ('{}', {AUTO_PK_INITIAL_VALUE})",
        adapter.quote(AUTO_PK_TABLE),
        adapter.quote("TABLE_NAME"),
        adapter.quote("NEXT_ID"),
        table.replace('\'', "''")
    )
}
