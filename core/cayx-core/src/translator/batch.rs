//! BatchTranslator — INSERT/UPDATE/DELETE 문 생성
//!
//! 행마다 컬럼 구성이 다를 수 있으므로 (NULL 인 생성 컬럼 생략, 변경된 컬럼만 UPDATE)
//! 문장은 행 단위로 만들고, 실행기는 같은 SQL을 준비된 문장 캐시로 재사용합니다.

use crate::dba::DbAdapter;
use crate::error::{CayxError, CayxResult};
use crate::map::DbEntity;
use crate::query::UpdateRow;
use crate::row::DataRow;
use crate::value::Value;

/// 한 행에 대한 SQL과 바인딩
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub sql: String,
    pub bindings: Vec<Value>,
}

pub struct BatchTranslator<'a> {
    adapter: &'a dyn DbAdapter,
}

impl<'a> BatchTranslator<'a> {
    pub fn new(adapter: &'a dyn DbAdapter) -> Self {
        Self { adapter }
    }

    /// `INSERT INTO T (A, B) VALUES (?, ?)`
    ///
    /// Columns follow the entity's declaration order; generated columns
    /// without a value are left to the database.
    pub fn insert(&self, entity: &DbEntity, row: &DataRow) -> CayxResult<BatchStatement> {
        check_columns(entity, row.columns())?;
        let mut names = Vec::new();
        let mut bindings = Vec::new();
        for attr in &entity.attributes {
            if !row.contains(&attr.name) || (attr.generated && row.get(&attr.name).is_null()) {
                continue;
            }
            names.push(self.adapter.quote(&attr.name));
            bindings.push(row.get(&attr.name).clone());
        }
        let sql = if names.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.adapter.table_name(entity))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.adapter.table_name(entity),
                names.join(", "),
                vec!["?"; names.len()].join(", ")
            )
        };
        Ok(BatchStatement { sql, bindings })
    }

    /// `UPDATE T SET A = ? WHERE PK = ? [AND LOCK = ? | AND LOCK IS NULL]`
    pub fn update(&self, entity: &DbEntity, row: &UpdateRow) -> CayxResult<BatchStatement> {
        if row.values.is_empty() {
            return Err(CayxError::invalid(
                "UPDATE without changed columns",
                format!("table '{}'", entity.name),
            ));
        }
        check_columns(entity, row.values.columns())?;
        let mut bindings = Vec::new();
        let set = row
            .values
            .iter()
            .map(|(col, v)| {
                bindings.push(v.clone());
                format!("{} = ?", self.adapter.quote(col))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let where_sql = self.qualifier(entity, &row.qualifier, &mut bindings)?;
        Ok(BatchStatement {
            sql: format!(
                "UPDATE {} SET {set} WHERE {where_sql}",
                self.adapter.table_name(entity)
            ),
            bindings,
        })
    }

    /// `DELETE FROM T WHERE PK = ? [AND ...]`
    pub fn delete(&self, entity: &DbEntity, qualifier: &DataRow) -> CayxResult<BatchStatement> {
        let mut bindings = Vec::new();
        let where_sql = self.qualifier(entity, qualifier, &mut bindings)?;
        Ok(BatchStatement {
            sql: format!(
                "DELETE FROM {} WHERE {where_sql}",
                self.adapter.table_name(entity)
            ),
            bindings,
        })
    }

    fn qualifier(
        &self,
        entity: &DbEntity,
        qualifier: &DataRow,
        bindings: &mut Vec<Value>,
    ) -> CayxResult<String> {
        if qualifier.is_empty() {
            return Err(CayxError::invalid(
                "batch statement without a qualifier",
                format!("table '{}'", entity.name),
            ));
        }
        check_columns(entity, qualifier.columns())?;
        Ok(qualifier
            .iter()
            .map(|(col, v)| {
                if v.is_null() {
                    format!("{} IS NULL", self.adapter.quote(col))
                } else {
                    bindings.push(v.clone());
                    format!("{} = ?", self.adapter.quote(col))
                }
            })
            .collect::<Vec<_>>()
            .join(" AND "))
    }
}

fn check_columns<'c>(entity: &DbEntity, columns: impl Iterator<Item = &'c String>) -> CayxResult<()> {
    for col in columns {
        if entity.attribute(col).is_none() {
            return Err(CayxError::Configuration(format!(
                "no DbAttribute '{col}' in '{}'",
                entity.name
            )));
        }
    }
    Ok(())
}
