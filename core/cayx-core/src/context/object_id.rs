//! ObjectId — 영속 객체의 식별자
//!
//! 엔티티 이름과 PK 값의 쌍입니다. 아직 저장되지 않은 객체는 임시 ID를 가지며,
//! 커밋 후 영구 ID로 교체됩니다. 상속 계층 안의 객체는 루트 엔티티 이름을
//! 사용하므로 `Person`으로 조회한 `Manager` 행도 같은 ID를 갖습니다.

use crate::row::DataRow;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_ID_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdKey {
    /// Process-unique key of an object that has no primary key yet
    Temporary(u64),
    /// PK column → value
    Permanent(BTreeMap<String, Value>),
}

/// 객체 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    entity: String,
    key: IdKey,
}

impl ObjectId {
    pub fn temporary(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            key: IdKey::Temporary(TEMP_ID_SEQ.fetch_add(1, Ordering::Relaxed)),
        }
    }

    pub fn permanent(entity: impl Into<String>, key: BTreeMap<String, Value>) -> Self {
        Self {
            entity: entity.into(),
            key: IdKey::Permanent(key),
        }
    }

    /// Single-column permanent id.
    pub fn of(entity: impl Into<String>, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut key = BTreeMap::new();
        key.insert(column.into(), value.into());
        Self::permanent(entity, key)
    }

    /// Permanent id from the PK columns of a row; `None` if any is `NULL`.
    pub fn from_row<'c>(
        entity: impl Into<String>,
        pk_columns: impl IntoIterator<Item = &'c str>,
        row: &DataRow,
    ) -> Option<Self> {
        let mut key = BTreeMap::new();
        for col in pk_columns {
            let v = row.get(col);
            if v.is_null() {
                return None;
            }
            key.insert(col.to_string(), v.clone());
        }
        if key.is_empty() {
            return None;
        }
        Some(Self::permanent(entity, key))
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn key(&self) -> &IdKey {
        &self.key
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self.key, IdKey::Temporary(_))
    }

    /// PK values of a permanent id.
    pub fn id_snapshot(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.key {
            IdKey::Permanent(key) => Some(key),
            IdKey::Temporary(_) => None,
        }
    }

    /// PK values as a row (empty for a temporary id).
    pub fn to_row(&self) -> DataRow {
        self.id_snapshot()
            .map(|k| DataRow::from(k.clone()))
            .unwrap_or_default()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            IdKey::Temporary(n) => write!(f, "{}<tmp:{n}>", self.entity),
            IdKey::Permanent(key) => {
                let parts: Vec<String> = key.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{}<{}>", self.entity, parts.join(","))
            }
        }
    }
}
