//! DataRow — 컬럼 이름 → 값 맵
//!
//! 조회 결과 행, 스냅샷, 배치 파라미터가 모두 이 형태를 사용합니다.

use crate::error::{CayxError, CayxResult};
use crate::exp::PropertySource;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 하나의 데이터 행
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataRow {
    values: BTreeMap<String, Value>,
}

impl DataRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// Missing columns read as `NULL`.
    pub fn get(&self, column: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.values.get(column).unwrap_or(NULL)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn columns(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sub-row of the given columns (missing ones as `NULL`).
    pub fn project<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> DataRow {
        DataRow {
            values: columns
                .into_iter()
                .map(|c| (c.to_string(), self.get(c).clone()))
                .collect(),
        }
    }

    /// Columns labeled `prefix.COL`, with the prefix stripped.
    pub fn prefixed(&self, prefix: &str) -> DataRow {
        let lead = format!("{prefix}.");
        DataRow {
            values: self
                .values
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(lead.as_str())
                        .filter(|rest| !rest.contains('.'))
                        .map(|rest| (rest.to_string(), v.clone()))
                })
                .collect(),
        }
    }

    /// Whether every value is `NULL` (an unmatched outer join).
    pub fn all_null(&self) -> bool {
        self.values.values().all(Value::is_null)
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.values
    }
}

impl From<BTreeMap<String, Value>> for DataRow {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, Value)> for DataRow {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl PropertySource for DataRow {
    fn db_path_value(&self, path: &str) -> CayxResult<Value> {
        Ok(self.get(path).clone())
    }
}

// ════════════════════════════════════════════
// Typed mapping
// ════════════════════════════════════════════

/// DataRow → 타입 변환. `#[derive(DataObject)]`가 구현을 생성합니다.
pub trait FromDataRow: Sized {
    fn from_row(row: &DataRow) -> CayxResult<Self>;
}

/// 컬럼 값 → Rust 값
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> CayxResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> CayxError {
    CayxError::invalid(format!("expected {expected}, found {value}"), "FromValue")
}

impl FromValue for Value {
    fn from_value(value: &Value) -> CayxResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> CayxResult<Self> {
        value.as_i64().ok_or_else(|| mismatch("integer", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> CayxResult<Self> {
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| mismatch("32-bit integer", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> CayxResult<Self> {
        value.as_f64().ok_or_else(|| mismatch("number", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> CayxResult<Self> {
        value.as_bool().ok_or_else(|| mismatch("boolean", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> CayxResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("text", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> CayxResult<Self> {
        match value {
            Value::Bytes(b) => Ok(b.clone()),
            other => Err(mismatch("bytes", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> CayxResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

impl FromDataRow for DataRow {
    fn from_row(row: &DataRow) -> CayxResult<Self> {
        Ok(row.clone())
    }
}
