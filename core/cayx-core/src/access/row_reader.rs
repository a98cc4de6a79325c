//! RowReader — 결과 행 값 → DataRow
//!
//! 번역 결과의 컬럼 설명을 따라 라벨을 붙이고, CHAR 패딩을 제거하고, 복사 컬럼을
//! 채웁니다. DISTINCT가 억제된 쿼리는 여기서 중복 행을 제거합니다.

use crate::error::{CayxError, CayxResult};
use crate::map::{DbEntity, JdbcType};
use crate::row::DataRow;
use crate::translator::TranslatedSelect;
use crate::value::Value;
use ahash::AHashSet;

struct ColumnSlot {
    label: String,
    trim: bool,
    order_only: bool,
}

/// 한 쿼리 실행 동안 사용되는 행 변환기
pub struct RowReader {
    slots: Vec<ColumnSlot>,
    copied: Vec<(String, String)>,
    seen: Option<AHashSet<DataRow>>,
}

impl RowReader {
    pub fn new(translated: &TranslatedSelect) -> Self {
        Self {
            slots: translated
                .columns
                .iter()
                .map(|c| ColumnSlot {
                    label: c.label.clone(),
                    trim: c.jdbc_type == Some(JdbcType::Char),
                    order_only: c.order_only,
                })
                .collect(),
            copied: translated.copied_columns.clone(),
            seen: translated.suppressing_distinct.then(AHashSet::new),
        }
    }

    /// Converts one result row. `None` means the row duplicates an earlier
    /// one of a query whose DISTINCT was suppressed.
    pub fn read(&mut self, values: Vec<Value>) -> CayxResult<Option<DataRow>> {
        if values.len() != self.slots.len() {
            return Err(CayxError::translation(
                format!(
                    "result has {} columns, {} were selected",
                    values.len(),
                    self.slots.len()
                ),
                "row reader",
            ));
        }
        let mut row = DataRow::new();
        for (slot, value) in self.slots.iter().zip(values) {
            if slot.order_only {
                continue;
            }
            let value = match value {
                Value::Text(s) if slot.trim => Value::Text(s.trim_end_matches(' ').to_string()),
                v => v,
            };
            row.insert(slot.label.clone(), value);
        }
        for (target, source) in &self.copied {
            let v = row.get(source).clone();
            row.insert(target.clone(), v);
        }

        if let Some(seen) = &mut self.seen {
            if !seen.insert(row.clone()) {
                return Ok(None);
            }
        }
        Ok(Some(row))
    }

    pub fn read_all(&mut self, rows: Vec<Vec<Value>>) -> CayxResult<Vec<DataRow>> {
        let mut out = Vec::with_capacity(rows.len());
        for values in rows {
            if let Some(row) = self.read(values)? {
                out.push(row);
            }
        }
        Ok(out)
    }
}

/// Row of a joint-prefetched entity inside a root row.
///
/// `None` when the outer join matched nothing (the target key is all `NULL`).
pub fn prefetched_row(row: &DataRow, path: &str, target: &DbEntity) -> Option<DataRow> {
    let sub = row.prefixed(path);
    let has_key = target
        .primary_key()
        .any(|pk| !sub.get(&pk.name).is_null());
    if !has_key {
        return None;
    }
    Some(
        target
            .attributes
            .iter()
            .map(|a| (a.name.clone(), sub.get(&a.name).clone()))
            .collect(),
    )
}

/// Root columns of a row, without prefetch or flattened labels.
pub fn root_row(row: &DataRow) -> DataRow {
    row.iter()
        .filter(|(k, _)| !k.contains('.'))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
