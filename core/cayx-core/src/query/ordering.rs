//! ORDER BY 항목과 메모리 내 정렬

use crate::error::CayxResult;
use crate::exp::{Expression, PropertySource};
use std::cmp;

/// 정렬 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// 정렬 항목. 경로는 객체 경로 또는 `db:` 접두사가 붙은 DB 경로입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub expression: Expression,
    pub order: SortOrder,
    pub case_insensitive: bool,
}

impl Ordering {
    pub fn asc(path: &str) -> Self {
        Self::new(path, SortOrder::Ascending)
    }

    pub fn desc(path: &str) -> Self {
        Self::new(path, SortOrder::Descending)
    }

    fn new(path: &str, order: SortOrder) -> Self {
        let expression = match path.strip_prefix("db:") {
            Some(db) => Expression::db_path(db),
            None => Expression::path(path),
        };
        Self {
            expression,
            order,
            case_insensitive: false,
        }
    }

    pub fn ignore_case(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub fn is_ascending(&self) -> bool {
        self.order == SortOrder::Ascending
    }

    /// Compares two property sources; `NULL` sorts first in ascending order.
    pub fn compare(
        &self,
        a: &dyn PropertySource,
        b: &dyn PropertySource,
    ) -> CayxResult<cmp::Ordering> {
        let mut va = self.expression.evaluate(a)?;
        let mut vb = self.expression.evaluate(b)?;
        if self.case_insensitive {
            va = lowercase(va);
            vb = lowercase(vb);
        }
        let ord = va.sort_cmp(&vb);
        Ok(match self.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        })
    }

    /// Stable in-memory sort by a list of orderings.
    pub fn order_list<T: PropertySource>(items: &mut [T], orderings: &[Ordering]) -> CayxResult<()> {
        let mut failure = None;
        items.sort_by(|a, b| {
            for o in orderings {
                match o.compare(a, b) {
                    Ok(cmp::Ordering::Equal) => continue,
                    Ok(ord) => return ord,
                    Err(e) => {
                        failure.get_or_insert(e);
                        return cmp::Ordering::Equal;
                    }
                }
            }
            cmp::Ordering::Equal
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn lowercase(v: crate::value::Value) -> crate::value::Value {
    match v {
        crate::value::Value::Text(s) => crate::value::Value::Text(s.to_lowercase()),
        other => other,
    }
}
