//! 한정자(qualifier) 표현식 트리
//!
//! 같은 트리가 SQL로 번역되기도 하고 (translator), 메모리 내에서
//! 직접 평가되기도 합니다 (상속 판별자, 인메모리 필터링).

use crate::error::{CayxError, CayxResult};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;

/// 비교 연산자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        }
    }
}

/// 집계 함수 (컬럼 쿼리 전용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn sql(self) -> &'static str {
        match self {
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }
}

/// 표현식 노드
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    /// 이항 비교. `= NULL` / `<> NULL` 은 `IS [NOT] NULL` 로 번역됩니다.
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Like {
        expr: Box<Expression>,
        pattern: Box<Expression>,
        ignore_case: bool,
        negated: bool,
    },
    In {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
    Between {
        expr: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
    },
    /// 객체 경로 (`toArtist.artistName`), `+` 접미사는 outer join
    ObjPath(String),
    /// DB 경로 (`toArtist.ARTIST_NAME`)
    DbPath(String),
    Literal(Value),
    /// 명명된 파라미터 (`$name`)
    Param(String),
    /// 집계 함수; COUNT(*) 는 인자가 없음
    Aggregate {
        func: AggregateFunction,
        arg: Option<Box<Expression>>,
    },
}

/// 메모리 내 평가를 위한 속성 접근자
pub trait PropertySource {
    /// Value of an object path (`artistName`, `toArtist.artistName`).
    fn obj_path_value(&self, path: &str) -> CayxResult<Value> {
        Err(CayxError::NotSupported(format!(
            "object path '{path}' in in-memory evaluation"
        )))
    }

    /// Value of a DB path (`ARTIST_NAME`).
    fn db_path_value(&self, path: &str) -> CayxResult<Value> {
        Err(CayxError::NotSupported(format!(
            "db path '{path}' in in-memory evaluation"
        )))
    }
}

impl PropertySource for HashMap<String, Value> {
    fn obj_path_value(&self, path: &str) -> CayxResult<Value> {
        Ok(self.get(path).cloned().unwrap_or_default())
    }

    fn db_path_value(&self, path: &str) -> CayxResult<Value> {
        Ok(self.get(path).cloned().unwrap_or_default())
    }
}

// ════════════════════════════════════════════
// Construction
// ════════════════════════════════════════════

impl Expression {
    pub fn path(path: impl Into<String>) -> Self {
        Expression::ObjPath(path.into())
    }

    pub fn db_path(path: impl Into<String>) -> Self {
        Expression::DbPath(path.into())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expression::Param(name.into())
    }

    pub fn compare(self, op: CompareOp, right: Expression) -> Self {
        Expression::Compare {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `path = value`
    pub fn match_path(path: &str, value: impl Into<Value>) -> Self {
        Expression::path(path).compare(CompareOp::Eq, Expression::lit(value))
    }

    /// `db:path = value`
    pub fn match_db(path: &str, value: impl Into<Value>) -> Self {
        Expression::db_path(path).compare(CompareOp::Eq, Expression::lit(value))
    }

    /// `db:column = value AND ...` over every entry of a key map
    pub fn match_all_db<'a>(values: impl IntoIterator<Item = (&'a String, &'a Value)>) -> Self {
        let parts: Vec<Expression> = values
            .into_iter()
            .map(|(k, v)| Expression::match_db(k, v.clone()))
            .collect();
        Expression::and_all(parts).unwrap_or(Expression::Literal(Value::Bool(true)))
    }

    pub fn in_values(expr: Expression, values: impl IntoIterator<Item = Value>) -> Self {
        Expression::In {
            expr: Box::new(expr),
            list: values.into_iter().map(Expression::Literal).collect(),
            negated: false,
        }
    }

    pub fn count_all() -> Self {
        Expression::Aggregate {
            func: AggregateFunction::Count,
            arg: None,
        }
    }

    pub fn aggregate(func: AggregateFunction, arg: Expression) -> Self {
        Expression::Aggregate {
            func,
            arg: Some(Box::new(arg)),
        }
    }

    /// AND 결합 (중첩된 And는 평탄화)
    pub fn and(self, other: Expression) -> Self {
        let mut parts = match self {
            Expression::And(p) => p,
            e => vec![e],
        };
        match other {
            Expression::And(p) => parts.extend(p),
            e => parts.push(e),
        }
        Expression::And(parts)
    }

    pub fn or(self, other: Expression) -> Self {
        let mut parts = match self {
            Expression::Or(p) => p,
            e => vec![e],
        };
        match other {
            Expression::Or(p) => parts.extend(p),
            e => parts.push(e),
        }
        Expression::Or(parts)
    }

    pub fn and_all(parts: Vec<Expression>) -> Option<Self> {
        parts.into_iter().reduce(Expression::and)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expression::Not(Box::new(self))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expression::Aggregate { .. })
    }

    /// Parses an expression string, see [`crate::exp::parser`].
    pub fn parse(s: &str) -> CayxResult<Self> {
        crate::exp::parser::parse_expression(s)
    }
}

// ════════════════════════════════════════════
// Parameters
// ════════════════════════════════════════════

impl Expression {
    /// 파라미터를 값으로 치환한 새 표현식을 반환합니다.
    ///
    /// `prune_missing` 이면 바인딩되지 않은 파라미터를 포함한 조건을 제거하고,
    /// 모든 조건이 제거되면 `None` 을 반환합니다. 아니면 에러입니다.
    pub fn params_with(
        &self,
        params: &HashMap<String, Value>,
        prune_missing: bool,
    ) -> CayxResult<Option<Expression>> {
        match self {
            Expression::Param(name) => match params.get(name) {
                Some(v) => Ok(Some(Expression::Literal(v.clone()))),
                None if prune_missing => Ok(None),
                None => Err(CayxError::invalid(
                    format!("parameter '${name}' is not bound"),
                    "Expression::params_with",
                )),
            },
            Expression::And(parts) | Expression::Or(parts) => {
                let mut out = Vec::with_capacity(parts.len());
                for p in parts {
                    if let Some(e) = p.params_with(params, prune_missing)? {
                        out.push(e);
                    }
                }
                Ok(match out.len() {
                    0 => None,
                    1 => out.pop(),
                    _ if matches!(self, Expression::And(_)) => Some(Expression::And(out)),
                    _ => Some(Expression::Or(out)),
                })
            }
            Expression::Not(inner) => Ok(inner
                .params_with(params, prune_missing)?
                .map(|e| Expression::Not(Box::new(e)))),
            Expression::Compare { op, left, right } => {
                let (Some(l), Some(r)) = (
                    left.params_with(params, prune_missing)?,
                    right.params_with(params, prune_missing)?,
                ) else {
                    return Ok(None);
                };
                Ok(Some(l.compare(*op, r)))
            }
            Expression::Like {
                expr,
                pattern,
                ignore_case,
                negated,
            } => {
                let (Some(e), Some(p)) = (
                    expr.params_with(params, prune_missing)?,
                    pattern.params_with(params, prune_missing)?,
                ) else {
                    return Ok(None);
                };
                Ok(Some(Expression::Like {
                    expr: Box::new(e),
                    pattern: Box::new(p),
                    ignore_case: *ignore_case,
                    negated: *negated,
                }))
            }
            Expression::In { expr, list, negated } => {
                let Some(e) = expr.params_with(params, prune_missing)? else {
                    return Ok(None);
                };
                let mut items = Vec::with_capacity(list.len());
                for item in list {
                    match item.params_with(params, prune_missing)? {
                        // a list parameter expands in place
                        Some(Expression::Literal(Value::Null)) if matches!(item, Expression::Param(_)) => {}
                        Some(i) => items.push(i),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Expression::In {
                    expr: Box::new(e),
                    list: items,
                    negated: *negated,
                }))
            }
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let (Some(e), Some(l), Some(h)) = (
                    expr.params_with(params, prune_missing)?,
                    low.params_with(params, prune_missing)?,
                    high.params_with(params, prune_missing)?,
                ) else {
                    return Ok(None);
                };
                Ok(Some(Expression::Between {
                    expr: Box::new(e),
                    low: Box::new(l),
                    high: Box::new(h),
                    negated: *negated,
                }))
            }
            Expression::Aggregate { func, arg } => {
                let arg = match arg {
                    Some(a) => match a.params_with(params, prune_missing)? {
                        Some(a) => Some(Box::new(a)),
                        None => return Ok(None),
                    },
                    None => None,
                };
                Ok(Some(Expression::Aggregate { func: *func, arg }))
            }
            other => Ok(Some(other.clone())),
        }
    }

    /// Names of every parameter referenced by the tree.
    pub fn param_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit(&mut |e| {
            if let Expression::Param(name) = e {
                out.push(name.clone());
            }
        });
        out
    }

    /// Pre-order traversal.
    pub fn visit(&self, f: &mut dyn FnMut(&Expression)) {
        f(self);
        match self {
            Expression::And(parts) | Expression::Or(parts) => {
                parts.iter().for_each(|p| p.visit(f));
            }
            Expression::Not(inner) => inner.visit(f),
            Expression::Compare { left, right, .. } => {
                left.visit(f);
                right.visit(f);
            }
            Expression::Like { expr, pattern, .. } => {
                expr.visit(f);
                pattern.visit(f);
            }
            Expression::In { expr, list, .. } => {
                expr.visit(f);
                list.iter().for_each(|p| p.visit(f));
            }
            Expression::Between { expr, low, high, .. } => {
                expr.visit(f);
                low.visit(f);
                high.visit(f);
            }
            Expression::Aggregate { arg: Some(a), .. } => a.visit(f),
            _ => {}
        }
    }
}

// ════════════════════════════════════════════
// In-memory evaluation
// ════════════════════════════════════════════

impl Expression {
    /// 표현식을 값으로 평가합니다.
    pub fn evaluate(&self, source: &dyn PropertySource) -> CayxResult<Value> {
        match self {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::ObjPath(p) => source.obj_path_value(p.trim_end_matches('+')),
            Expression::DbPath(p) => source.db_path_value(p),
            Expression::Param(name) => Err(CayxError::invalid(
                format!("parameter '${name}' is not bound"),
                "Expression::evaluate",
            )),
            Expression::Aggregate { .. } => Err(CayxError::NotSupported(
                "aggregate functions in in-memory evaluation".to_string(),
            )),
            _ => self.matches(source).map(Value::Bool),
        }
    }

    /// 불리언 조건으로 평가합니다. NULL 비교는 false 입니다.
    pub fn matches(&self, source: &dyn PropertySource) -> CayxResult<bool> {
        match self {
            Expression::And(parts) => {
                for p in parts {
                    if !p.matches(source)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expression::Or(parts) => {
                for p in parts {
                    if p.matches(source)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expression::Not(inner) => Ok(!inner.matches(source)?),
            Expression::Compare { op, left, right } => {
                let l = left.evaluate(source)?;
                let r = right.evaluate(source)?;
                Ok(match (op, l.is_null() || r.is_null()) {
                    (CompareOp::Eq, true) => l.is_null() && r.is_null(),
                    (CompareOp::NotEq, true) => l.is_null() != r.is_null(),
                    (_, true) => false,
                    (op, false) => {
                        let Some(ord) = l.compare(&r) else {
                            return Ok(false);
                        };
                        match op {
                            CompareOp::Eq => ord.is_eq(),
                            CompareOp::NotEq => ord.is_ne(),
                            CompareOp::Lt => ord.is_lt(),
                            CompareOp::LtEq => ord.is_le(),
                            CompareOp::Gt => ord.is_gt(),
                            CompareOp::GtEq => ord.is_ge(),
                        }
                    }
                })
            }
            Expression::Like {
                expr,
                pattern,
                ignore_case,
                negated,
            } => {
                let v = expr.evaluate(source)?;
                let p = pattern.evaluate(source)?;
                let (Some(v), Some(p)) = (v.as_str(), p.as_str()) else {
                    return Ok(false);
                };
                let m = if *ignore_case {
                    like_match(&v.to_lowercase(), &p.to_lowercase())
                } else {
                    like_match(v, p)
                };
                Ok(m != *negated)
            }
            Expression::In { expr, list, negated } => {
                let v = expr.evaluate(source)?;
                if v.is_null() {
                    return Ok(false);
                }
                let mut found = false;
                for item in list {
                    if v.sql_eq(&item.evaluate(source)?) {
                        found = true;
                        break;
                    }
                }
                Ok(found != *negated)
            }
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = expr.evaluate(source)?;
                let lo = low.evaluate(source)?;
                let hi = high.evaluate(source)?;
                let inside = matches!(v.compare(&lo), Some(o) if o.is_ge())
                    && matches!(v.compare(&hi), Some(o) if o.is_le());
                Ok(inside != *negated)
            }
            other => Ok(other.evaluate(source)?.as_bool().unwrap_or(false)),
        }
    }
}

/// SQL LIKE 패턴 매칭 (`%` 임의 문자열, `_` 한 문자)
fn like_match(value: &str, pattern: &str) -> bool {
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    // dp[j]: pattern[..i] matches value[..j]
    let mut dp = vec![false; v.len() + 1];
    dp[0] = true;
    for pc in &p {
        let mut next = vec![false; v.len() + 1];
        match pc {
            '%' => {
                let mut any = false;
                for j in 0..=v.len() {
                    any |= dp[j];
                    next[j] = any;
                }
            }
            '_' => {
                for j in 1..=v.len() {
                    next[j] = dp[j - 1];
                }
            }
            c => {
                for j in 1..=v.len() {
                    next[j] = dp[j - 1] && v[j - 1] == *c;
                }
            }
        }
        dp = next;
    }
    dp[v.len()]
}

// ════════════════════════════════════════════
// Display (parseable form)
// ════════════════════════════════════════════

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn child(f: &mut fmt::Formatter<'_>, e: &Expression) -> fmt::Result {
            match e {
                Expression::And(_) | Expression::Or(_) => write!(f, "({e})"),
                _ => write!(f, "{e}"),
            }
        }
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Expression], sep: &str) -> fmt::Result {
            for (i, p) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                child(f, p)?;
            }
            Ok(())
        }
        match self {
            Expression::And(parts) => join(f, parts, "and"),
            Expression::Or(parts) => join(f, parts, "or"),
            Expression::Not(inner) => write!(f, "not ({inner})"),
            Expression::Compare { op, left, right } => match (op, right.as_ref()) {
                (CompareOp::Eq, Expression::Literal(Value::Null)) => write!(f, "{left} is null"),
                (CompareOp::NotEq, Expression::Literal(Value::Null)) => {
                    write!(f, "{left} is not null")
                }
                _ => write!(f, "{left} {} {right}", op.sql()),
            },
            Expression::Like {
                expr,
                pattern,
                ignore_case,
                negated,
            } => {
                let kw = if *ignore_case { "ilike" } else { "like" };
                let not = if *negated { "not " } else { "" };
                write!(f, "{expr} {not}{kw} {pattern}")
            }
            Expression::In { expr, list, negated } => {
                let not = if *negated { "not " } else { "" };
                write!(f, "{expr} {not}in (")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Expression::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not = if *negated { "not " } else { "" };
                write!(f, "{expr} {not}between {low} and {high}")
            }
            Expression::ObjPath(p) => write!(f, "{p}"),
            Expression::DbPath(p) => write!(f, "db:{p}"),
            Expression::Literal(v) => match v {
                Value::Null => write!(f, "null"),
                Value::Bool(b) => write!(f, "{b}"),
                v => write!(f, "{}", v.to_sql_literal()),
            },
            Expression::Param(name) => write!(f, "${name}"),
            Expression::Aggregate { func, arg } => match arg {
                Some(a) => write!(f, "{}({a})", func.sql().to_lowercase()),
                None => write!(f, "{}(*)", func.sql().to_lowercase()),
            },
        }
    }
}
