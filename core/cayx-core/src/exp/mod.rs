//! Expression — 한정자 표현식 트리, 파서, 인메모리 평가

pub mod expression;
pub mod parser;

pub use expression::{AggregateFunction, CompareOp, Expression, PropertySource};
pub use parser::parse_expression;
