//! 표현식 문자열 파서
//!
//! sqlparser의 표현식 파서를 재사용합니다. 경로 토큰(`toArtist.artistName`,
//! `paintingArray+.paintingTitle`, `db:ARTIST_ID`)은 SQL 식별자 문법과 맞지 않으므로
//! 파싱 전에 따옴표 식별자로 감싼 뒤, 변환 단계에서 다시 경로로 복원합니다.

use crate::error::{CayxError, CayxResult};
use crate::exp::expression::{AggregateFunction, CompareOp, Expression};
use crate::value::Value;
use sqlparser::ast::{
    BinaryOperator as SqlBinaryOp, Expr as SqlExpr, FunctionArg, FunctionArgExpr,
    FunctionArguments, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "like", "ilike", "in", "between", "is", "null", "true", "false", "escape",
];

/// 문자열을 [`Expression`] 으로 파싱합니다.
///
/// ```rust
/// use cayx_core::exp::Expression;
///
/// let e = Expression::parse("artistName like 'M%' and db:ARTIST_ID > $min").unwrap();
/// assert_eq!(e.param_names(), vec!["min".to_string()]);
/// ```
pub fn parse_expression(input: &str) -> CayxResult<Expression> {
    let quoted = quote_paths(input);
    let dialect = GenericDialect {};
    let parse_err = |e: sqlparser::parser::ParserError| CayxError::ExpressionParse {
        message: e.to_string(),
        expression: input.to_string(),
    };

    let mut parser = Parser::new(&dialect).try_with_sql(&quoted).map_err(parse_err)?;
    let ast = parser.parse_expr().map_err(parse_err)?;
    let trailing = parser.peek_token();
    if trailing.token != Token::EOF {
        return Err(CayxError::ExpressionParse {
            message: format!("unexpected trailing token '{}'", trailing.token),
            expression: input.to_string(),
        });
    }

    convert(&ast).map_err(|message| CayxError::ExpressionParse {
        message,
        expression: input.to_string(),
    })
}

/// 경로 토큰을 `"..."` 로 감쌉니다. 키워드, 함수 이름, 파라미터, 문자열 리터럴은 그대로 둡니다.
fn quote_paths(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // string literal, '' escapes included
            out.push(c);
            i += 1;
            while i < chars.len() {
                out.push(chars[i]);
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                i += 1;
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '+' | ':'))
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            let after_param = start > 0 && chars[start - 1] == '$';
            let is_keyword = KEYWORDS.contains(&word.to_ascii_lowercase().as_str());
            let is_function = chars[i..]
                .iter()
                .find(|c| !c.is_whitespace())
                .is_some_and(|c| *c == '(');

            if after_param || is_keyword || is_function {
                out.push_str(&word);
            } else {
                out.push('"');
                out.push_str(&word);
                out.push('"');
            }
            continue;
        }

        out.push(c);
        i += 1;
    }
    out
}

fn path_from_identifier(name: &str) -> Expression {
    match name.strip_prefix("db:") {
        Some(db) => Expression::DbPath(db.to_string()),
        None => Expression::ObjPath(name.to_string()),
    }
}

fn boxed(e: &SqlExpr) -> Result<Box<Expression>, String> {
    convert(e).map(Box::new)
}

/// sqlparser Expr → Expression 변환
fn convert(expr: &SqlExpr) -> Result<Expression, String> {
    match expr {
        SqlExpr::Identifier(ident) => Ok(path_from_identifier(&ident.value)),
        SqlExpr::CompoundIdentifier(idents) => {
            let joined = idents
                .iter()
                .map(|i| i.value.as_str())
                .collect::<Vec<_>>()
                .join(".");
            Ok(path_from_identifier(&joined))
        }
        SqlExpr::Nested(inner) => convert(inner),
        SqlExpr::Value(value) => convert_value(value),
        SqlExpr::BinaryOp { left, op, right } => {
            let l = convert(left)?;
            let r = convert(right)?;
            match op {
                SqlBinaryOp::And => Ok(l.and(r)),
                SqlBinaryOp::Or => Ok(l.or(r)),
                other => Ok(l.compare(convert_compare_op(other)?, r)),
            }
        }
        SqlExpr::UnaryOp { op, expr } => match op {
            UnaryOperator::Not => Ok(convert(expr)?.not()),
            UnaryOperator::Minus => match convert(expr)? {
                Expression::Literal(Value::Int(i)) => Ok(Expression::Literal(Value::Int(-i))),
                Expression::Literal(Value::Double(d)) => Ok(Expression::Literal(Value::Double(-d))),
                other => Err(format!("unary minus over non-numeric operand {other}")),
            },
            UnaryOperator::Plus => convert(expr),
            other => Err(format!("unsupported unary operator {other}")),
        },
        SqlExpr::IsNull(inner) => {
            Ok(convert(inner)?.compare(CompareOp::Eq, Expression::Literal(Value::Null)))
        }
        SqlExpr::IsNotNull(inner) => {
            Ok(convert(inner)?.compare(CompareOp::NotEq, Expression::Literal(Value::Null)))
        }
        SqlExpr::Like {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Expression::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            ignore_case: false,
            negated: *negated,
        }),
        SqlExpr::ILike {
            negated,
            expr,
            pattern,
            ..
        } => Ok(Expression::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            ignore_case: true,
            negated: *negated,
        }),
        SqlExpr::InList {
            expr,
            list,
            negated,
        } => Ok(Expression::In {
            expr: boxed(expr)?,
            list: list.iter().map(convert).collect::<Result<_, _>>()?,
            negated: *negated,
        }),
        SqlExpr::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Expression::Between {
            expr: boxed(expr)?,
            low: boxed(low)?,
            high: boxed(high)?,
            negated: *negated,
        }),
        SqlExpr::Function(func) => {
            let name = func.name.to_string();
            let agg = AggregateFunction::from_name(&name)
                .ok_or_else(|| format!("unsupported function '{name}'"))?;
            let arg = match &func.args {
                FunctionArguments::List(list) => match list.args.as_slice() {
                    [] | [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => None,
                    [FunctionArg::Unnamed(FunctionArgExpr::Expr(e))] => Some(boxed(e)?),
                    _ => return Err(format!("'{name}' takes exactly one argument")),
                },
                FunctionArguments::None => None,
                FunctionArguments::Subquery(_) => {
                    return Err("subqueries are not supported".to_string());
                }
            };
            if arg.is_none() && agg != AggregateFunction::Count {
                return Err(format!("'{name}' requires an argument"));
            }
            Ok(Expression::Aggregate { func: agg, arg })
        }
        other => Err(format!("unsupported expression: {other}")),
    }
}

fn convert_compare_op(op: &SqlBinaryOp) -> Result<CompareOp, String> {
    match op {
        SqlBinaryOp::Eq => Ok(CompareOp::Eq),
        SqlBinaryOp::NotEq => Ok(CompareOp::NotEq),
        SqlBinaryOp::Lt => Ok(CompareOp::Lt),
        SqlBinaryOp::LtEq => Ok(CompareOp::LtEq),
        SqlBinaryOp::Gt => Ok(CompareOp::Gt),
        SqlBinaryOp::GtEq => Ok(CompareOp::GtEq),
        other => Err(format!("unsupported operator {other}")),
    }
}

fn convert_value(value: &SqlValue) -> Result<Expression, String> {
    let v = match value {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(f) = n.parse::<f64>() {
                Value::Double(f)
            } else {
                return Err(format!("invalid number: {n}"));
            }
        }
        SqlValue::SingleQuotedString(s) => Value::Text(s.clone()),
        SqlValue::Boolean(b) => Value::Bool(*b),
        SqlValue::Null => Value::Null,
        SqlValue::Placeholder(p) => {
            let name = p.trim_start_matches(['$', ':', '?']);
            if name.is_empty() {
                return Err("positional placeholders are not supported, use $name".to_string());
            }
            return Ok(Expression::Param(name.to_string()));
        }
        other => return Err(format!("unsupported literal {other}")),
    };
    Ok(Expression::Literal(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_paths() {
        assert_eq!(
            quote_paths("toArtist.artistName = 'it''s' and db:ARTIST_ID > $p"),
            r#""toArtist.artistName" = 'it''s' and "db:ARTIST_ID" > $p"#
        );
        assert_eq!(quote_paths("count(*)"), "count(*)");
        assert_eq!(
            quote_paths("paintingArray+.paintingTitle is null"),
            r#""paintingArray+.paintingTitle" is null"#
        );
    }

    #[test]
    fn test_parse_paths_and_literals() {
        let e = parse_expression("toArtist.artistName = 'Monet'").unwrap();
        assert_eq!(e, Expression::match_path("toArtist.artistName", "Monet"));

        let e = parse_expression("db:PERSON_TYPE = 'EM'").unwrap();
        assert_eq!(e, Expression::match_db("PERSON_TYPE", "EM"));

        let e = parse_expression("estimatedPrice >= -1.5").unwrap();
        assert_eq!(
            e,
            Expression::path("estimatedPrice").compare(CompareOp::GtEq, Expression::lit(-1.5))
        );
    }

    #[test]
    fn test_parse_boolean_structure() {
        let e = parse_expression("a = 1 and (b = 2 or not c = 3)").unwrap();
        let expected = Expression::match_path("a", 1).and(
            Expression::match_path("b", 2).or(Expression::match_path("c", 3).not()),
        );
        assert_eq!(e, expected);
    }

    #[test]
    fn test_parse_like_in_between() {
        let e = parse_expression("artistName not ilike 'm%'").unwrap();
        assert!(matches!(
            e,
            Expression::Like {
                ignore_case: true,
                negated: true,
                ..
            }
        ));

        let e = parse_expression("artistName in ('a', 'b')").unwrap();
        assert!(matches!(e, Expression::In { ref list, negated: false, .. } if list.len() == 2));

        let e = parse_expression("estimatedPrice between 1 and $max").unwrap();
        assert_eq!(e.param_names(), vec!["max".to_string()]);
    }

    #[test]
    fn test_parse_null_checks() {
        let e = parse_expression("toGallery is not null").unwrap();
        assert_eq!(
            e,
            Expression::path("toGallery").compare(CompareOp::NotEq, Expression::lit(Value::Null))
        );
    }

    #[test]
    fn test_parse_aggregates() {
        assert_eq!(parse_expression("count(*)").unwrap(), Expression::count_all());
        assert_eq!(
            parse_expression("max(estimatedPrice)").unwrap(),
            Expression::aggregate(AggregateFunction::Max, Expression::path("estimatedPrice"))
        );
        assert!(parse_expression("sum(*)").is_err());
    }

    #[test]
    fn test_parse_errors_are_descriptive() {
        let err = parse_expression("artistName = ").unwrap_err();
        assert!(matches!(err, CayxError::ExpressionParse { .. }));
        assert!(err.to_string().contains("artistName ="));

        assert!(parse_expression("a = 1 b").is_err());
        assert!(parse_expression("upper(artistName) = 'X'").is_err());
    }
}
