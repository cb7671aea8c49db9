// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory evaluation of the filter AST against JSON rows.
//!
//! Mirrors the SQLite semantics the compiler targets closely enough that
//! the memory store and the SQLite store answer the same queries the same
//! way: `LIKE` is ASCII case-insensitive, comparisons against `NULL` are
//! false, integer arithmetic stays integral, and dates compare by instant.

use super::ast::{BinaryOperator, ConstantValue, ConvertType, Function, QueryNode, UnaryOperator};
use super::error::QueryError;
use super::temporal::{format_datetime, from_epoch_seconds, parse_datetime};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

pub type Row = Map<String, Value>;

/// Evaluates `node` against `row`.
pub fn evaluate(node: &QueryNode, row: &Row) -> Result<Value, QueryError> {
    match node {
        QueryNode::Constant(c) => Ok(constant(c)),
        QueryNode::Member(path) => Ok(lookup_path(row, path)),
        QueryNode::Binary { op, left, right } => {
            let left = evaluate(left, row)?;
            let right = evaluate(right, row)?;
            binary(*op, &left, &right)
        }
        QueryNode::Unary { op, operand } => {
            let value = evaluate(operand, row)?;
            Ok(match op {
                UnaryOperator::Not => match truthiness(&value) {
                    Some(b) => Value::Bool(!b),
                    None => Value::Null,
                },
                UnaryOperator::Negate => match &value {
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => i.checked_neg().map_or(Value::Null, Value::from),
                        None => real(-n.as_f64().unwrap_or(0.0)),
                    },
                    _ => Value::Null,
                },
            })
        }
        QueryNode::Function { function, args } => {
            let values = args
                .iter()
                .map(|a| evaluate(a, row))
                .collect::<Result<Vec<_>, _>>()?;
            function_call(*function, &values)
        }
        QueryNode::Convert { target, source } => {
            let value = evaluate(source, row)?;
            Ok(match target {
                ConvertType::Integer => as_f64(&value).map_or(Value::Null, |f| Value::from(f.trunc() as i64)),
                ConvertType::Real => as_f64(&value).map_or(Value::Null, real),
                ConvertType::Text => match value {
                    Value::Null => Value::Null,
                    Value::String(s) => Value::String(s),
                    other => Value::String(other.to_string()),
                },
            })
        }
    }
}

/// True when the filter selects the row. NULL results do not match.
pub fn matches(filter: &QueryNode, row: &Row) -> Result<bool, QueryError> {
    Ok(truthiness(&evaluate(filter, row)?).unwrap_or(false))
}

/// Total order used for sorting: NULL first, then numbers, text, and
/// everything else by JSON text.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => compare_non_null(a, b).unwrap_or_else(|| a.to_string().cmp(&b.to_string())),
    }
}

fn constant(value: &ConstantValue) -> Value {
    match value {
        ConstantValue::Null => Value::Null,
        ConstantValue::Bool(b) => Value::Bool(*b),
        ConstantValue::Integer(i) => Value::from(*i),
        ConstantValue::Real(f) => real(*f),
        ConstantValue::Text(s) => Value::String(s.clone()),
        ConstantValue::DateTime(dt) => Value::String(format_datetime(dt)),
        ConstantValue::Guid(g) => Value::String(g.to_string()),
    }
}

fn lookup_path(row: &Row, path: &str) -> Value {
    let mut segments = path.split('/');
    let first = segments.next().unwrap_or_default();
    let mut current = row.get(first);
    for segment in segments {
        current = current.and_then(|v| v.get(segment));
    }
    current.cloned().unwrap_or(Value::Null)
}

fn real(f: f64) -> Value {
    Number::from_f64(f).map_or(Value::Null, Value::Number)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_datetime(s),
        Value::Number(n) => n.as_f64().and_then(from_epoch_seconds),
        _ => None,
    }
}

fn truthiness(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => Some(!s.is_empty()),
        _ => Some(true),
    }
}

fn compare_non_null(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    if let (Value::String(x), Value::String(y)) = (a, b) {
        if let (Some(dx), Some(dy)) = (parse_datetime(x), parse_datetime(y)) {
            return Some(dx.cmp(&dy));
        }
        return Some(x.cmp(y));
    }
    // Date stored as text on one side, epoch seconds on the other.
    if let (Some(dx), Some(dy)) = (as_datetime(a), as_datetime(b)) {
        return Some(dx.cmp(&dy));
    }
    None
}

fn binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, QueryError> {
    let value = match op {
        BinaryOperator::And => match (truthiness(left), truthiness(right)) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        BinaryOperator::Or => match (truthiness(left), truthiness(right)) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        BinaryOperator::Equal if right.is_null() => Value::Bool(left.is_null()),
        BinaryOperator::NotEqual if right.is_null() => Value::Bool(!left.is_null()),
        op if op.is_comparison() => {
            if left.is_null() || right.is_null() {
                return Ok(Value::Null);
            }
            let Some(ordering) = compare_non_null(left, right) else {
                return Ok(Value::Bool(op == BinaryOperator::NotEqual));
            };
            Value::Bool(match op {
                BinaryOperator::Equal => ordering == Ordering::Equal,
                BinaryOperator::NotEqual => ordering != Ordering::Equal,
                BinaryOperator::GreaterThan => ordering == Ordering::Greater,
                BinaryOperator::GreaterThanOrEqual => ordering != Ordering::Less,
                BinaryOperator::LessThan => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            })
        }
        _ => arithmetic(op, left, right),
    };
    Ok(value)
}

fn arithmetic(op: BinaryOperator, left: &Value, right: &Value) -> Value {
    if let (Some(a), Some(b)) = (as_i64(left), as_i64(right)) {
        let result = match op {
            BinaryOperator::Add => a.checked_add(b),
            BinaryOperator::Subtract => a.checked_sub(b),
            BinaryOperator::Multiply => a.checked_mul(b),
            BinaryOperator::Divide => a.checked_div(b),
            BinaryOperator::Modulo => a.checked_rem(b),
            _ => None,
        };
        return result.map_or(Value::Null, Value::from);
    }
    let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
        return Value::Null;
    };
    match op {
        BinaryOperator::Add => real(a + b),
        BinaryOperator::Subtract => real(a - b),
        BinaryOperator::Multiply => real(a * b),
        BinaryOperator::Divide if b != 0.0 => real(a / b),
        BinaryOperator::Modulo if b.trunc() != 0.0 => (a.trunc() as i64)
            .checked_rem(b.trunc() as i64)
            .map_or(Value::Null, Value::from),
        _ => Value::Null,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn function_call(function: Function, args: &[Value]) -> Result<Value, QueryError> {
    let (min, max) = function.arity();
    if args.len() < min || args.len() > max {
        return Err(QueryError::Invalid(format!(
            "function '{function}' called with {} argument(s)",
            args.len()
        )));
    }

    let value = match function {
        Function::Day => date_part(&args[0], |d| d.day()),
        Function::Month => date_part(&args[0], |d| d.month()),
        Function::Year => date_part(&args[0], |d| d.year() as u32),
        Function::Hour => date_part(&args[0], |d| d.hour()),
        Function::Minute => date_part(&args[0], |d| d.minute()),
        Function::Second => date_part(&args[0], |d| d.second()),
        Function::Floor => as_f64(&args[0]).map_or(Value::Null, |f| Value::from(f.floor() as i64)),
        Function::Ceiling => as_f64(&args[0]).map_or(Value::Null, |f| Value::from(f.ceil() as i64)),
        Function::Round => as_f64(&args[0]).map_or(Value::Null, |f| real(f.round())),
        Function::ToLower => text(&args[0]).map_or(Value::Null, |s| Value::String(s.to_lowercase())),
        Function::ToUpper => text(&args[0]).map_or(Value::Null, |s| Value::String(s.to_uppercase())),
        Function::Length => text(&args[0]).map_or(Value::Null, |s| Value::from(s.chars().count() as i64)),
        Function::Trim => text(&args[0]).map_or(Value::Null, |s| Value::String(s.trim().to_string())),
        Function::SubstringOf => like(&args[1], &args[0], true, true),
        Function::StartsWith => like(&args[0], &args[1], false, true),
        Function::EndsWith => like(&args[0], &args[1], true, false),
        Function::Concat => match (text(&args[0]), text(&args[1])) {
            (Some(a), Some(b)) => Value::String(a + &b),
            _ => Value::Null,
        },
        Function::IndexOf => match (text(&args[0]), text(&args[1])) {
            (Some(h), Some(n)) => Value::from(
                h.find(&n)
                    .map_or(-1, |byte| h[..byte].chars().count() as i64),
            ),
            _ => Value::Null,
        },
        Function::Replace => match (text(&args[0]), text(&args[1]), text(&args[2])) {
            (Some(s), Some(from), Some(to)) if !from.is_empty() => Value::String(s.replace(&from, &to)),
            (Some(s), Some(_), Some(_)) => Value::String(s),
            _ => Value::Null,
        },
        Function::Substring => {
            let (Some(s), Some(start)) = (text(&args[0]), as_i64(&args[1])) else {
                return Ok(Value::Null);
            };
            let start = usize::try_from(start.max(0)).unwrap_or(0);
            let chars = s.chars().skip(start);
            let out: String = match args.get(2).and_then(as_i64) {
                Some(len) => chars.take(usize::try_from(len.max(0)).unwrap_or(0)).collect(),
                None => chars.collect(),
            };
            Value::String(out)
        }
    };
    Ok(value)
}

fn date_part(value: &Value, part: impl Fn(&DateTime<Utc>) -> u32) -> Value {
    as_datetime(value).map_or(Value::Null, |d| Value::from(part(&d)))
}

/// ASCII case-insensitive match, like SQLite's default `LIKE`.
/// Same answer as the compiled `LIKE` idiom: wildcards in the needle stay
/// wildcards.
fn like(haystack: &Value, needle: &Value, leading_wildcard: bool, trailing_wildcard: bool) -> Value {
    let (Some(h), Some(n)) = (text(haystack), text(needle)) else {
        return Value::Null;
    };
    let mut pattern = Vec::with_capacity(n.len() + 2);
    if leading_wildcard {
        pattern.push('%');
    }
    pattern.extend(n.chars());
    if trailing_wildcard {
        pattern.push('%');
    }
    let text: Vec<char> = h.chars().collect();
    Value::Bool(like_match(&pattern, &text))
}

/// SQLite `LIKE`: `%` matches any run, `_` one character, ASCII case folded.
fn like_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut resume: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p).copied() {
            Some('%') => {
                resume = Some((p, t));
                p += 1;
            }
            Some('_') => {
                p += 1;
                t += 1;
            }
            Some(c) if c.eq_ignore_ascii_case(&text[t]) => {
                p += 1;
                t += 1;
            }
            _ => match resume {
                Some((wildcard, start)) => {
                    p = wildcard + 1;
                    t = start + 1;
                    resume = Some((wildcard, start + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}
