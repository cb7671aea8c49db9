// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter AST
//!
//! Provider-neutral expression tree shared by the parser, the SQLite
//! compiler, the OData formatter and the in-memory evaluator.
//!
//! # Example
//!
//! ```rust
//! use offline_sync::query::{QueryNode, ConstantValue};
//!
//! // name eq 'Alice' and age gt 30
//! let filter = QueryNode::member("name")
//!     .equals(QueryNode::constant("Alice"))
//!     .and(QueryNode::member("age").gt(QueryNode::constant(30)));
//!
//! assert!(matches!(filter, QueryNode::Binary { .. }));
//! assert_eq!(ConstantValue::from(30), ConstantValue::Integer(30));
//! ```

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// Filter expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Literal value.
    Constant(ConstantValue),
    /// Column reference. Nested paths are joined with `/`.
    Member(String),
    Binary {
        op: BinaryOperator,
        left: Box<QueryNode>,
        right: Box<QueryNode>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<QueryNode>,
    },
    /// Built-in function call.
    Function {
        function: Function,
        args: Vec<QueryNode>,
    },
    /// Storage-level type cast. Never produced by the parser.
    Convert {
        target: ConvertType,
        source: Box<QueryNode>,
    },
}

/// Literal values the grammar can express.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    And,
    Or,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConvertType {
    Integer,
    Real,
    Text,
}

/// Built-in functions with fixed arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Day,
    Month,
    Year,
    Hour,
    Minute,
    Second,
    Floor,
    Ceiling,
    Round,
    ToLower,
    ToUpper,
    Length,
    Trim,
    SubstringOf,
    StartsWith,
    EndsWith,
    Concat,
    IndexOf,
    Replace,
    Substring,
}

impl Function {
    pub const ALL: [Function; 20] = [
        Function::Day,
        Function::Month,
        Function::Year,
        Function::Hour,
        Function::Minute,
        Function::Second,
        Function::Floor,
        Function::Ceiling,
        Function::Round,
        Function::ToLower,
        Function::ToUpper,
        Function::Length,
        Function::Trim,
        Function::SubstringOf,
        Function::StartsWith,
        Function::EndsWith,
        Function::Concat,
        Function::IndexOf,
        Function::Replace,
        Function::Substring,
    ];

    /// Wire name as written in a `$filter` expression.
    pub fn name(self) -> &'static str {
        match self {
            Function::Day => "day",
            Function::Month => "month",
            Function::Year => "year",
            Function::Hour => "hour",
            Function::Minute => "minute",
            Function::Second => "second",
            Function::Floor => "floor",
            Function::Ceiling => "ceiling",
            Function::Round => "round",
            Function::ToLower => "tolower",
            Function::ToUpper => "toupper",
            Function::Length => "length",
            Function::Trim => "trim",
            Function::SubstringOf => "substringof",
            Function::StartsWith => "startswith",
            Function::EndsWith => "endswith",
            Function::Concat => "concat",
            Function::IndexOf => "indexof",
            Function::Replace => "replace",
            Function::Substring => "substring",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Accepted argument counts (inclusive).
    pub fn arity(self) -> (usize, usize) {
        match self {
            Function::Day
            | Function::Month
            | Function::Year
            | Function::Hour
            | Function::Minute
            | Function::Second
            | Function::Floor
            | Function::Ceiling
            | Function::Round
            | Function::ToLower
            | Function::ToUpper
            | Function::Length
            | Function::Trim => (1, 1),
            Function::SubstringOf
            | Function::StartsWith
            | Function::EndsWith
            | Function::Concat
            | Function::IndexOf => (2, 2),
            Function::Replace => (3, 3),
            Function::Substring => (2, 3),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl BinaryOperator {
    /// OData keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            BinaryOperator::And => "and",
            BinaryOperator::Or => "or",
            BinaryOperator::Equal => "eq",
            BinaryOperator::NotEqual => "ne",
            BinaryOperator::GreaterThan => "gt",
            BinaryOperator::GreaterThanOrEqual => "ge",
            BinaryOperator::LessThan => "lt",
            BinaryOperator::LessThanOrEqual => "le",
            BinaryOperator::Add => "add",
            BinaryOperator::Subtract => "sub",
            BinaryOperator::Multiply => "mul",
            BinaryOperator::Divide => "div",
            BinaryOperator::Modulo => "mod",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterThanOrEqual
                | BinaryOperator::LessThan
                | BinaryOperator::LessThanOrEqual
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl QueryNode {
    pub fn member(name: impl Into<String>) -> Self {
        QueryNode::Member(name.into())
    }

    pub fn constant(value: impl Into<ConstantValue>) -> Self {
        QueryNode::Constant(value.into())
    }

    pub fn null() -> Self {
        QueryNode::Constant(ConstantValue::Null)
    }

    pub fn binary(op: BinaryOperator, left: QueryNode, right: QueryNode) -> Self {
        QueryNode::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOperator, operand: QueryNode) -> Self {
        QueryNode::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(function: Function, args: Vec<QueryNode>) -> Self {
        QueryNode::Function { function, args }
    }

    pub fn convert(target: ConvertType, source: QueryNode) -> Self {
        QueryNode::Convert {
            target,
            source: Box::new(source),
        }
    }

    pub fn and(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::And, self, other)
    }

    pub fn or(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::Or, self, other)
    }

    pub fn negate(self) -> Self {
        Self::unary(UnaryOperator::Not, self)
    }

    pub fn equals(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::Equal, self, other)
    }

    pub fn not_equals(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::NotEqual, self, other)
    }

    pub fn gt(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::GreaterThan, self, other)
    }

    pub fn ge(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::GreaterThanOrEqual, self, other)
    }

    pub fn lt(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::LessThan, self, other)
    }

    pub fn le(self, other: QueryNode) -> Self {
        Self::binary(BinaryOperator::LessThanOrEqual, self, other)
    }
}

impl From<bool> for ConstantValue {
    fn from(v: bool) -> Self {
        ConstantValue::Bool(v)
    }
}

impl From<i64> for ConstantValue {
    fn from(v: i64) -> Self {
        ConstantValue::Integer(v)
    }
}

impl From<i32> for ConstantValue {
    fn from(v: i32) -> Self {
        ConstantValue::Integer(i64::from(v))
    }
}

impl From<f64> for ConstantValue {
    fn from(v: f64) -> Self {
        ConstantValue::Real(v)
    }
}

impl From<&str> for ConstantValue {
    fn from(v: &str) -> Self {
        ConstantValue::Text(v.to_string())
    }
}

impl From<String> for ConstantValue {
    fn from(v: String) -> Self {
        ConstantValue::Text(v)
    }
}

impl From<DateTime<Utc>> for ConstantValue {
    fn from(v: DateTime<Utc>) -> Self {
        ConstantValue::DateTime(v)
    }
}

impl From<Uuid> for ConstantValue {
    fn from(v: Uuid) -> Self {
        ConstantValue::Guid(v)
    }
}
