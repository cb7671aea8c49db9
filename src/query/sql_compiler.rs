// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL Compiler
//!
//! Compiles a [`QueryDescription`] into parameterized SQLite statements.
//! Every literal becomes a named parameter `@p1, @p2, …` numbered in
//! left-to-right traversal order; identifiers are validated and
//! bracket-quoted, so no user text is ever spliced into the SQL.
//!
//! # SQL Generated
//!
//! ```sql
//! SELECT [name], [age] FROM [test] WHERE (([name] = @p1) AND ([age] > @p2)) ORDER BY [age] DESC LIMIT 3 OFFSET 5
//! SELECT COUNT(1) AS [count] FROM [test] WHERE ([age] > @p1)
//! DELETE FROM [test] WHERE [id] IN (SELECT [id] FROM [test] WHERE ([age] > @p1))
//! LIKE('%' || @p1 || '%', [title])                                 -- substringof
//! CAST(strftime('%Y', datetime([due], 'unixepoch')) AS INTEGER)    -- year
//! ```
//!
//! The compiler is pure: the same description always yields the same SQL
//! text and the same parameter list.

use super::ast::{BinaryOperator, ConstantValue, ConvertType, Function, QueryNode, UnaryOperator};
use super::description::{QueryDescription, SortDirection};
use super::error::QueryError;
use super::temporal::to_epoch_seconds;
use std::fmt;

/// Longest identifier accepted for tables and columns.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// SQL parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Integer(i) => write!(f, "{i}"),
            SqlParam::Real(r) => write!(f, "{r}"),
            SqlParam::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// A compiled statement. Parameter `i` (0-based) is bound to `@p{i+1}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStatement {
    pub sql: String,
    pub parameters: Vec<SqlParam>,
}

impl CompiledStatement {
    /// `(name, value)` pairs in binding order.
    pub fn named_parameters(&self) -> impl Iterator<Item = (String, &SqlParam)> {
        self.parameters
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("@p{}", i + 1), p))
    }

    /// SQL with literal values substituted.
    ///
    /// Warning: Only use for logging, never for execution.
    pub fn to_inline_sql(&self) -> String {
        let mut sql = self.sql.clone();
        // Highest index first so @p1 never clobbers @p10.
        for (i, param) in self.parameters.iter().enumerate().rev() {
            sql = sql.replace(&format!("@p{}", i + 1), &param.to_string());
        }
        sql
    }

    /// SQL with `@pN` rewritten to SQLite's numbered `?N` form, for drivers
    /// that bind by position.
    pub fn numbered_sql(&self) -> String {
        let mut sql = self.sql.clone();
        for i in (1..=self.parameters.len()).rev() {
            sql = sql.replace(&format!("@p{i}"), &format!("?{i}"));
        }
        sql
    }
}

/// SELECT plus the optional companion COUNT.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub select: CompiledStatement,
    pub count: Option<CompiledStatement>,
}

/// SQLite compiler for [`QueryDescription`].
pub struct SqlCompiler;

impl SqlCompiler {
    /// SELECT and, when `include_total_count` is set, the COUNT statement.
    pub fn compile(query: &QueryDescription) -> Result<CompiledQuery, QueryError> {
        Ok(CompiledQuery {
            select: Self::compile_select(query)?,
            count: Self::compile_count(query)?,
        })
    }

    pub fn compile_select(query: &QueryDescription) -> Result<CompiledStatement, QueryError> {
        let mut w = Writer::default();
        w.sql.push_str("SELECT ");
        if query.selection.is_empty() {
            w.sql.push('*');
        } else {
            let columns = query
                .selection
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Result<Vec<_>, _>>()?;
            w.sql.push_str(&columns.join(", "));
        }
        w.sql.push_str(" FROM ");
        w.sql.push_str(&quote_identifier(&query.table_name)?);
        w.where_clause(query)?;
        w.order_by(query)?;
        w.limit(query)?;
        Ok(w.finish())
    }

    /// `None` unless the query asks for a total count. Paging is ignored.
    pub fn compile_count(query: &QueryDescription) -> Result<Option<CompiledStatement>, QueryError> {
        if !query.include_total_count {
            return Ok(None);
        }
        let mut w = Writer::default();
        w.sql.push_str("SELECT COUNT(1) AS [count] FROM ");
        w.sql.push_str(&quote_identifier(&query.table_name)?);
        w.where_clause(query)?;
        Ok(Some(w.finish()))
    }

    /// Deletes exactly the rows the equivalent SELECT (filter, order, paging) returns.
    pub fn compile_delete(query: &QueryDescription) -> Result<CompiledStatement, QueryError> {
        let mut ids = query.clone();
        ids.selection = vec![crate::system_columns::ID.to_string()];
        ids.include_total_count = false;
        let inner = Self::compile_select(&ids)?;

        let table = quote_identifier(&query.table_name)?;
        Ok(CompiledStatement {
            sql: format!("DELETE FROM {table} WHERE [id] IN ({})", inner.sql),
            parameters: inner.parameters,
        })
    }

    /// Compiles a bare expression. Parameters start at `@p1`.
    pub fn compile_expression(node: &QueryNode) -> Result<CompiledStatement, QueryError> {
        let mut w = Writer::default();
        w.node(node)?;
        Ok(w.finish())
    }
}

/// Validates and bracket-quotes a table or column name.
pub fn quote_identifier(name: &str) -> Result<String, QueryError> {
    if is_valid_identifier(name) {
        Ok(format!("[{name}]"))
    } else {
        Err(QueryError::InvalidIdentifier(name.to_string()))
    }
}

pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LENGTH && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Default)]
struct Writer {
    sql: String,
    params: Vec<SqlParam>,
}

impl Writer {
    fn finish(self) -> CompiledStatement {
        CompiledStatement {
            sql: self.sql,
            parameters: self.params,
        }
    }

    fn where_clause(&mut self, query: &QueryDescription) -> Result<(), QueryError> {
        if let Some(filter) = &query.filter {
            self.sql.push_str(" WHERE ");
            self.node(filter)?;
        }
        Ok(())
    }

    fn order_by(&mut self, query: &QueryDescription) -> Result<(), QueryError> {
        for (i, ordering) in query.ordering.iter().enumerate() {
            self.sql.push_str(if i == 0 { " ORDER BY " } else { ", " });
            self.node(&ordering.expression)?;
            self.sql.push_str(match ordering.direction {
                SortDirection::Ascending => " ASC",
                SortDirection::Descending => " DESC",
            });
        }
        Ok(())
    }

    fn limit(&mut self, query: &QueryDescription) -> Result<(), QueryError> {
        match (query.take, query.skip) {
            (Some(take), Some(skip)) => self.sql.push_str(&format!(" LIMIT {take} OFFSET {skip}")),
            (Some(take), None) => self.sql.push_str(&format!(" LIMIT {take}")),
            (None, Some(_)) => return Err(QueryError::SkipWithoutTake),
            (None, None) => {}
        }
        Ok(())
    }

    fn param(&mut self, value: SqlParam) {
        self.params.push(value);
        self.sql.push_str(&format!("@p{}", self.params.len()));
    }

    fn node(&mut self, node: &QueryNode) -> Result<(), QueryError> {
        match node {
            QueryNode::Constant(value) => {
                self.constant(value);
                Ok(())
            }
            QueryNode::Member(name) => {
                self.sql.push_str(&quote_identifier(name)?);
                Ok(())
            }
            QueryNode::Binary { op, left, right } => self.binary(*op, left, right),
            QueryNode::Unary { op, operand } => {
                self.sql.push_str(match op {
                    UnaryOperator::Not => "NOT(",
                    UnaryOperator::Negate => "-(",
                });
                self.node(operand)?;
                self.sql.push(')');
                Ok(())
            }
            QueryNode::Function { function, args } => self.function(*function, args),
            QueryNode::Convert { target, source } => {
                self.sql.push_str("CAST(");
                self.node(source)?;
                self.sql.push_str(match target {
                    ConvertType::Integer => " AS INTEGER)",
                    ConvertType::Real => " AS REAL)",
                    ConvertType::Text => " AS TEXT)",
                });
                Ok(())
            }
        }
    }

    fn constant(&mut self, value: &ConstantValue) {
        let param = match value {
            ConstantValue::Null => {
                self.sql.push_str("NULL");
                return;
            }
            ConstantValue::Bool(b) => SqlParam::Integer(i64::from(*b)),
            ConstantValue::Integer(i) => SqlParam::Integer(*i),
            ConstantValue::Real(r) => SqlParam::Real(*r),
            ConstantValue::Text(s) => SqlParam::Text(s.clone()),
            ConstantValue::DateTime(dt) => SqlParam::Real(to_epoch_seconds(dt)),
            ConstantValue::Guid(g) => SqlParam::Text(g.to_string()),
        };
        self.param(param);
    }

    fn binary(&mut self, op: BinaryOperator, left: &QueryNode, right: &QueryNode) -> Result<(), QueryError> {
        self.sql.push('(');
        if op == BinaryOperator::Modulo {
            self.node(&QueryNode::convert(ConvertType::Integer, left.clone()))?;
        } else {
            self.node(left)?;
        }

        if matches!(right, QueryNode::Constant(ConstantValue::Null)) {
            match op {
                BinaryOperator::Equal => self.sql.push_str(" IS NULL"),
                BinaryOperator::NotEqual => self.sql.push_str(" IS NOT NULL"),
                other => {
                    self.sql.push(' ');
                    self.sql.push_str(sql_operator(other));
                    self.sql.push_str(" NULL");
                }
            }
        } else {
            self.sql.push(' ');
            self.sql.push_str(sql_operator(op));
            self.sql.push(' ');
            self.node(right)?;
        }
        self.sql.push(')');
        Ok(())
    }

    fn function(&mut self, function: Function, args: &[QueryNode]) -> Result<(), QueryError> {
        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(QueryError::Invalid(format!(
                "function '{function}' called with {} argument(s)",
                args.len()
            )));
        }

        match function {
            Function::Day => self.date_part("%d", &args[0]),
            Function::Month => self.date_part("%m", &args[0]),
            Function::Year => self.date_part("%Y", &args[0]),
            Function::Hour => self.date_part("%H", &args[0]),
            Function::Minute => self.date_part("%M", &args[0]),
            Function::Second => self.date_part("%S", &args[0]),
            Function::Floor => self.floor(&args[0]),
            Function::Ceiling => self.ceiling(&args[0]),
            Function::Round => {
                self.sql.push_str("ROUND(");
                self.node(&args[0])?;
                self.sql.push_str(", 0)");
                Ok(())
            }
            Function::ToLower => self.call("LOWER", args),
            Function::ToUpper => self.call("UPPER", args),
            Function::Length => self.call("LENGTH", args),
            Function::Trim => self.call("TRIM", args),
            Function::Replace => self.call("REPLACE", args),
            Function::Concat => {
                self.node(&args[0])?;
                self.sql.push_str(" || ");
                self.node(&args[1])
            }
            // substringof(needle, haystack)
            Function::SubstringOf => self.like(&args[0], &args[1], true, true),
            // startswith(haystack, prefix)
            Function::StartsWith => self.like(&args[1], &args[0], false, true),
            Function::EndsWith => self.like(&args[1], &args[0], true, false),
            Function::IndexOf => {
                self.call("INSTR", args)?;
                self.sql.push_str(" - 1");
                Ok(())
            }
            Function::Substring => {
                self.sql.push_str("SUBSTR(");
                self.node(&args[0])?;
                self.sql.push_str(", ");
                self.node(&args[1])?;
                self.sql.push_str(" + 1");
                if let Some(length) = args.get(2) {
                    self.sql.push_str(", ");
                    self.node(length)?;
                }
                self.sql.push(')');
                Ok(())
            }
        }
    }

    /// SQLite has no FLOOR:
    /// `(CASE WHEN (x >= 0) THEN CAST(x AS INTEGER) WHEN (CAST(x AS INTEGER) = x) THEN x ELSE CAST((x - 1) AS INTEGER) END)`
    fn floor(&mut self, arg: &QueryNode) -> Result<(), QueryError> {
        let truncated = QueryNode::convert(ConvertType::Integer, arg.clone());

        self.sql.push_str("(CASE WHEN ");
        self.node(&arg.clone().ge(QueryNode::constant(0)))?;
        self.sql.push_str(" THEN ");
        self.node(&truncated)?;
        self.sql.push_str(" WHEN ");
        self.node(&truncated.clone().equals(arg.clone()))?;
        self.sql.push_str(" THEN ");
        self.node(arg)?;
        self.sql.push_str(" ELSE ");
        self.node(&QueryNode::convert(
            ConvertType::Integer,
            QueryNode::binary(BinaryOperator::Subtract, arg.clone(), QueryNode::constant(1)),
        ))?;
        self.sql.push_str(" END)");
        Ok(())
    }

    /// `floor(x) + (CASE WHEN x = floor(x) THEN 0 ELSE 1 END)`
    fn ceiling(&mut self, arg: &QueryNode) -> Result<(), QueryError> {
        self.floor(arg)?;
        self.sql.push_str(" + (CASE WHEN ");
        self.node(arg)?;
        self.sql.push_str(" = ");
        self.floor(arg)?;
        self.sql.push_str(" THEN 0 ELSE 1 END)");
        Ok(())
    }

    fn call(&mut self, name: &str, args: &[QueryNode]) -> Result<(), QueryError> {
        self.sql.push_str(name);
        self.sql.push('(');
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.node(arg)?;
        }
        self.sql.push(')');
        Ok(())
    }

    fn date_part(&mut self, format: &str, arg: &QueryNode) -> Result<(), QueryError> {
        self.sql.push_str("CAST(strftime('");
        self.sql.push_str(format);
        self.sql.push_str("', datetime(");
        self.node(arg)?;
        self.sql.push_str(", 'unixepoch')) AS INTEGER)");
        Ok(())
    }

    /// `LIKE(['%' || ]pattern[ || '%'], value)`
    fn like(
        &mut self,
        pattern: &QueryNode,
        value: &QueryNode,
        leading_wildcard: bool,
        trailing_wildcard: bool,
    ) -> Result<(), QueryError> {
        self.sql.push_str("LIKE(");
        if leading_wildcard {
            self.sql.push_str("'%' || ");
        }
        self.node(pattern)?;
        if trailing_wildcard {
            self.sql.push_str(" || '%'");
        }
        self.sql.push_str(", ");
        self.node(value)?;
        self.sql.push(')');
        Ok(())
    }
}

fn sql_operator(op: BinaryOperator) -> &'static str {
    match op {
        BinaryOperator::And => "AND",
        BinaryOperator::Or => "OR",
        BinaryOperator::Equal => "=",
        BinaryOperator::NotEqual => "!=",
        BinaryOperator::GreaterThan => ">",
        BinaryOperator::GreaterThanOrEqual => ">=",
        BinaryOperator::LessThan => "<",
        BinaryOperator::LessThanOrEqual => "<=",
        BinaryOperator::Add => "+",
        BinaryOperator::Subtract => "-",
        BinaryOperator::Multiply => "*",
        BinaryOperator::Divide => "/",
        BinaryOperator::Modulo => "%",
    }
}
