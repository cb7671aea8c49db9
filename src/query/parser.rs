// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Recursive-descent parser for `$filter` and `$orderby` expressions.
//!
//! Precedence, lowest first:
//!
//! ```text
//! or
//! and
//! eq ne gt ge lt le
//! add sub
//! mul div mod
//! - not            (unary)
//! primary          literal | member[/member] | function(args) | ( expr )
//! ```

use super::ast::{BinaryOperator, ConstantValue, Function, QueryNode, UnaryOperator};
use super::description::{OrderByNode, SortDirection};
use super::error::QueryError;
use super::lexer::{Lexer, TokenKind};
use super::temporal::parse_datetime;
use uuid::Uuid;

const SYNTAX_ERROR: &str = "The specified odata query has syntax errors.";

/// Parses a `$filter` expression.
pub fn parse_filter(filter: &str) -> Result<QueryNode, QueryError> {
    let mut parser = Parser::new(filter)?;
    let expr = parser.expression()?;
    parser.expect(TokenKind::End, SYNTAX_ERROR)?;
    Ok(expr)
}

/// Parses a comma-separated `$orderby` list. Direction defaults to ascending.
pub fn parse_order_by(order_by: &str) -> Result<Vec<OrderByNode>, QueryError> {
    let mut parser = Parser::new(order_by)?;
    let mut orderings = Vec::new();
    loop {
        let expression = parser.expression()?;
        let mut direction = SortDirection::Ascending;
        if parser.identifier_is("asc") {
            parser.advance()?;
        } else if parser.identifier_is("desc") {
            parser.advance()?;
            direction = SortDirection::Descending;
        }
        orderings.push(OrderByNode {
            expression,
            direction,
        });
        if parser.kind() != TokenKind::Comma {
            break;
        }
        parser.advance()?;
    }
    parser.expect(TokenKind::End, SYNTAX_ERROR)?;
    Ok(orderings)
}

struct Parser {
    lexer: Lexer,
}

impl Parser {
    fn new(text: &str) -> Result<Self, QueryError> {
        Ok(Self {
            lexer: Lexer::new(text)?,
        })
    }

    fn kind(&self) -> TokenKind {
        self.lexer.token.kind
    }

    fn position(&self) -> usize {
        self.lexer.token.position
    }

    fn advance(&mut self) -> Result<(), QueryError> {
        self.lexer.next_token().map(|_| ())
    }

    fn identifier_is(&self, id: &str) -> bool {
        self.kind() == TokenKind::Identifier && self.lexer.token.text == id
    }

    fn expect(&self, kind: TokenKind, message: &str) -> Result<(), QueryError> {
        if self.kind() == kind {
            Ok(())
        } else {
            Err(QueryError::syntax(message, self.position()))
        }
    }

    fn expression(&mut self) -> Result<QueryNode, QueryError> {
        self.logical_or()
    }

    fn logical_or(&mut self) -> Result<QueryNode, QueryError> {
        let mut left = self.logical_and()?;
        while self.kind() == TokenKind::Or {
            self.advance()?;
            let right = self.logical_and()?;
            left = QueryNode::binary(BinaryOperator::Or, left, right);
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> Result<QueryNode, QueryError> {
        let mut left = self.comparison()?;
        while self.kind() == TokenKind::And {
            self.advance()?;
            let right = self.comparison()?;
            left = QueryNode::binary(BinaryOperator::And, left, right);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<QueryNode, QueryError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.kind() {
                TokenKind::Equal => BinaryOperator::Equal,
                TokenKind::NotEqual => BinaryOperator::NotEqual,
                TokenKind::GreaterThan => BinaryOperator::GreaterThan,
                TokenKind::GreaterThanEqual => BinaryOperator::GreaterThanOrEqual,
                TokenKind::LessThan => BinaryOperator::LessThan,
                TokenKind::LessThanEqual => BinaryOperator::LessThanOrEqual,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.additive()?;
            left = QueryNode::binary(op, left, right);
        }
    }

    fn additive(&mut self) -> Result<QueryNode, QueryError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.kind() {
                TokenKind::Add => BinaryOperator::Add,
                TokenKind::Sub => BinaryOperator::Subtract,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.multiplicative()?;
            left = QueryNode::binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<QueryNode, QueryError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.kind() {
                TokenKind::Multiply => BinaryOperator::Multiply,
                TokenKind::Divide => BinaryOperator::Divide,
                TokenKind::Modulo => BinaryOperator::Modulo,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.unary()?;
            left = QueryNode::binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<QueryNode, QueryError> {
        let op = match self.kind() {
            TokenKind::Minus => UnaryOperator::Negate,
            TokenKind::Not => UnaryOperator::Not,
            _ => return self.primary(),
        };
        let op_position = self.position();
        self.advance()?;

        // Fold "-5" into a negative literal rather than Negate(5).
        if op == UnaryOperator::Negate
            && matches!(self.kind(), TokenKind::IntegerLiteral | TokenKind::RealLiteral)
        {
            self.lexer.token.text.insert(0, '-');
            self.lexer.token.position = op_position;
            return self.primary();
        }

        let operand = self.unary()?;
        Ok(QueryNode::unary(op, operand))
    }

    fn primary(&mut self) -> Result<QueryNode, QueryError> {
        let mut expr = self.primary_start()?;
        while self.kind() == TokenKind::Dot {
            self.advance()?;
            expr = self.member_access(Some(expr))?;
        }
        Ok(expr)
    }

    fn primary_start(&mut self) -> Result<QueryNode, QueryError> {
        match self.kind() {
            TokenKind::Identifier => self.identifier(),
            TokenKind::StringLiteral => self.string_literal().map(QueryNode::constant),
            TokenKind::IntegerLiteral => self.integer_literal(),
            TokenKind::RealLiteral => self.real_literal(),
            TokenKind::OpenParen => self.paren_expression(),
            _ => Err(QueryError::syntax("Expression expected.", self.position())),
        }
    }

    fn identifier(&mut self) -> Result<QueryNode, QueryError> {
        let text = self.lexer.token.text.clone();
        let constant = match text.as_str() {
            "true" => Some(ConstantValue::Bool(true)),
            "false" => Some(ConstantValue::Bool(false)),
            "null" => Some(ConstantValue::Null),
            "datetime" | "datetimeoffset" | "guid" if self.lexer.current_char() == Some('\'') => {
                return self.type_construction();
            }
            _ => None,
        };
        match constant {
            Some(value) => {
                self.advance()?;
                Ok(QueryNode::Constant(value))
            }
            None => self.member_access(None),
        }
    }

    fn member_access(&mut self, instance: Option<QueryNode>) -> Result<QueryNode, QueryError> {
        let position = self.position();
        self.expect(TokenKind::Identifier, "Expected identifier.")?;
        let id = self.lexer.token.text.clone();
        self.advance()?;

        if self.kind() == TokenKind::OpenParen {
            return self.function(&id, position);
        }
        Ok(match instance {
            Some(QueryNode::Member(parent)) => QueryNode::Member(format!("{parent}/{id}")),
            Some(_) => return Err(QueryError::syntax("Expected member path.", position)),
            None => QueryNode::Member(id),
        })
    }

    fn function(&mut self, name: &str, position: usize) -> Result<QueryNode, QueryError> {
        let function = Function::from_name(name).ok_or_else(|| QueryError::UnsupportedFunction {
            name: name.to_string(),
            position,
        })?;
        let args = self.argument_list()?;

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            let message = if min == max {
                format!("Function '{name}' requires {min} parameter(s).")
            } else {
                format!("Function '{name}' requires {min} or {max} parameters.")
            };
            return Err(QueryError::syntax(message, position));
        }
        Ok(QueryNode::call(function, args))
    }

    fn argument_list(&mut self) -> Result<Vec<QueryNode>, QueryError> {
        self.expect(TokenKind::OpenParen, "'(' expected.")?;
        self.advance()?;
        let mut args = Vec::new();
        if self.kind() != TokenKind::CloseParen {
            loop {
                args.push(self.expression()?);
                if self.kind() != TokenKind::Comma {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect(TokenKind::CloseParen, "')' or ',' expected.")?;
        self.advance()?;
        Ok(args)
    }

    fn paren_expression(&mut self) -> Result<QueryNode, QueryError> {
        self.advance()?;
        let expr = self.expression()?;
        self.expect(TokenKind::CloseParen, "')' or operator expected")?;
        self.advance()?;
        Ok(expr)
    }

    fn type_construction(&mut self) -> Result<QueryNode, QueryError> {
        let type_name = self.lexer.token.text.clone();
        self.advance()?;
        let position = self.position();
        let literal = self.string_literal()?;

        let value = match type_name.as_str() {
            "guid" => Uuid::parse_str(&literal).ok().map(ConstantValue::Guid),
            _ => parse_datetime(&literal).map(ConstantValue::DateTime),
        };
        value.map(QueryNode::Constant).ok_or_else(|| {
            QueryError::syntax(
                format!("The specified odata query has invalid '{type_name}' type creation expression."),
                position,
            )
        })
    }

    fn string_literal(&mut self) -> Result<String, QueryError> {
        self.expect(TokenKind::StringLiteral, "Expected string literal.")?;
        let text = &self.lexer.token.text;
        let value = text[1..text.len() - 1].replace("''", "'");
        self.advance()?;
        Ok(value)
    }

    fn integer_literal(&mut self) -> Result<QueryNode, QueryError> {
        let text = &self.lexer.token.text;
        let value: i64 = text.parse().map_err(|_| {
            QueryError::syntax(
                format!("The specified odata query has invalid integer literal '{text}'."),
                self.position(),
            )
        })?;
        self.advance()?;
        // Optional long suffix arrives as its own identifier token.
        if self.kind() == TokenKind::Identifier && self.lexer.token.text.eq_ignore_ascii_case("l") {
            self.advance()?;
        }
        Ok(QueryNode::Constant(ConstantValue::Integer(value)))
    }

    fn real_literal(&mut self) -> Result<QueryNode, QueryError> {
        let text = self.lexer.token.text.trim_end_matches(['f', 'F', 'm', 'M', 'd', 'D']);
        let value: f64 = text.parse().map_err(|_| {
            QueryError::syntax(
                format!("The specified odata query has invalid real literal '{text}'."),
                self.position(),
            )
        })?;
        self.advance()?;
        Ok(QueryNode::Constant(ConstantValue::Real(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn member(name: &str) -> QueryNode {
        QueryNode::member(name)
    }

    #[test]
    fn test_simple_comparison() {
        let node = parse_filter("name eq 'Alice'").unwrap();
        assert_eq!(node, member("name").equals(QueryNode::constant("Alice")));
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let node = parse_filter("a eq 1 or b eq 2 and c eq 3").unwrap();
        let expected = member("a").equals(QueryNode::constant(1)).or(member("b")
            .equals(QueryNode::constant(2))
            .and(member("c").equals(QueryNode::constant(3))));
        assert_eq!(node, expected);
    }

    #[test]
    fn test_add_is_addition() {
        let node = parse_filter("price add 1 gt 10").unwrap();
        let expected = QueryNode::binary(BinaryOperator::Add, member("price"), QueryNode::constant(1))
            .gt(QueryNode::constant(10));
        assert_eq!(node, expected);
    }

    #[test]
    fn test_multiplicative_binds_tighter_than_additive() {
        let node = parse_filter("a add b mul c").unwrap();
        let expected = QueryNode::binary(
            BinaryOperator::Add,
            member("a"),
            QueryNode::binary(BinaryOperator::Multiply, member("b"), member("c")),
        );
        assert_eq!(node, expected);
    }

    #[test]
    fn test_negative_literal_folds() {
        assert_eq!(parse_filter("-5").unwrap(), QueryNode::constant(-5));
        assert_eq!(parse_filter("-2.5").unwrap(), QueryNode::constant(-2.5));
        assert_eq!(
            parse_filter("-price").unwrap(),
            QueryNode::unary(UnaryOperator::Negate, member("price"))
        );
    }

    #[test]
    fn test_not_and_functions() {
        let node = parse_filter("not endswith(name, 'x')").unwrap();
        let expected = QueryNode::call(Function::EndsWith, vec![member("name"), QueryNode::constant("x")]).negate();
        assert_eq!(node, expected);
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_filter("true").unwrap(), QueryNode::constant(true));
        assert_eq!(parse_filter("null").unwrap(), QueryNode::null());
        assert_eq!(parse_filter("10L").unwrap(), QueryNode::constant(10));
        assert_eq!(parse_filter("1.5M").unwrap(), QueryNode::constant(1.5));
        assert_eq!(parse_filter("'it''s'").unwrap(), QueryNode::constant("it's"));
    }

    #[test]
    fn test_typed_literals() {
        let node = parse_filter("datetime'2012-05-29T09:13:28'").unwrap();
        let expected = Utc.with_ymd_and_hms(2012, 5, 29, 9, 13, 28).unwrap();
        assert_eq!(node, QueryNode::constant(expected));

        let node = parse_filter("datetimeoffset'2012-05-29T09:13:28Z'").unwrap();
        assert_eq!(node, QueryNode::constant(expected));

        let node = parse_filter("guid'8a1f4e3c-5b2d-4c6e-9f70-1a2b3c4d5e6f'").unwrap();
        assert!(matches!(node, QueryNode::Constant(ConstantValue::Guid(_))));
    }

    #[test]
    fn test_invalid_typed_literal() {
        let err = parse_filter("guid'nope'").unwrap_err();
        assert_eq!(err.position(), Some(4));
    }

    #[test]
    fn test_datetime_without_quote_is_member() {
        assert_eq!(parse_filter("datetime").unwrap(), member("datetime"));
    }

    #[test]
    fn test_member_path() {
        assert_eq!(parse_filter("address/city").unwrap(), member("address/city"));
    }

    #[test]
    fn test_syntax_error_position() {
        let err = parse_filter("(2 ! ??)").unwrap_err();
        assert_eq!(err.position(), Some(3));
        assert!(matches!(err, QueryError::Syntax { .. }));
    }

    #[test]
    fn test_trailing_tokens_rejected() {
        let err = parse_filter("a eq 1 b").unwrap_err();
        assert_eq!(err.position(), Some(7));
    }

    #[test]
    fn test_missing_close_paren() {
        let err = parse_filter("(a eq 1").unwrap_err();
        assert_eq!(err, QueryError::syntax("')' or operator expected", 7));
    }

    #[test]
    fn test_function_arity() {
        let err = parse_filter("startswith(name)").unwrap_err();
        assert_eq!(err, QueryError::syntax("Function 'startswith' requires 2 parameter(s).", 0));

        let err = parse_filter("substring(name)").unwrap_err();
        assert_eq!(err, QueryError::syntax("Function 'substring' requires 2 or 3 parameters.", 0));

        assert!(parse_filter("substring(name, 1)").is_ok());
        assert!(parse_filter("substring(name, 1, 2)").is_ok());
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_filter("a eq frobnicate(b)").unwrap_err();
        assert_eq!(
            err,
            QueryError::UnsupportedFunction {
                name: "frobnicate".into(),
                position: 5
            }
        );
    }

    #[test]
    fn test_order_by() {
        let order = parse_order_by("name desc, age, id asc").unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].direction, SortDirection::Descending);
        assert_eq!(order[1].direction, SortDirection::Ascending);
        assert_eq!(order[2].expression, member("id"));
    }
}
