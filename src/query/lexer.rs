// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tokenizer for `$filter` / `$orderby` expressions.
//!
//! Positions are character offsets (not byte offsets) so that error
//! reports line up with what a user sees in the query string.

use super::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    End,
    Identifier,
    StringLiteral,
    IntegerLiteral,
    RealLiteral,
    OpenParen,
    CloseParen,
    Comma,
    Minus,
    /// `/` member separator.
    Dot,
    And,
    Or,
    Not,
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Add,
    Sub,
    Multiply,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: usize,
}

pub(crate) struct Lexer {
    chars: Vec<char>,
    pos: usize,
    pub token: Token,
}

impl Lexer {
    pub fn new(expression: &str) -> Result<Self, QueryError> {
        let mut lexer = Self {
            chars: expression.chars().collect(),
            pos: 0,
            token: Token {
                kind: TokenKind::End,
                text: String::new(),
                position: 0,
            },
        };
        lexer.next_token()?;
        Ok(lexer)
    }

    /// Character immediately after the current token.
    pub fn current_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub fn next_token(&mut self) -> Result<&Token, QueryError> {
        while self.current_char().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }

        let start = self.pos;
        let kind = match self.current_char() {
            None => TokenKind::End,
            Some('(') => self.single(TokenKind::OpenParen),
            Some(')') => self.single(TokenKind::CloseParen),
            Some(',') => self.single(TokenKind::Comma),
            Some('-') => self.single(TokenKind::Minus),
            Some('/') => self.single(TokenKind::Dot),
            Some('\'') => {
                self.string_literal()?;
                TokenKind::StringLiteral
            }
            Some(c) if c.is_alphabetic() || c == '@' || c == '_' => {
                self.pos += 1;
                while self
                    .current_char()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '-')
                {
                    self.pos += 1;
                }
                TokenKind::Identifier
            }
            Some(c) if c.is_ascii_digit() => self.numeric_literal()?,
            Some(_) => {
                return Err(QueryError::syntax(
                    "The specified odata query has syntax errors.",
                    self.pos,
                ))
            }
        };

        let text: String = self.chars[start..self.pos].iter().collect();
        self.token = Token {
            kind: reclassify(kind, &text),
            text,
            position: start,
        };
        Ok(&self.token)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    /// Consumes a quoted literal; `''` inside the quotes is an escaped quote.
    fn string_literal(&mut self) -> Result<(), QueryError> {
        loop {
            self.pos += 1;
            while self.current_char().is_some_and(|c| c != '\'') {
                self.pos += 1;
            }
            if self.current_char().is_none() {
                return Err(QueryError::syntax(
                    "The specified odata query has unterminated string literal.",
                    self.pos,
                ));
            }
            self.pos += 1;
            if self.current_char() != Some('\'') {
                return Ok(());
            }
        }
    }

    fn numeric_literal(&mut self) -> Result<TokenKind, QueryError> {
        let mut kind = TokenKind::IntegerLiteral;
        self.skip_digits();

        if self.current_char() == Some('.') {
            kind = TokenKind::RealLiteral;
            self.pos += 1;
            self.expect_digit()?;
            self.skip_digits();
        }
        if matches!(self.current_char(), Some('e' | 'E')) {
            kind = TokenKind::RealLiteral;
            self.pos += 1;
            if matches!(self.current_char(), Some('+' | '-')) {
                self.pos += 1;
            }
            self.expect_digit()?;
            self.skip_digits();
        }
        if matches!(self.current_char(), Some('f' | 'F' | 'm' | 'M' | 'd' | 'D')) {
            kind = TokenKind::RealLiteral;
            self.pos += 1;
        }
        Ok(kind)
    }

    fn skip_digits(&mut self) {
        while self.current_char().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn expect_digit(&self) -> Result<(), QueryError> {
        if self.current_char().is_some_and(|c| c.is_ascii_digit()) {
            Ok(())
        } else {
            Err(QueryError::syntax("Digit expected.", self.pos))
        }
    }
}

fn reclassify(kind: TokenKind, text: &str) -> TokenKind {
    if kind != TokenKind::Identifier {
        return kind;
    }
    match text {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "eq" => TokenKind::Equal,
        "ne" => TokenKind::NotEqual,
        "gt" => TokenKind::GreaterThan,
        "ge" => TokenKind::GreaterThanEqual,
        "lt" => TokenKind::LessThan,
        "le" => TokenKind::LessThanEqual,
        "add" => TokenKind::Add,
        "sub" => TokenKind::Sub,
        "mul" => TokenKind::Multiply,
        "div" => TokenKind::Divide,
        "mod" => TokenKind::Modulo,
        _ => TokenKind::Identifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(input).unwrap();
        let mut out = vec![lexer.token.kind];
        while lexer.token.kind != TokenKind::End {
            out.push(lexer.next_token().unwrap().kind);
        }
        out
    }

    #[test]
    fn test_keywords_and_punctuation() {
        assert_eq!(
            kinds("(a eq 1) and not b/c"),
            vec![
                TokenKind::OpenParen,
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::IntegerLiteral,
                TokenKind::CloseParen,
                TokenKind::And,
                TokenKind::Not,
                TokenKind::Identifier,
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::End,
            ]
        );
    }

    #[test]
    fn test_numeric_literals() {
        assert_eq!(kinds("42"), vec![TokenKind::IntegerLiteral, TokenKind::End]);
        assert_eq!(kinds("4.2"), vec![TokenKind::RealLiteral, TokenKind::End]);
        assert_eq!(kinds("1e10"), vec![TokenKind::RealLiteral, TokenKind::End]);
        assert_eq!(kinds("3M"), vec![TokenKind::RealLiteral, TokenKind::End]);
        assert_eq!(
            kinds("3L"),
            vec![TokenKind::IntegerLiteral, TokenKind::Identifier, TokenKind::End]
        );
    }

    #[test]
    fn test_escaped_quote_stays_in_one_token() {
        let lexer = Lexer::new("'it''s'").unwrap();
        assert_eq!(lexer.token.kind, TokenKind::StringLiteral);
        assert_eq!(lexer.token.text, "'it''s'");
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("'abc").err().unwrap();
        assert_eq!(err.position(), Some(4));
    }

    #[test]
    fn test_unknown_character_position() {
        let mut lexer = Lexer::new("(2 ! ??)").unwrap();
        lexer.next_token().unwrap();
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.position(), Some(3));
    }

    #[test]
    fn test_digit_expected_after_dot() {
        let err = Lexer::new("1.x").err().unwrap();
        assert_eq!(err, QueryError::syntax("Digit expected.", 2));
    }
}
