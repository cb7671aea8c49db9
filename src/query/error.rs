// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

/// Errors raised while parsing or compiling a query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Malformed expression text. `position` is the character offset of the
    /// offending token within the expression.
    #[error("{message} (at position {position})")]
    Syntax { message: String, position: usize },

    #[error("Function '{name}' is not supported (at position {position})")]
    UnsupportedFunction { name: String, position: usize },

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Skip requires take to be set")]
    SkipWithoutTake,

    #[error("Invalid query: {0}")]
    Invalid(String),
}

impl QueryError {
    pub(crate) fn syntax(message: impl Into<String>, position: usize) -> Self {
        QueryError::Syntax {
            message: message.into(),
            position,
        }
    }

    /// Character offset for errors that carry one.
    pub fn position(&self) -> Option<usize> {
        match self {
            QueryError::Syntax { position, .. } | QueryError::UnsupportedFunction { position, .. } => {
                Some(*position)
            }
            _ => None,
        }
    }
}
