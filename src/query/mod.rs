// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query layer: AST, OData parsing/formatting, SQLite compilation and
//! in-memory evaluation.
//!
//! ```text
//! "$filter=age gt 3&$top=10"
//!        │ QueryDescription::parse
//!        ▼
//!  QueryDescription ──to_query_string──▶ remote transport
//!        │
//!        ├── SqlCompiler ──▶ SELECT … WHERE ([age] > @p1) LIMIT 10   (SqliteStore)
//!        └── evaluator   ──▶ row-by-row match                      (MemoryStore)
//! ```

pub mod ast;
pub mod description;
pub mod error;
pub mod evaluator;
mod lexer;
pub mod odata;
pub mod parser;
pub mod sql_compiler;
pub mod temporal;

pub use ast::{BinaryOperator, ConstantValue, ConvertType, Function, QueryNode, UnaryOperator};
pub use description::{OrderByNode, QueryDescription, SortDirection};
pub use error::QueryError;
pub use parser::{parse_filter, parse_order_by};
pub use sql_compiler::{CompiledQuery, CompiledStatement, SqlCompiler, SqlParam};
