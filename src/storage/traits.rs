// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use crate::query::{QueryDescription, QueryError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// A table row: column name → JSON value.
pub type Row = Map<String, Value>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Data corruption detected in '{table}': {detail}")]
    Corruption { table: String, detail: String },
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Table '{0}' is not defined")]
    UndefinedTable(String),
    #[error("Column '{column}' is not defined on table '{table}'")]
    UndefinedColumn { table: String, column: String },
    #[error("Invalid row for '{table}': {reason}")]
    InvalidRow { table: String, reason: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Logical column type. Drives how values are stored and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    /// ISO-8601 on the wire, epoch seconds at rest.
    DateTime,
    /// Objects and arrays, stored as JSON text.
    Json,
}

/// Column layout of a local table. `id` (text primary key) is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: BTreeMap<String, ColumnType>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        let mut columns = BTreeMap::new();
        columns.insert(crate::system_columns::ID.to_string(), ColumnType::Text);
        Self {
            name: name.into(),
            columns,
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.insert(name.into(), column_type);
        self
    }

    /// Adds the server-managed columns (`updatedAt`, `version`, `deleted`).
    #[must_use]
    pub fn with_system_columns(self) -> Self {
        self.column(crate::system_columns::UPDATED_AT, ColumnType::DateTime)
            .column(crate::system_columns::VERSION, ColumnType::Text)
            .column(crate::system_columns::DELETED, ColumnType::Boolean)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns.get(name).copied()
    }
}

/// Rows returned by [`LocalStore::read`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    /// Populated when the query asked for a total count.
    pub total_count: Option<u64>,
}

/// Extracts the string `id` of a row.
pub fn row_id(row: &Row) -> Option<&str> {
    row.get(crate::system_columns::ID).and_then(Value::as_str)
}

/// Local table storage used by the sync engine.
///
/// Implementations must be safe to share across tasks. Writes of a single
/// call are atomic: either every row lands or none does.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Creates the table or adds missing columns. Idempotent.
    async fn define_table(&self, definition: TableDefinition) -> Result<(), StorageError>;

    async fn read(&self, query: &QueryDescription) -> Result<QueryResult, StorageError>;

    /// Inserts or merges rows by `id`. Columns absent from a row keep their
    /// stored value. With `from_server` set, columns the local table does
    /// not define are ignored instead of rejected.
    async fn upsert(&self, table: &str, rows: &[Row], from_server: bool) -> Result<(), StorageError>;

    /// Deletes the rows `query` selects. Returns the number removed.
    async fn delete(&self, query: &QueryDescription) -> Result<u64, StorageError>;

    async fn delete_ids(&self, table: &str, ids: &[String]) -> Result<u64, StorageError>;

    async fn lookup(&self, table: &str, id: &str) -> Result<Option<Row>, StorageError>;
}
