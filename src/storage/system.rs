// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tables the engine keeps for itself inside the local store.
//!
//! ```text
//! __operations  one row per live queued mutation
//! __errors      one row per unresolved push failure
//! __config      key/value settings (delta tokens)
//! ```
//!
//! Names start with `__` so they never collide with synced tables.

use super::traits::{ColumnType, LocalStore, StorageError, TableDefinition};

pub const OPERATIONS_TABLE: &str = "__operations";
pub const ERRORS_TABLE: &str = "__errors";
pub const CONFIG_TABLE: &str = "__config";

/// Column names shared by the system tables.
pub mod columns {
    pub const SEQUENCE: &str = "sequence";
    pub const TABLE_NAME: &str = "tableName";
    pub const ITEM_ID: &str = "itemId";
    pub const KIND: &str = "kind";
    pub const ITEM: &str = "item";
    pub const STATE: &str = "state";
    pub const CREATED_AT: &str = "createdAt";
    pub const OPERATION_ID: &str = "operationId";
    pub const OPERATION_KIND: &str = "operationKind";
    pub const OPERATION_SEQUENCE: &str = "operationSequence";
    pub const HTTP_STATUS: &str = "httpStatus";
    pub const RAW_RESULT: &str = "rawResult";
    pub const RESOLUTION: &str = "resolution";
    pub const VALUE: &str = "value";
}

pub fn operations_definition() -> TableDefinition {
    TableDefinition::new(OPERATIONS_TABLE)
        .column(columns::SEQUENCE, ColumnType::Integer)
        .column(columns::TABLE_NAME, ColumnType::Text)
        .column(columns::ITEM_ID, ColumnType::Text)
        .column(columns::KIND, ColumnType::Integer)
        .column(columns::ITEM, ColumnType::Json)
        .column(columns::STATE, ColumnType::Integer)
        .column(columns::CREATED_AT, ColumnType::DateTime)
}

pub fn errors_definition() -> TableDefinition {
    TableDefinition::new(ERRORS_TABLE)
        .column(columns::OPERATION_ID, ColumnType::Text)
        .column(columns::OPERATION_KIND, ColumnType::Integer)
        .column(columns::OPERATION_SEQUENCE, ColumnType::Integer)
        .column(columns::TABLE_NAME, ColumnType::Text)
        .column(columns::ITEM_ID, ColumnType::Text)
        .column(columns::ITEM, ColumnType::Json)
        .column(columns::HTTP_STATUS, ColumnType::Integer)
        .column(columns::RAW_RESULT, ColumnType::Text)
        .column(columns::RESOLUTION, ColumnType::Integer)
}

pub fn config_definition() -> TableDefinition {
    TableDefinition::new(CONFIG_TABLE).column(columns::VALUE, ColumnType::Text)
}

/// Creates (or upgrades) all system tables.
pub async fn define_system_tables(store: &dyn LocalStore) -> Result<(), StorageError> {
    store.define_table(operations_definition()).await?;
    store.define_table(errors_definition()).await?;
    store.define_table(config_definition()).await
}

pub fn is_system_table(name: &str) -> bool {
    name.starts_with("__")
}
