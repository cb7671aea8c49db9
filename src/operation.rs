// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued table operations and the rules for collapsing them.
//!
//! At most one live operation exists per `(table, item)`. A new mutation on
//! an item that already has one is folded into it:
//!
//! ```text
//!  existing │ + Insert   + Update          + Delete
//! ──────────┼──────────────────────────────────────────────────────
//!  Insert   │ reject     Insert, new item   both cancelled
//!  Update   │ reject     Update, new item   Delete, new item
//!  Delete   │ reject     reject             reject
//! ```
//!
//! The surviving operation always keeps its original sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;
use crate::error::SyncError;
use crate::query::temporal::{format_datetime, parse_datetime};
use crate::storage::system::columns;
use crate::storage::traits::{row_id, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// Whether the server's response is written back into the local store.
    #[must_use]
    pub fn writes_result_to_store(self) -> bool {
        !matches!(self, OperationKind::Delete)
    }

    /// Whether the payload is persisted with the queued operation. A deleted
    /// row no longer exists locally, so its last state must travel with the op.
    #[must_use]
    pub fn serializes_item_to_queue(self) -> bool {
        matches!(self, OperationKind::Delete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub(crate) fn code(self) -> i64 {
        match self {
            OperationKind::Insert => 0,
            OperationKind::Update => 1,
            OperationKind::Delete => 2,
        }
    }

    pub(crate) fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(OperationKind::Insert),
            1 => Some(OperationKind::Update),
            2 => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationState {
    #[default]
    Pending,
    /// Sent to the server at least once.
    Attempted,
    Completed,
}

impl OperationState {
    pub(crate) fn code(self) -> i64 {
        match self {
            OperationState::Pending => 0,
            OperationState::Attempted => 1,
            OperationState::Completed => 2,
        }
    }

    pub(crate) fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(OperationState::Pending),
            1 => Some(OperationState::Attempted),
            2 => Some(OperationState::Completed),
            _ => None,
        }
    }
}

/// One pending mutation of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOperation {
    pub id: String,
    /// Assigned by the queue; 0 until enqueued.
    pub sequence: u64,
    pub table_name: String,
    pub item_id: String,
    pub kind: OperationKind,
    /// Row payload. `None` means "read it from the local store at push time".
    pub item: Option<Row>,
    pub state: OperationState,
    pub created_at: DateTime<Utc>,
}

/// What [`TableOperation::collapse`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collapse {
    /// Existing operation was updated in place; the new one is absorbed.
    Merged,
    /// Neither operation survives.
    Cancelled,
}

impl TableOperation {
    pub fn new(kind: OperationKind, table_name: impl Into<String>, item_id: impl Into<String>, item: Option<Row>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sequence: 0,
            table_name: table_name.into(),
            item_id: item_id.into(),
            kind,
            item,
            state: OperationState::Pending,
            created_at: Utc::now(),
        }
    }

    pub fn insert(table_name: impl Into<String>, item: Row) -> Result<Self, SyncError> {
        let id = require_id(&item)?;
        Ok(Self::new(OperationKind::Insert, table_name, id, Some(item)))
    }

    pub fn update(table_name: impl Into<String>, item: Row) -> Result<Self, SyncError> {
        let id = require_id(&item)?;
        Ok(Self::new(OperationKind::Update, table_name, id, Some(item)))
    }

    pub fn delete(table_name: impl Into<String>, item: Row) -> Result<Self, SyncError> {
        let id = require_id(&item)?;
        Ok(Self::new(OperationKind::Delete, table_name, id, Some(item)))
    }

    /// Rejects mutations that cannot follow `self` on the same item.
    pub fn validate(&self, new: &TableOperation) -> Result<(), SyncError> {
        use OperationKind::*;
        match (self.kind, new.kind) {
            (Delete, _) => Err(SyncError::InvalidState(format!(
                "A delete operation on item '{}' is already in the queue.",
                self.item_id
            ))),
            (_, Insert) => Err(SyncError::InvalidState(format!(
                "An {} operation on item '{}' is already in the queue.",
                self.kind, self.item_id
            ))),
            _ => Ok(()),
        }
    }

    /// Folds `new` into `self` according to the collapse table.
    pub fn collapse(&mut self, new: TableOperation) -> Result<Collapse, SyncError> {
        self.validate(&new)?;
        match (self.kind, new.kind) {
            (OperationKind::Insert, OperationKind::Delete) => Ok(Collapse::Cancelled),
            (OperationKind::Update, OperationKind::Delete) => {
                self.kind = OperationKind::Delete;
                self.item = new.item;
                Ok(Collapse::Merged)
            }
            _ => {
                self.item = new.item;
                Ok(Collapse::Merged)
            }
        }
    }

    /// Row written to `__operations`.
    pub(crate) fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(crate::system_columns::ID.into(), Value::String(self.id.clone()));
        row.insert(columns::SEQUENCE.into(), Value::from(self.sequence));
        row.insert(columns::TABLE_NAME.into(), Value::String(self.table_name.clone()));
        row.insert(columns::ITEM_ID.into(), Value::String(self.item_id.clone()));
        row.insert(columns::KIND.into(), Value::from(self.kind.code()));
        let item = match (&self.item, self.kind.serializes_item_to_queue()) {
            (Some(item), true) => Value::Object(item.clone()),
            _ => Value::Null,
        };
        row.insert(columns::ITEM.into(), item);
        row.insert(columns::STATE.into(), Value::from(self.state.code()));
        row.insert(columns::CREATED_AT.into(), Value::String(format_datetime(&self.created_at)));
        row
    }

    pub(crate) fn from_row(row: &Row) -> Result<Self, SyncError> {
        let corrupt = |what: &str| SyncError::StoreCorruption(format!("operation row has invalid '{what}': {row:?}"));
        let text = |column: &str| {
            row.get(column)
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| corrupt(column))
        };
        let integer = |column: &str| row.get(column).and_then(Value::as_i64).ok_or_else(|| corrupt(column));

        let sequence = u64::try_from(integer(columns::SEQUENCE)?).map_err(|_| corrupt(columns::SEQUENCE))?;
        let kind = OperationKind::from_code(integer(columns::KIND)?).ok_or_else(|| corrupt(columns::KIND))?;
        let state = OperationState::from_code(integer(columns::STATE)?).ok_or_else(|| corrupt(columns::STATE))?;
        let item = match row.get(columns::ITEM) {
            Some(Value::Object(item)) => Some(item.clone()),
            Some(Value::Null) | None => None,
            Some(_) => return Err(corrupt(columns::ITEM)),
        };
        let created_at = row
            .get(columns::CREATED_AT)
            .and_then(Value::as_str)
            .and_then(parse_datetime)
            .unwrap_or_else(Utc::now);

        Ok(Self {
            id: text(crate::system_columns::ID)?,
            sequence,
            table_name: text(columns::TABLE_NAME)?,
            item_id: text(columns::ITEM_ID)?,
            kind,
            item,
            state,
            created_at,
        })
    }
}

fn require_id(item: &Row) -> Result<String, SyncError> {
    match row_id(item) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(SyncError::InvalidArgument("item must have a non-empty string 'id'".into())),
    }
}
