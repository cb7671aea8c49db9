// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Push failures and their aggregate result.
//!
//! When the server rejects an operation (conflict, precondition failed,
//! validation) the push records a [`TableOperationError`] in `__errors` and
//! moves on. At the end of the push every unresolved record is handed to
//! the [`crate::SyncHandler`] inside a [`PushCompletionResult`].

use serde_json::Value;
use std::fmt;
use uuid::Uuid;
use crate::error::SyncError;
use crate::operation::{OperationKind, TableOperation};
use crate::storage::system::columns;
use crate::storage::traits::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Unresolved,
    /// The local value was kept and queued again.
    ResolvedByClientValue,
    /// The local change was dropped.
    ResolvedByDiscard,
}

impl Resolution {
    fn code(self) -> i64 {
        match self {
            Resolution::Unresolved => 0,
            Resolution::ResolvedByClientValue => 1,
            Resolution::ResolvedByDiscard => 2,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Resolution::Unresolved),
            1 => Some(Resolution::ResolvedByClientValue),
            2 => Some(Resolution::ResolvedByDiscard),
            _ => None,
        }
    }
}

/// A server rejection of one queued operation.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOperationError {
    pub id: String,
    pub operation_id: String,
    pub operation_kind: OperationKind,
    pub operation_sequence: u64,
    pub table_name: String,
    pub item_id: String,
    /// The payload that was sent.
    pub item: Option<Row>,
    pub http_status: Option<u16>,
    /// Response body as received.
    pub raw_result: Option<String>,
    /// `raw_result` parsed as JSON, when it is JSON.
    pub result: Option<Value>,
    pub resolution: Resolution,
}

impl TableOperationError {
    pub fn new(operation: &TableOperation, http_status: Option<u16>, raw_result: Option<String>) -> Self {
        let result = raw_result.as_deref().and_then(|raw| serde_json::from_str(raw).ok());
        Self {
            id: Uuid::new_v4().to_string(),
            operation_id: operation.id.clone(),
            operation_kind: operation.kind,
            operation_sequence: operation.sequence,
            table_name: operation.table_name.clone(),
            item_id: operation.item_id.clone(),
            item: operation.item.clone(),
            http_status,
            raw_result,
            result,
            resolution: Resolution::Unresolved,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution != Resolution::Unresolved
    }

    /// The server's copy of the row, when the response body carried one.
    pub fn server_item(&self) -> Option<&Row> {
        self.result.as_ref().and_then(Value::as_object)
    }

    pub(crate) fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(crate::system_columns::ID.into(), Value::String(self.id.clone()));
        row.insert(columns::OPERATION_ID.into(), Value::String(self.operation_id.clone()));
        row.insert(columns::OPERATION_KIND.into(), Value::from(self.operation_kind.code()));
        row.insert(columns::OPERATION_SEQUENCE.into(), Value::from(self.operation_sequence));
        row.insert(columns::TABLE_NAME.into(), Value::String(self.table_name.clone()));
        row.insert(columns::ITEM_ID.into(), Value::String(self.item_id.clone()));
        row.insert(
            columns::ITEM.into(),
            self.item.clone().map_or(Value::Null, Value::Object),
        );
        row.insert(
            columns::HTTP_STATUS.into(),
            self.http_status.map_or(Value::Null, Value::from),
        );
        row.insert(
            columns::RAW_RESULT.into(),
            self.raw_result.clone().map_or(Value::Null, Value::String),
        );
        row.insert(columns::RESOLUTION.into(), Value::from(self.resolution.code()));
        row
    }

    pub(crate) fn from_row(row: &Row) -> Result<Self, SyncError> {
        let corrupt = |what: &str| SyncError::StoreCorruption(format!("sync error row has invalid '{what}'"));
        let text = |column: &str| {
            row.get(column)
                .and_then(Value::as_str)
                .map(String::from)
                .ok_or_else(|| corrupt(column))
        };
        let integer = |column: &str| row.get(column).and_then(Value::as_i64);

        let operation_kind = integer(columns::OPERATION_KIND)
            .and_then(OperationKind::from_code)
            .ok_or_else(|| corrupt(columns::OPERATION_KIND))?;
        let resolution = integer(columns::RESOLUTION)
            .map_or(Some(Resolution::Unresolved), Resolution::from_code)
            .ok_or_else(|| corrupt(columns::RESOLUTION))?;
        let raw_result = row.get(columns::RAW_RESULT).and_then(Value::as_str).map(String::from);
        let result = raw_result.as_deref().and_then(|raw| serde_json::from_str(raw).ok());

        Ok(Self {
            id: text(crate::system_columns::ID)?,
            operation_id: text(columns::OPERATION_ID)?,
            operation_kind,
            operation_sequence: integer(columns::OPERATION_SEQUENCE)
                .and_then(|s| u64::try_from(s).ok())
                .unwrap_or(0),
            table_name: text(columns::TABLE_NAME)?,
            item_id: text(columns::ITEM_ID)?,
            item: row.get(columns::ITEM).and_then(Value::as_object).cloned(),
            http_status: integer(columns::HTTP_STATUS).and_then(|s| u16::try_from(s).ok()),
            raw_result,
            result,
            resolution,
        })
    }
}

impl fmt::Display for TableOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of '{}' in '{}' rejected", self.operation_kind, self.item_id, self.table_name)?;
        if let Some(status) = self.http_status {
            write!(f, " with status {status}")?;
        }
        Ok(())
    }
}

/// How a push ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// The queue (or the requested tables) drained.
    Complete,
    /// Transport failure; the current operation stays queued.
    CancelledByNetworkError,
    CancelledByAuthenticationError,
    /// The handler returned [`crate::ExecutionOutcome::Abort`].
    CancelledByOperation,
    /// The caller's cancellation token fired between operations.
    CancelledByToken,
    /// The local store failed while loading or writing back an item.
    CancelledBySyncStoreError,
}

impl PushStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PushStatus::Complete => "Complete",
            PushStatus::CancelledByNetworkError => "CancelledByNetworkError",
            PushStatus::CancelledByAuthenticationError => "CancelledByAuthenticationError",
            PushStatus::CancelledByOperation => "CancelledByOperation",
            PushStatus::CancelledByToken => "CancelledByToken",
            PushStatus::CancelledBySyncStoreError => "CancelledBySyncStoreError",
        }
    }
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate outcome handed to [`crate::SyncHandler::on_push_complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct PushCompletionResult {
    pub status: PushStatus,
    /// Sync errors recorded so far, in operation order.
    pub errors: Vec<TableOperationError>,
}

impl PushCompletionResult {
    pub fn new(status: PushStatus, errors: Vec<TableOperationError>) -> Self {
        Self { status, errors }
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &TableOperationError> {
        self.errors.iter().filter(|e| !e.is_resolved())
    }

    /// Mark every error for `item_id` in `table` with `resolution`.
    pub fn resolve(&mut self, table: &str, item_id: &str, resolution: Resolution) {
        for error in self
            .errors
            .iter_mut()
            .filter(|e| e.table_name == table && e.item_id == item_id)
        {
            error.resolution = resolution;
        }
    }
}

/// A push that finished with unresolved errors or was cut short.
#[derive(Debug)]
pub struct PushFailedError {
    /// Status plus the errors still unresolved.
    pub result: PushCompletionResult,
    /// Failures outside per-item processing (handler, store).
    pub inner: Vec<SyncError>,
}

impl fmt::Display for PushFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Push operation has failed with status {} and {} unresolved error(s)",
            self.result.status,
            self.result.errors.len()
        )?;
        if let Some(first) = self.inner.first() {
            write!(f, ": {first}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PushFailedError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed_update() -> TableOperationError {
        let mut op = TableOperation::new(
            OperationKind::Update,
            "todo",
            "1",
            json!({"id": "1", "text": "mine"}).as_object().cloned(),
        );
        op.sequence = 4;
        TableOperationError::new(&op, Some(412), Some(r#"{"id":"1","text":"theirs"}"#.into()))
    }

    #[test]
    fn test_parses_server_item() {
        let error = failed_update();
        assert_eq!(error.server_item().unwrap()["text"], "theirs");
        assert_eq!(error.to_string(), "update of '1' in 'todo' rejected with status 412");
    }

    #[test]
    fn test_non_json_body() {
        let op = TableOperation::new(OperationKind::Delete, "todo", "1", None);
        let error = TableOperationError::new(&op, Some(500), Some("boom".into()));
        assert!(error.result.is_none());
        assert!(error.server_item().is_none());
    }

    #[test]
    fn test_row_round_trip() {
        let mut error = failed_update();
        error.resolution = Resolution::ResolvedByDiscard;
        let restored = TableOperationError::from_row(&error.to_row()).unwrap();
        assert_eq!(restored, error);
    }

    #[test]
    fn test_resolve_marks_matching_errors() {
        let mut result = PushCompletionResult::new(PushStatus::Complete, vec![failed_update()]);
        assert_eq!(result.unresolved().count(), 1);
        result.resolve("todo", "2", Resolution::ResolvedByDiscard);
        assert_eq!(result.unresolved().count(), 1);
        result.resolve("todo", "1", Resolution::ResolvedByDiscard);
        assert_eq!(result.unresolved().count(), 0);
    }

    #[test]
    fn test_push_failed_message() {
        let failed = PushFailedError {
            result: PushCompletionResult::new(PushStatus::CancelledByNetworkError, vec![]),
            inner: vec![],
        };
        assert_eq!(
            failed.to_string(),
            "Push operation has failed with status CancelledByNetworkError and 0 unresolved error(s)"
        );
    }
}
