// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::Value;
use crate::conflict::{PushCompletionResult, TableOperationError};
use crate::error::SyncError;
use crate::operation::TableOperation;
use crate::remote::{RemoteError, RemoteTable};

/// What happened when an operation was handed to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Accepted. Carries the server's copy of the row, if it sent one.
    Completed(Option<Value>),
    /// Stop the push now and leave this operation queued.
    Abort,
}

/// Hooks into push execution.
///
/// Every method has a default, so a handler only overrides what it needs:
///
/// ```
/// use async_trait::async_trait;
/// use offline_sync::{PushCompletionResult, Resolution, SyncError, SyncHandler};
///
/// /// Accept whatever the server says for every conflict.
/// struct ServerWins;
///
/// #[async_trait]
/// impl SyncHandler for ServerWins {
///     async fn on_push_complete(&self, result: &mut PushCompletionResult) -> Result<(), SyncError> {
///         for error in &mut result.errors {
///             error.resolution = Resolution::ResolvedByDiscard;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn execute_table_operation(
        &self,
        operation: &TableOperation,
        remote: &dyn RemoteTable,
    ) -> Result<ExecutionOutcome, RemoteError> {
        remote.execute(operation).await.map(ExecutionOutcome::Completed)
    }

    /// Called once per rejected operation, after its error is persisted.
    async fn on_operation_error(&self, _error: &TableOperationError) {}

    /// Called once at the end of every push. Errors marked resolved here are
    /// removed from the local store when the push completed normally.
    async fn on_push_complete(&self, _result: &mut PushCompletionResult) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Sends operations as-is and leaves conflicts unresolved.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

#[async_trait]
impl SyncHandler for DefaultHandler {}
