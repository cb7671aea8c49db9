// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Push: drain the operation queue to the server.
//!
//! ```text
//! loop {
//!     peek ─▶ lock item ─▶ load payload ─▶ handler.execute_table_operation
//!       Completed(row)        ─▶ write row back, clear old errors, dequeue
//!                                (not interrupted by cancellation)
//!       InvalidOperation      ─▶ persist TableOperationError, dequeue
//!       Abort / transport err ─▶ stop, operation stays queued
//! }
//! collect unresolved errors ─▶ handler.on_push_complete ─▶ drop resolved
//! ```

use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use crate::conflict::{PushCompletionResult, PushFailedError, PushStatus, TableOperationError};
use crate::error::SyncError;
use crate::handler::ExecutionOutcome;
use crate::metrics;
use crate::operation::{OperationState, TableOperation};
use crate::query::{QueryDescription, QueryNode};
use crate::queue::load_errors;
use crate::remote::RemoteError;
use crate::storage::system::{columns, ERRORS_TABLE};
use crate::storage::traits::row_id;
use super::ActionContext;

enum Step {
    Continue,
    Stop(PushStatus, Option<SyncError>),
}

pub struct PushAction<'a> {
    ctx: ActionContext<'a>,
    cancel: CancellationToken,
    tables: Option<Vec<String>>,
    held_table: Option<String>,
}

impl<'a> PushAction<'a> {
    pub fn new(ctx: ActionContext<'a>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cancel,
            tables: None,
            held_table: None,
        }
    }

    /// Only push operations on `tables`.
    #[must_use]
    pub fn scoped(mut self, tables: Vec<String>) -> Self {
        self.tables = Some(tables);
        self
    }

    /// The caller already holds the lock on `table`; don't take it again.
    #[must_use]
    pub fn holding_table_lock(mut self, table: impl Into<String>) -> Self {
        self.held_table = Some(table.into());
        self
    }

    /// Runs the push to completion.
    ///
    /// Returns the result when the queue drained with no unresolved errors;
    /// anything else is [`SyncError::PushFailed`] carrying the same result.
    #[instrument(name = "push", skip_all, fields(tables = ?self.tables))]
    pub async fn execute(self) -> Result<PushCompletionResult, SyncError> {
        let start = Instant::now();
        let mut status = PushStatus::Complete;
        let mut other_errors = Vec::new();
        let mut pushed = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                status = PushStatus::CancelledByToken;
                break;
            }
            let next = match &self.tables {
                Some(tables) => self.ctx.queue.peek_in(tables).await,
                None => self.ctx.queue.peek().await,
            };
            let Some(op) = next else { break };

            match self.push_one(op).await {
                Ok(Step::Continue) => pushed += 1,
                Ok(Step::Stop(stop, error)) => {
                    status = stop;
                    other_errors.extend(error);
                    break;
                }
                Err(SyncError::Cancelled) => {
                    status = PushStatus::CancelledByToken;
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Local store failed during push");
                    status = PushStatus::CancelledBySyncStoreError;
                    other_errors.push(e);
                    break;
                }
            }
        }

        let result = self.finish(status, &mut other_errors).await;
        self.ctx.queue.prune_locks();
        metrics::record_push(status.as_str(), start.elapsed());
        info!(%status, pushed, errors = result.errors.len(), "Push finished");

        if status == PushStatus::Complete && result.errors.is_empty() && other_errors.is_empty() {
            Ok(result)
        } else {
            for e in &other_errors {
                metrics::record_error("push", e.kind());
            }
            Err(PushFailedError {
                result,
                inner: other_errors,
            }
            .into())
        }
    }

    async fn push_one(&self, peeked: TableOperation) -> Result<Step, SyncError> {
        let queue = self.ctx.queue;
        let _item = queue.lock_item(&peeked.table_name, &peeked.item_id, &self.cancel).await?;

        // A local mutation may have collapsed the operation while we waited.
        let mut op = match queue.find(&peeked.table_name, &peeked.item_id).await {
            Some(current) if current.sequence == peeked.sequence => current,
            _ => return Ok(Step::Continue),
        };

        if op.item.is_none() {
            match self.ctx.store.lookup(&op.table_name, &op.item_id).await? {
                Some(row) => op.item = Some(row),
                None => {
                    debug!(table = %op.table_name, item = %op.item_id, "Item gone from local store; dropping operation");
                    queue.dequeue().await?;
                    return Ok(Step::Continue);
                }
            }
        }

        op.state = OperationState::Attempted;
        queue.update_state(&op).await?;

        let outcome = self
            .ctx
            .handler
            .execute_table_operation(&op, self.ctx.remote)
            .await;

        match outcome {
            Ok(ExecutionOutcome::Completed(result)) => {
                self.write_back(&op, result).await?;
                self.clear_errors(&op).await?;
                queue.dequeue().await?;
                metrics::record_operation_pushed(&op.table_name, op.kind.as_str());
                debug!(table = %op.table_name, item = %op.item_id, sequence = op.sequence, kind = %op.kind, "Operation pushed");
                Ok(Step::Continue)
            }
            Ok(ExecutionOutcome::Abort) => {
                info!(table = %op.table_name, item = %op.item_id, "Push aborted by handler");
                Ok(Step::Stop(PushStatus::CancelledByOperation, None))
            }
            Err(RemoteError::InvalidOperation { status, body }) => {
                let error = TableOperationError::new(&op, Some(status), body);
                self.ctx
                    .store
                    .upsert(ERRORS_TABLE, &[error.to_row()], false)
                    .await?;
                metrics::record_operation_failed(&op.table_name, op.kind.as_str(), Some(status));
                warn!(table = %op.table_name, item = %op.item_id, status, "Server rejected operation");
                self.ctx.handler.on_operation_error(&error).await;
                queue.dequeue().await?;
                Ok(Step::Continue)
            }
            Err(e @ RemoteError::Network(_)) => {
                Ok(Step::Stop(PushStatus::CancelledByNetworkError, Some(e.into())))
            }
            Err(e @ RemoteError::Authentication(_)) => {
                Ok(Step::Stop(PushStatus::CancelledByAuthenticationError, Some(e.into())))
            }
            Err(RemoteError::Cancelled) => Ok(Step::Stop(PushStatus::CancelledByToken, None)),
        }
    }

    async fn write_back(&self, op: &TableOperation, result: Option<Value>) -> Result<(), SyncError> {
        if !op.kind.writes_result_to_store() {
            return Ok(());
        }
        let Some(Value::Object(row)) = result else {
            return Ok(());
        };
        if row_id(&row).is_none() {
            debug!(table = %op.table_name, item = %op.item_id, "Server result has no id; not written back");
            return Ok(());
        }
        // The server already applied the operation; finish recording it even
        // if the push was cancelled meanwhile.
        let _table = match &self.held_table {
            Some(held) if *held == op.table_name => None,
            _ => Some(self.ctx.queue.lock_table(&op.table_name, &CancellationToken::new()).await?),
        };
        self.ctx.store.upsert(&op.table_name, &[row], true).await?;
        Ok(())
    }

    /// Earlier failures of this item are superseded by a successful push.
    async fn clear_errors(&self, op: &TableOperation) -> Result<(), SyncError> {
        let filter = QueryNode::member(columns::TABLE_NAME)
            .equals(QueryNode::constant(op.table_name.as_str()))
            .and(QueryNode::member(columns::ITEM_ID).equals(QueryNode::constant(op.item_id.as_str())));
        self.ctx
            .store
            .delete(&QueryDescription::new(ERRORS_TABLE).with_filter(filter))
            .await?;
        Ok(())
    }

    async fn finish(&self, status: PushStatus, other_errors: &mut Vec<SyncError>) -> PushCompletionResult {
        let errors = match load_errors(self.ctx.store).await {
            Ok(errors) => errors
                .into_iter()
                .filter(|e| !e.is_resolved())
                .filter(|e| {
                    self.tables
                        .as_ref()
                        .map_or(true, |tables| tables.contains(&e.table_name))
                })
                .collect(),
            Err(e) => {
                other_errors.push(e);
                Vec::new()
            }
        };

        let mut result = PushCompletionResult::new(status, errors);
        if let Err(e) = self.ctx.handler.on_push_complete(&mut result).await {
            warn!(error = %e, "Push completion handler failed");
            other_errors.push(e);
        }

        if status == PushStatus::Complete {
            let resolved: Vec<String> = result
                .errors
                .iter()
                .filter(|e| e.is_resolved())
                .map(|e| e.id.clone())
                .collect();
            if !resolved.is_empty() {
                match self.ctx.store.delete_ids(ERRORS_TABLE, &resolved).await {
                    Ok(n) => debug!(removed = n, "Removed resolved sync errors"),
                    Err(e) => other_errors.push(e.into()),
                }
            }
        }
        result.errors.retain(|e| !e.is_resolved());
        result
    }
}
