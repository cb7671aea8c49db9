// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Application-facing operations of the sync context:
//! - local mutations: `insert()`, `update()`, `delete()`
//! - local reads: `lookup()`, `read()`, `query()`
//! - sync actions: `push()`, `push_tables()`, `spawn_push()`, `pull()`, `purge()`
//! - conflict resolution: `sync_errors()`, `resolve_*()`

use serde_json::Value;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use crate::actions::pull::PullOutcome;
use crate::actions::{PullAction, PurgeAction, PushAction};
use crate::conflict::{PushCompletionResult, TableOperationError};
use crate::error::SyncError;
use crate::operation::{OperationKind, TableOperation};
use crate::query::QueryDescription;
use crate::queue::load_errors;
use crate::remote::Parameters;
use crate::storage::system::{is_system_table, ERRORS_TABLE};
use crate::storage::traits::{row_id, QueryResult, Row};
use super::{PushHandle, SyncContext};

impl SyncContext {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Local mutations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Inserts a new row locally and queues it for push.
    ///
    /// A missing `id` is filled with a fresh UUID. Fails with
    /// [`SyncError::InvalidState`] if the row already exists locally.
    pub async fn insert(&self, table: &str, mut item: Row) -> Result<Row, SyncError> {
        check_table(table)?;
        if row_id(&item).is_none() {
            item.insert(crate::system_columns::ID.into(), Value::String(Uuid::new_v4().to_string()));
        }
        let op = TableOperation::insert(table, item.clone())?;
        let store = self.inner.store.as_ref();
        let row = item.clone();
        self.execute_local(op, || async move {
            let id = row_id(&row).unwrap_or_default();
            if store.lookup(table, id).await?.is_some() {
                return Err(SyncError::InvalidState(format!(
                    "Item '{id}' already exists in '{table}'."
                )));
            }
            store.upsert(table, &[row], false).await?;
            Ok(())
        })
        .await?;
        Ok(item)
    }

    /// Writes `item` locally and queues an update.
    pub async fn update(&self, table: &str, item: Row) -> Result<(), SyncError> {
        check_table(table)?;
        let op = TableOperation::update(table, item.clone())?;
        let store = self.inner.store.as_ref();
        self.execute_local(op, || async move {
            store.upsert(table, &[item], false).await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Removes the row with `id` locally and queues a delete.
    ///
    /// The last local state of the row travels with the operation.
    pub async fn delete(&self, table: &str, id: &str) -> Result<(), SyncError> {
        check_table(table)?;
        let store = self.inner.store.as_ref();
        let item = match store.lookup(table, id).await? {
            Some(row) => row,
            None => {
                let mut row = Row::new();
                row.insert(crate::system_columns::ID.into(), Value::String(id.to_string()));
                row
            }
        };
        let op = TableOperation::delete(table, item)?;
        let ids = [id.to_string()];
        self.execute_local(op, || async move {
            store.delete_ids(table, &ids).await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn execute_local<F, Fut>(&self, op: TableOperation, local_write: F) -> Result<Option<TableOperation>, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let queue = &self.inner.queue;
        let _item = queue.lock_item(&op.table_name, &op.item_id, &CancellationToken::new()).await?;
        queue.enqueue_after(op, local_write).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Local reads
    // ═══════════════════════════════════════════════════════════════════════════

    pub async fn lookup(&self, table: &str, id: &str) -> Result<Option<Row>, SyncError> {
        Ok(self.inner.store.lookup(table, id).await?)
    }

    pub async fn read(&self, query: &QueryDescription) -> Result<QueryResult, SyncError> {
        Ok(self.inner.store.read(query).await?)
    }

    /// Parses an OData query string (`$filter=…&$orderby=…`) and runs it locally.
    pub async fn query(&self, table: &str, odata: &str) -> Result<QueryResult, SyncError> {
        let query = QueryDescription::parse(table, odata)?;
        self.read(&query).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Sync actions
    // ═══════════════════════════════════════════════════════════════════════════

    /// Pushes every pending operation.
    pub async fn push(&self, cancel: CancellationToken) -> Result<PushCompletionResult, SyncError> {
        let _action = self.inner.action_lock.lock().await;
        PushAction::new(self.actions(), cancel).execute().await
    }

    /// Pushes only operations on `tables`.
    pub async fn push_tables(&self, tables: &[&str], cancel: CancellationToken) -> Result<PushCompletionResult, SyncError> {
        let _action = self.inner.action_lock.lock().await;
        PushAction::new(self.actions(), cancel)
            .scoped(tables.iter().map(|t| t.to_string()).collect())
            .execute()
            .await
    }

    /// Starts a push on the runtime and returns a handle to await or cancel it.
    pub fn spawn_push(&self) -> PushHandle {
        let cancel = CancellationToken::new();
        let ctx = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { ctx.push(token).await });
        PushHandle { task, cancel }
    }

    /// Pulls `query` from the server into the local table it names.
    ///
    /// Pending operations on that table are pushed first; if that push does
    /// not complete cleanly the pull fails with its error. With `query_key`
    /// the pull is incremental.
    pub async fn pull(
        &self,
        query: QueryDescription,
        query_key: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<PullOutcome, SyncError> {
        self.pull_with_parameters(query, query_key, Parameters::new(), cancel).await
    }

    pub async fn pull_with_parameters(
        &self,
        query: QueryDescription,
        query_key: Option<&str>,
        parameters: Parameters,
        cancel: CancellationToken,
    ) -> Result<PullOutcome, SyncError> {
        check_table(&query.table_name)?;
        let _action = self.inner.action_lock.lock().await;
        PullAction::new(self.actions(), query, query_key.map(String::from), cancel)
            .with_parameters(parameters)
            .apply_tombstones(self.inner.config.pull_apply_tombstones)
            .page_size(self.inner.config.pull_page_size)
            .execute()
            .await
    }

    /// Deletes local rows matching `query` and resets the delta token of
    /// `query_key`. Returns the number of rows removed.
    pub async fn purge(
        &self,
        query: QueryDescription,
        query_key: Option<&str>,
        force: bool,
        cancel: CancellationToken,
    ) -> Result<u64, SyncError> {
        check_table(&query.table_name)?;
        let _action = self.inner.action_lock.lock().await;
        PurgeAction::new(self.actions(), query, query_key.map(String::from), force, cancel)
            .execute()
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Conflict resolution
    // ═══════════════════════════════════════════════════════════════════════════

    /// Unresolved sync errors, oldest operation first.
    pub async fn sync_errors(&self) -> Result<Vec<TableOperationError>, SyncError> {
        Ok(load_errors(self.inner.store.as_ref())
            .await?
            .into_iter()
            .filter(|e| !e.is_resolved())
            .collect())
    }

    /// Keeps the local value: writes `item` locally and queues it again as an
    /// update (or a delete, if the rejected operation was a delete).
    pub async fn resolve_with_client_value(&self, error: &TableOperationError, item: Row) -> Result<(), SyncError> {
        self.resolve(error, |ctx| async move {
            let table = error.table_name.as_str();
            let store = ctx.inner.store.as_ref();
            let op = match error.operation_kind {
                OperationKind::Delete => TableOperation::delete(table, item)?,
                OperationKind::Insert | OperationKind::Update => TableOperation::update(table, item)?,
            };
            if op.item_id != error.item_id {
                return Err(SyncError::InvalidArgument(format!(
                    "item id '{}' does not match the sync error's item '{}'",
                    op.item_id, error.item_id
                )));
            }
            let kind = op.kind;
            let row = op.item.clone().unwrap_or_default();
            let ids = [op.item_id.clone()];
            ctx.inner
                .queue
                .enqueue_after(op, || async move {
                    match kind {
                        OperationKind::Delete => {
                            store.delete_ids(table, &ids).await?;
                        }
                        _ => store.upsert(table, &[row], false).await?,
                    }
                    Ok(())
                })
                .await?;
            Ok(())
        })
        .await
    }

    /// Accepts the server's value. `item` defaults to the row carried in the
    /// error's response body.
    pub async fn resolve_with_server_value(&self, error: &TableOperationError, item: Option<Row>) -> Result<(), SyncError> {
        let item = item
            .or_else(|| error.server_item().cloned())
            .ok_or_else(|| SyncError::InvalidArgument("sync error carries no server item".into()))?;
        self.resolve(error, |ctx| async move {
            ctx.cancel_operation(error).await?;
            ctx.inner.store.upsert(&error.table_name, &[item], true).await?;
            Ok(())
        })
        .await
    }

    /// Drops the local change and the local row.
    pub async fn resolve_by_discard(&self, error: &TableOperationError) -> Result<(), SyncError> {
        self.resolve(error, |ctx| async move {
            ctx.cancel_operation(error).await?;
            ctx.inner
                .store
                .delete_ids(&error.table_name, &[error.item_id.clone()])
                .await?;
            Ok(())
        })
        .await
    }

    async fn resolve<'a, F, Fut>(&'a self, error: &'a TableOperationError, action: F) -> Result<(), SyncError>
    where
        F: FnOnce(&'a SyncContext) -> Fut,
        Fut: Future<Output = Result<(), SyncError>> + 'a,
    {
        let _action = self.inner.action_lock.lock().await;
        let _item = self
            .inner
            .queue
            .lock_item(&error.table_name, &error.item_id, &CancellationToken::new())
            .await?;
        action(self).await?;
        self.inner
            .store
            .delete_ids(ERRORS_TABLE, &[error.id.clone()])
            .await?;
        info!(table = %error.table_name, item = %error.item_id, "Sync error resolved");
        Ok(())
    }

    /// Drops whatever operation is still queued for the error's item.
    async fn cancel_operation(&self, error: &TableOperationError) -> Result<(), SyncError> {
        if let Some(op) = self.inner.queue.find(&error.table_name, &error.item_id).await {
            self.inner.queue.delete(&op.id).await?;
            debug!(table = %error.table_name, item = %error.item_id, "Queued operation cancelled");
        }
        Ok(())
    }
}

fn check_table(table: &str) -> Result<(), SyncError> {
    if is_system_table(table) {
        return Err(SyncError::InvalidArgument(format!(
            "'{table}' is reserved for the sync engine"
        )));
    }
    Ok(())
}
