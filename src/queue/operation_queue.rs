// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::conflict::TableOperationError;
use crate::error::SyncError;
use crate::metrics;
use crate::operation::{Collapse, TableOperation};
use crate::query::{QueryDescription, QueryNode};
use crate::storage::system::{columns, ERRORS_TABLE, OPERATIONS_TABLE};
use crate::storage::traits::LocalStore;
use super::locks::{LockGuard, LockMap};

#[derive(Default)]
struct QueueState {
    operations: BTreeMap<u64, TableOperation>,
    by_item: HashMap<(String, String), u64>,
    next_sequence: u64,
    last_peeked: Option<u64>,
}

impl QueueState {
    fn insert(&mut self, op: TableOperation) {
        self.by_item
            .insert((op.table_name.clone(), op.item_id.clone()), op.sequence);
        self.operations.insert(op.sequence, op);
    }

    fn remove(&mut self, sequence: u64) -> Option<TableOperation> {
        let op = self.operations.remove(&sequence)?;
        self.by_item.remove(&(op.table_name.clone(), op.item_id.clone()));
        if self.last_peeked == Some(sequence) {
            self.last_peeked = None;
        }
        Some(op)
    }

    fn find(&self, table: &str, item_id: &str) -> Option<&TableOperation> {
        self.by_item
            .get(&(table.to_string(), item_id.to_string()))
            .and_then(|seq| self.operations.get(seq))
    }
}

/// Queue change computed before anything is written.
enum Planned {
    Enqueued(TableOperation),
    Merged(TableOperation),
    Cancelled(TableOperation),
}

impl Planned {
    fn op(&self) -> &TableOperation {
        match self {
            Planned::Enqueued(op) | Planned::Merged(op) | Planned::Cancelled(op) => op,
        }
    }
}

/// Durable, ordered log of pending mutations.
///
/// State is mirrored in memory and written through to `__operations` on
/// every change. Operations come out in ascending sequence order.
///
/// The queue also owns the advisory locks push, pull and local mutations
/// coordinate on:
///
/// - table lock: pull and purge hold it for their whole run; push holds it
///   while writing a server result back. Mutations refuse to run while it
///   is held.
/// - item lock: keyed by table and item id. Push holds it while an
///   operation is in flight; mutations of the same row wait for it.
pub struct OperationQueue {
    store: Arc<dyn LocalStore>,
    state: Mutex<QueueState>,
    table_locks: LockMap,
    item_locks: LockMap,
    lock_timeout: Option<Duration>,
}

impl OperationQueue {
    /// Rebuilds the queue from `__operations`.
    ///
    /// Two rows with the same sequence, or two live operations for the same
    /// item, mean the store was corrupted and fail with
    /// [`SyncError::StoreCorruption`].
    pub async fn load(store: Arc<dyn LocalStore>) -> Result<Self, SyncError> {
        let query = QueryDescription::new(OPERATIONS_TABLE).order_by(columns::SEQUENCE);
        let rows = store.read(&query).await?.rows;

        let mut state = QueueState::default();
        for row in &rows {
            let op = TableOperation::from_row(row)?;
            if state.operations.contains_key(&op.sequence) {
                return Err(SyncError::StoreCorruption(format!(
                    "duplicate operation sequence {}",
                    op.sequence
                )));
            }
            if state.find(&op.table_name, &op.item_id).is_some() {
                return Err(SyncError::StoreCorruption(format!(
                    "more than one operation for item '{}' in '{}'",
                    op.item_id, op.table_name
                )));
            }
            state.next_sequence = state.next_sequence.max(op.sequence);
            state.insert(op);
        }

        info!(pending = state.operations.len(), "Operation queue loaded");
        metrics::set_queue_depth(state.operations.len());
        Ok(Self {
            store,
            state: Mutex::new(state),
            table_locks: LockMap::new("table"),
            item_locks: LockMap::new("item"),
            lock_timeout: None,
        })
    }

    /// Bound every lock wait by `timeout`.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Adds `op`, collapsing it into any live operation for the same item.
    ///
    /// Returns the live operation for the item afterwards, or `None` when the
    /// two cancelled out.
    pub async fn enqueue(&self, op: TableOperation) -> Result<Option<TableOperation>, SyncError> {
        self.enqueue_after(op, || async { Ok(()) }).await
    }

    /// Like [`enqueue`](Self::enqueue), but runs `local_write` once the
    /// mutation is known to be legal. The queue row is persisted first and
    /// restored if the write fails, so a local change never exists without
    /// its operation.
    pub async fn enqueue_after<F, Fut>(
        &self,
        mut op: TableOperation,
        local_write: F,
    ) -> Result<Option<TableOperation>, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), SyncError>>,
    {
        let _table = self.table_locks.try_acquire(&op.table_name).ok_or_else(|| {
            SyncError::InvalidState(format!(
                "Table '{}' is busy with a push or pull; retry the change afterwards.",
                op.table_name
            ))
        })?;

        let mut state = self.state.lock().await;
        let previous = state.find(&op.table_name, &op.item_id).cloned();
        let planned = match previous.clone() {
            Some(mut existing) => match existing.collapse(op)? {
                Collapse::Cancelled => Planned::Cancelled(existing),
                Collapse::Merged => Planned::Merged(existing),
            },
            None => {
                op.sequence = state.next_sequence + 1;
                Planned::Enqueued(op)
            }
        };

        match &planned {
            Planned::Cancelled(op) => {
                self.store.delete_ids(OPERATIONS_TABLE, &[op.id.clone()]).await?;
            }
            Planned::Merged(op) | Planned::Enqueued(op) => {
                self.store.upsert(OPERATIONS_TABLE, &[op.to_row()], false).await?;
            }
        }

        if let Err(e) = local_write().await {
            self.restore(previous.as_ref(), &planned).await;
            return Err(e);
        }
        metrics::record_enqueue(planned.op().table_name.as_str(), planned.op().kind.as_str());

        let live = match planned {
            Planned::Cancelled(op) => {
                state.remove(op.sequence);
                debug!(table = %op.table_name, item = %op.item_id, "Operations cancelled out");
                None
            }
            Planned::Merged(op) => {
                debug!(table = %op.table_name, item = %op.item_id, sequence = op.sequence, kind = %op.kind, "Operation collapsed");
                state.insert(op.clone());
                Some(op)
            }
            Planned::Enqueued(op) => {
                state.next_sequence = op.sequence;
                debug!(table = %op.table_name, item = %op.item_id, sequence = op.sequence, kind = %op.kind, "Operation enqueued");
                state.insert(op.clone());
                Some(op)
            }
        };
        metrics::set_queue_depth(state.operations.len());
        drop(state);

        if let Some(previous) = &previous {
            self.delete_errors_for(&previous.id).await?;
        }
        Ok(live)
    }

    /// Puts `__operations` back the way it was before `planned` was persisted.
    async fn restore(&self, previous: Option<&TableOperation>, planned: &Planned) {
        let restored = match previous {
            Some(previous) => self.store.upsert(OPERATIONS_TABLE, &[previous.to_row()], false).await,
            None => self
                .store
                .delete_ids(OPERATIONS_TABLE, &[planned.op().id.clone()])
                .await
                .map(|_| ()),
        };
        if let Err(e) = restored {
            warn!(table = %planned.op().table_name, item = %planned.op().item_id, error = %e, "Could not restore queue row after failed local write");
        }
    }

    /// Lowest-sequence live operation.
    pub async fn peek(&self) -> Option<TableOperation> {
        let mut state = self.state.lock().await;
        let op = state.operations.values().next().cloned();
        state.last_peeked = op.as_ref().map(|op| op.sequence);
        op
    }

    /// Lowest-sequence live operation on one of `tables`.
    pub async fn peek_in(&self, tables: &[String]) -> Option<TableOperation> {
        let mut state = self.state.lock().await;
        let op = state
            .operations
            .values()
            .find(|op| tables.contains(&op.table_name))
            .cloned();
        state.last_peeked = op.as_ref().map(|op| op.sequence);
        op
    }

    /// Removes the operation last returned by a peek. Call only once its
    /// outcome has been recorded.
    pub async fn dequeue(&self) -> Result<Option<TableOperation>, SyncError> {
        let mut state = self.state.lock().await;
        let Some(sequence) = state.last_peeked else {
            return Ok(None);
        };
        let Some(op) = state.operations.get(&sequence) else {
            state.last_peeked = None;
            return Ok(None);
        };
        self.store.delete_ids(OPERATIONS_TABLE, &[op.id.clone()]).await?;
        let op = state.remove(sequence);
        metrics::set_queue_depth(state.operations.len());
        Ok(op)
    }

    /// Persists a changed state (e.g. `Attempted`) of a live operation.
    pub async fn update_state(&self, op: &TableOperation) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        let Some(live) = state.operations.get_mut(&op.sequence) else {
            return Ok(());
        };
        if live.id != op.id {
            return Ok(());
        }
        live.state = op.state;
        let row = live.to_row();
        self.store.upsert(OPERATIONS_TABLE, &[row], false).await?;
        Ok(())
    }

    /// Removes the operation with `id`, wherever it is in the queue.
    pub async fn delete(&self, id: &str) -> Result<bool, SyncError> {
        let mut state = self.state.lock().await;
        let Some(sequence) = state
            .operations
            .values()
            .find(|op| op.id == id)
            .map(|op| op.sequence)
        else {
            return Ok(false);
        };
        self.store.delete_ids(OPERATIONS_TABLE, &[id.to_string()]).await?;
        state.remove(sequence);
        metrics::set_queue_depth(state.operations.len());
        Ok(true)
    }

    /// Removes every operation on `table`. Returns how many were removed.
    pub async fn delete_table(&self, table: &str) -> Result<usize, SyncError> {
        let mut state = self.state.lock().await;
        let doomed: Vec<(u64, String)> = state
            .operations
            .values()
            .filter(|op| op.table_name == table)
            .map(|op| (op.sequence, op.id.clone()))
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = doomed.iter().map(|(_, id)| id.clone()).collect();
        self.store.delete_ids(OPERATIONS_TABLE, &ids).await?;
        for (sequence, _) in &doomed {
            state.remove(*sequence);
        }
        warn!(table, removed = doomed.len(), "Discarded pending operations");
        metrics::set_queue_depth(state.operations.len());
        Ok(doomed.len())
    }

    pub async fn find(&self, table: &str, item_id: &str) -> Option<TableOperation> {
        self.state.lock().await.find(table, item_id).cloned()
    }

    pub async fn count_pending(&self, table: &str) -> usize {
        self.state
            .lock()
            .await
            .operations
            .values()
            .filter(|op| op.table_name == table)
            .count()
    }

    pub async fn pending_operations(&self) -> usize {
        self.state.lock().await.operations.len()
    }

    /// Snapshot of every live operation in sequence order.
    pub async fn snapshot(&self) -> Vec<TableOperation> {
        self.state.lock().await.operations.values().cloned().collect()
    }

    pub async fn lock_table(&self, table: &str, cancel: &CancellationToken) -> Result<LockGuard, SyncError> {
        self.table_locks.acquire(table, cancel, self.lock_timeout).await
    }

    pub async fn lock_item(&self, table: &str, item_id: &str, cancel: &CancellationToken) -> Result<LockGuard, SyncError> {
        let key = format!("{table}/{item_id}");
        self.item_locks.acquire(&key, cancel, self.lock_timeout).await
    }

    pub fn is_table_locked(&self, table: &str) -> bool {
        self.table_locks.is_locked(table)
    }

    /// Drops idle item locks.
    pub fn prune_locks(&self) {
        self.item_locks.prune();
    }

    async fn delete_errors_for(&self, operation_id: &str) -> Result<(), SyncError> {
        let filter = QueryNode::member(columns::OPERATION_ID).equals(QueryNode::constant(operation_id));
        let query = QueryDescription::new(ERRORS_TABLE).with_filter(filter);
        let removed = self.store.delete(&query).await?;
        if removed > 0 {
            debug!(operation_id, removed, "Cleared sync errors of collapsed operation");
        }
        Ok(())
    }
}

/// Loads every sync error row, in operation order.
pub(crate) async fn load_errors(store: &dyn LocalStore) -> Result<Vec<TableOperationError>, SyncError> {
    let query = QueryDescription::new(ERRORS_TABLE).order_by(columns::OPERATION_SEQUENCE);
    store
        .read(&query)
        .await?
        .rows
        .iter()
        .map(TableOperationError::from_row)
        .collect()
}
