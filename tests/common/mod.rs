// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared fixtures: a scripted in-process server and context builders.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use offline_sync::query::evaluator::{compare_values, evaluate, matches};
use offline_sync::query::SortDirection;
use offline_sync::{
    ColumnType, DefaultHandler, MemoryStore, OperationKind, Parameters, QueryDescription,
    RemoteError, RemoteTable, Row, SyncConfig, SyncContext, SyncHandler, TableDefinition,
    TableOperation,
};

pub const TABLE: &str = "todo";

pub fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object literal")
}

/// Server stand-in.
///
/// `execute` replays scripted responses first, then echoes the pushed item
/// back. `read` filters, orders and pages `rows` like a table endpoint;
/// `page_cap` shortens every page the way servers cap `$top`.
#[derive(Default)]
pub struct MockRemote {
    pub responses: Mutex<VecDeque<Result<Option<Value>, RemoteError>>>,
    pub executed: Mutex<Vec<TableOperation>>,
    pub rows: Mutex<Vec<Value>>,
    pub read_error: Mutex<Option<RemoteError>>,
    pub queries: Mutex<Vec<QueryDescription>>,
    pub delay: Mutex<Option<Duration>>,
    pub page_cap: Mutex<Option<usize>>,
    /// 1-based index of a read that fails with a network error.
    pub fail_read: Mutex<Option<usize>>,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, response: Result<Option<Value>, RemoteError>) {
        self.responses.lock().push_back(response);
    }

    pub fn serve(&self, rows: Vec<Value>) {
        *self.rows.lock() = rows;
    }

    pub fn executed(&self) -> Vec<TableOperation> {
        self.executed.lock().clone()
    }

    pub fn executed_ids(&self) -> Vec<String> {
        self.executed.lock().iter().map(|op| op.item_id.clone()).collect()
    }

    pub fn last_query(&self) -> Option<QueryDescription> {
        self.queries.lock().last().cloned()
    }
}

#[async_trait]
impl RemoteTable for MockRemote {
    async fn execute(&self, operation: &TableOperation) -> Result<Option<Value>, RemoteError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.executed.lock().push(operation.clone());
        if let Some(response) = self.responses.lock().pop_front() {
            return response;
        }
        Ok(match operation.kind {
            OperationKind::Delete => None,
            _ => operation.item.clone().map(Value::Object),
        })
    }

    async fn read(&self, query: &QueryDescription, _parameters: &Parameters) -> Result<Vec<Value>, RemoteError> {
        let reads = {
            let mut queries = self.queries.lock();
            queries.push(query.clone());
            queries.len()
        };
        if let Some(e) = self.read_error.lock().clone() {
            return Err(e);
        }
        if *self.fail_read.lock() == Some(reads) {
            return Err(RemoteError::Network("connection reset".into()));
        }

        let mut rows: Vec<Value> = self
            .rows
            .lock()
            .iter()
            .filter(|value| match (&query.filter, value.as_object()) {
                (Some(filter), Some(row)) => matches(filter, row).unwrap_or(false),
                _ => true,
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let (Some(a), Some(b)) = (a.as_object(), b.as_object()) else {
                return Ordering::Equal;
            };
            for order in &query.ordering {
                let x = evaluate(&order.expression, a).unwrap_or(Value::Null);
                let y = evaluate(&order.expression, b).unwrap_or(Value::Null);
                let ord = match order.direction {
                    SortDirection::Ascending => compare_values(&x, &y),
                    SortDirection::Descending => compare_values(&y, &x),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        let skip = query.skip.unwrap_or(0) as usize;
        let mut take = query.take.map_or(usize::MAX, |t| t as usize);
        if let Some(cap) = *self.page_cap.lock() {
            take = take.min(cap);
        }
        Ok(rows.into_iter().skip(skip).take(take).collect())
    }
}

pub fn todo_table() -> TableDefinition {
    TableDefinition::new(TABLE)
        .column("text", ColumnType::Text)
        .column("complete", ColumnType::Boolean)
        .column("priority", ColumnType::Integer)
        .with_system_columns()
}

pub async fn context_with(remote: Arc<MockRemote>, handler: Arc<dyn SyncHandler>) -> SyncContext {
    let ctx = SyncContext::initialize(
        Arc::new(MemoryStore::new()),
        remote,
        handler,
        SyncConfig::default(),
    )
    .await
    .expect("initialize");
    ctx.define_table(todo_table()).await.expect("define table");
    ctx
}

pub async fn context() -> (SyncContext, Arc<MockRemote>) {
    let remote = MockRemote::new();
    let ctx = context_with(remote.clone(), Arc::new(DefaultHandler)).await;
    (ctx, remote)
}

pub fn todo(id: &str, text: &str) -> Row {
    row(json!({"id": id, "text": text}))
}
