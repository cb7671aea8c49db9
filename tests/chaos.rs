// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Concurrency and cancellation scenarios.
//!
//! A slow server (paused tokio clock) keeps pushes in flight while local
//! mutations, cancellations and other actions race against them.

mod common;

use std::collections::HashSet;
use std::time::Duration;
use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use common::{context, todo, TABLE};
use offline_sync::{OperationKind, PushStatus, QueryDescription, SyncError};

#[tokio::test]
async fn chaos_concurrent_inserts_get_unique_sequences() {
    let (ctx, _remote) = context().await;

    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let ctx = ctx.clone();
        tasks.spawn(async move { ctx.insert(TABLE, todo(&format!("item{i}"), "x")).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let ops = ctx.queue().snapshot().await;
    assert_eq!(ops.len(), 50);
    let sequences: Vec<u64> = ops.iter().map(|op| op.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    let items: HashSet<_> = ops.iter().map(|op| op.item_id.clone()).collect();
    assert_eq!(items.len(), 50);
}

#[tokio::test]
async fn chaos_concurrent_updates_of_one_item_collapse() {
    let (ctx, _remote) = context().await;
    ctx.insert(TABLE, todo("shared", "v0")).await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 1..=20 {
        let ctx = ctx.clone();
        tasks.spawn(async move { ctx.update(TABLE, todo("shared", &format!("v{i}"))).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap().unwrap();
    }

    let ops = ctx.queue().snapshot().await;
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].kind, OperationKind::Insert);
    let local = ctx.lookup(TABLE, "shared").await.unwrap().unwrap();
    assert_eq!(ops[0].item.as_ref().unwrap()["text"], local["text"]);
}

#[tokio::test(start_paused = true)]
async fn chaos_cancel_mid_push_keeps_remaining_operations() {
    let (ctx, remote) = context().await;
    for i in 0..5 {
        ctx.insert(TABLE, todo(&i.to_string(), "x")).await.unwrap();
    }
    *remote.delay.lock() = Some(Duration::from_millis(50));

    let handle = ctx.spawn_push();
    tokio::time::sleep(Duration::from_millis(75)).await;
    handle.cancel();

    let err = handle.completion().await.unwrap_err();
    assert_eq!(err.push_result().unwrap().status, PushStatus::CancelledByToken);

    let sent = remote.executed().len();
    assert!(sent < 5);
    assert_eq!(ctx.pending_operations().await, 5 - sent);
}

#[tokio::test(start_paused = true)]
async fn chaos_cancel_during_request_records_accepted_operation() {
    let (ctx, remote) = context().await;
    ctx.insert(TABLE, todo("a", "x")).await.unwrap();
    remote.respond(Ok(Some(json!({"id": "a", "text": "x", "version": "AAAB"}))));
    *remote.delay.lock() = Some(Duration::from_millis(50));

    let handle = ctx.spawn_push();
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.cancel();
    let _ = handle.completion().await;

    // The server accepted the insert, so it is written back and dequeued.
    assert_eq!(remote.executed().len(), 1);
    assert_eq!(ctx.pending_operations().await, 0);
    let stored = ctx.lookup(TABLE, "a").await.unwrap().unwrap();
    assert_eq!(stored["version"], json!("AAAB"));

    ctx.push(CancellationToken::new()).await.unwrap();
    assert_eq!(remote.executed().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn chaos_mutation_waits_for_in_flight_item() {
    let (ctx, remote) = context().await;
    for i in 0..5 {
        ctx.insert(TABLE, todo(&i.to_string(), "v1")).await.unwrap();
    }
    *remote.delay.lock() = Some(Duration::from_millis(50));

    let handle = ctx.spawn_push();
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Item "0" is on the wire; this waits for it, then queues a fresh update.
    ctx.update(TABLE, todo("0", "v2")).await.unwrap();

    let result = handle.completion().await.unwrap();
    assert_eq!(result.status, PushStatus::Complete);

    let sent = remote.executed();
    assert_eq!(sent.len(), 6);
    let last = sent.last().unwrap();
    assert_eq!(last.item_id, "0");
    assert_eq!(last.kind, OperationKind::Update);
    assert_eq!(last.item.as_ref().unwrap()["text"], json!("v2"));
    assert_eq!(ctx.pending_operations().await, 0);
}

#[tokio::test(start_paused = true)]
async fn chaos_actions_are_serialized() {
    let (ctx, remote) = context().await;
    for i in 0..3 {
        ctx.insert(TABLE, todo(&i.to_string(), "x")).await.unwrap();
    }
    *remote.delay.lock() = Some(Duration::from_millis(20));
    remote.serve(vec![json!({"id": "remote", "text": "pulled"})]);

    let push = ctx.spawn_push();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let outcome = ctx
        .pull(QueryDescription::new(TABLE), None, CancellationToken::new())
        .await
        .unwrap();

    // The pull only ran once the push had drained the queue.
    assert!(push.is_finished());
    assert_eq!(push.completion().await.unwrap().status, PushStatus::Complete);
    assert_eq!(outcome.upserted, 1);
    assert_eq!(remote.executed().len(), 3);
}

#[tokio::test]
async fn chaos_cancelled_pull_leaves_store_untouched() {
    let (ctx, remote) = context().await;
    remote.serve(vec![json!({"id": "1", "text": "never stored"})]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ctx
        .pull(QueryDescription::new(TABLE), None, cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert!(ctx.lookup(TABLE, "1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn chaos_lock_timeout_is_reported() {
    use offline_sync::{DefaultHandler, MemoryStore, SyncConfig, SyncContext};
    use std::sync::Arc;

    let remote = common::MockRemote::new();
    let config = SyncConfig {
        lock_timeout_ms: Some(100),
        ..Default::default()
    };
    let ctx = SyncContext::initialize(Arc::new(MemoryStore::new()), remote, Arc::new(DefaultHandler), config)
        .await
        .unwrap();
    ctx.define_table(common::todo_table()).await.unwrap();

    let _held = ctx.queue().lock_table(TABLE, &CancellationToken::new()).await.unwrap();
    let err = ctx
        .purge(QueryDescription::new(TABLE), None, false, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::LockTimeout { scope: "table", .. }));
}
