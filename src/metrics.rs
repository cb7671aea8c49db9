// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for offline-sync.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host
//! application chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `offline_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `table`: synced table name
//! - `kind`: insert, update, delete
//! - `status`: push completion status
//! - `backend`: sqlite, memory

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a mutation entering the queue
pub fn record_enqueue(table: &str, kind: &str) {
    counter!(
        "offline_sync_operations_enqueued_total",
        "table" => table.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an operation the server accepted
pub fn record_operation_pushed(table: &str, kind: &str) {
    counter!(
        "offline_sync_operations_pushed_total",
        "table" => table.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an operation the server rejected (becomes a sync error)
pub fn record_operation_failed(table: &str, kind: &str, http_status: Option<u16>) {
    counter!(
        "offline_sync_operations_failed_total",
        "table" => table.to_string(),
        "kind" => kind.to_string(),
        "http_status" => http_status.map_or_else(|| "none".to_string(), |s| s.to_string())
    )
    .increment(1);
}

/// Set current number of live queued operations
pub fn set_queue_depth(count: usize) {
    gauge!("offline_sync_queue_depth").set(count as f64);
}

/// Record a finished push
pub fn record_push(status: &str, duration: Duration) {
    counter!(
        "offline_sync_pushes_total",
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("offline_sync_push_seconds").record(duration.as_secs_f64());
}

/// Record a finished pull
pub fn record_pull(table: &str, rows: usize, deleted: usize, duration: Duration) {
    counter!(
        "offline_sync_pull_rows_total",
        "table" => table.to_string()
    )
    .increment(rows as u64);
    counter!(
        "offline_sync_pull_tombstones_total",
        "table" => table.to_string()
    )
    .increment(deleted as u64);
    histogram!(
        "offline_sync_pull_seconds",
        "table" => table.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a local-store call
pub fn record_store_latency(backend: &str, operation: &str, duration: Duration) {
    histogram!(
        "offline_sync_store_seconds",
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record time spent waiting for a table or item lock
pub fn record_lock_wait(scope: &str, duration: Duration) {
    histogram!(
        "offline_sync_lock_wait_seconds",
        "scope" => scope.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a failed action, categorized for alerting
pub fn record_error(action: &str, error_type: &str) {
    counter!(
        "offline_sync_errors_total",
        "action" => action.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// A timing guard that records store latency on drop
pub struct LatencyTimer {
    backend: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(backend: &'static str, operation: &'static str) -> Self {
        Self {
            backend,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_store_latency(self.backend, self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed; these verify the calls don't panic.

    #[test]
    fn test_queue_metrics() {
        record_enqueue("todo", "insert");
        record_operation_pushed("todo", "insert");
        record_operation_failed("todo", "update", Some(412));
        record_operation_failed("todo", "delete", None);
        set_queue_depth(3);
    }

    #[test]
    fn test_action_metrics() {
        record_push("Complete", Duration::from_millis(12));
        record_pull("todo", 10, 2, Duration::from_millis(40));
        record_lock_wait("table", Duration::from_micros(5));
        record_error("pull", "remote");
    }

    #[test]
    fn test_latency_timer() {
        {
            let _timer = LatencyTimer::new("memory", "read");
            std::thread::sleep(Duration::from_micros(10));
        }
    }
}
