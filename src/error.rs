// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;
use crate::conflict::PushFailedError;
use crate::query::QueryError;
use crate::remote::RemoteError;
use crate::storage::traits::StorageError;

/// Crate-level error for queue, push, pull and context calls.
///
/// Per-item push failures never surface here; they become
/// [`crate::TableOperationError`] records. A `SyncError` means the call made
/// no durable progress (or, for [`SyncError::PushFailed`], that the push
/// finished with unresolved errors).
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Local store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Transport failure: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    PushFailed(Box<PushFailedError>),

    #[error("Cancelled")]
    Cancelled,

    #[error("Timed out waiting for {scope} lock '{key}'")]
    LockTimeout { scope: &'static str, key: String },

    /// Persisted queue state violates its invariants. Not retryable.
    #[error("Local store corruption: {0}")]
    StoreCorruption(String),
}

impl From<PushFailedError> for SyncError {
    fn from(e: PushFailedError) -> Self {
        SyncError::PushFailed(Box::new(e))
    }
}

impl SyncError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Query(_) => "query",
            SyncError::Storage(_) => "storage",
            SyncError::Remote(_) => "remote",
            SyncError::InvalidState(_) => "invalid_state",
            SyncError::InvalidArgument(_) => "invalid_argument",
            SyncError::PushFailed(_) => "push_failed",
            SyncError::Cancelled => "cancelled",
            SyncError::LockTimeout { .. } => "lock_timeout",
            SyncError::StoreCorruption(_) => "store_corruption",
        }
    }

    /// The push result carried by [`SyncError::PushFailed`].
    pub fn push_result(&self) -> Option<&crate::conflict::PushCompletionResult> {
        match self {
            SyncError::PushFailed(e) => Some(&e.result),
            _ => None,
        }
    }
}
