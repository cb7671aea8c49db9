// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync context.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::conflict::PushCompletionResult;
use crate::error::SyncError;

/// A push running in the background. See [`super::SyncContext::spawn_push`].
#[derive(Debug)]
pub struct PushHandle {
    pub(super) task: JoinHandle<Result<PushCompletionResult, SyncError>>,
    pub(super) cancel: CancellationToken,
}

impl PushHandle {
    /// Ask the push to stop before its next operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the push and returns its outcome.
    pub async fn completion(self) -> Result<PushCompletionResult, SyncError> {
        self.task
            .await
            .map_err(|e| SyncError::InvalidState(format!("push task did not complete: {e}")))?
    }
}
