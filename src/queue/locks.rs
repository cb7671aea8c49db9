// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Named advisory locks.
//!
//! One async mutex per key, created on first use. Guards are owned so they
//! can live across `.await` and be moved between tasks; dropping the guard
//! releases the lock on every exit path.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::trace;
use crate::error::SyncError;
use crate::metrics;

pub struct LockMap {
    scope: &'static str,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Held lock on one key. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl LockMap {
    pub fn new(scope: &'static str) -> Self {
        Self {
            scope,
            locks: DashMap::new(),
        }
    }

    fn mutex(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Waits for `key`, giving up when `cancel` fires or `timeout` elapses.
    pub async fn acquire(
        &self,
        key: &str,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<LockGuard, SyncError> {
        let mutex = self.mutex(key);
        let start = Instant::now();
        let locked = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, mutex.lock_owned())
                    .await
                    .map_err(|_| SyncError::LockTimeout {
                        scope: self.scope,
                        key: key.to_string(),
                    }),
                None => Ok(mutex.lock_owned().await),
            }
        };
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            guard = locked => guard?,
        };
        metrics::record_lock_wait(self.scope, start.elapsed());
        trace!(scope = self.scope, key, "Lock acquired");
        Ok(LockGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }

    /// Takes `key` only if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Option<LockGuard> {
        self.mutex(key).try_lock_owned().ok().map(|guard| LockGuard {
            key: key.to_string(),
            _guard: guard,
        })
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    /// Forgets keys nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
