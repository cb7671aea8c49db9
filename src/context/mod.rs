// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync context.
//!
//! The [`SyncContext`] ties the pieces together:
//! - a [`LocalStore`] holding synced tables and the system tables
//! - the [`OperationQueue`] of pending mutations
//! - delta tokens in [`SettingsStore`]
//! - the [`RemoteTable`] transport and the [`SyncHandler`] hooks
//!
//! Push, pull and purge are serialized: one action runs at a time.
//! Local mutations run concurrently with reads and with each other, and
//! fail fast with [`SyncError::InvalidState`] while a pull or purge owns
//! their table.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{
//!     ColumnType, DefaultHandler, MemoryStore, RemoteTable, SyncConfig, SyncContext,
//!     TableDefinition,
//! };
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(remote: Arc<dyn RemoteTable>) -> Result<(), offline_sync::SyncError> {
//! let ctx = SyncContext::initialize(
//!     Arc::new(MemoryStore::new()),
//!     remote,
//!     Arc::new(DefaultHandler),
//!     SyncConfig::default(),
//! )
//! .await?;
//!
//! ctx.define_table(TableDefinition::new("todo").column("text", ColumnType::Text).with_system_columns())
//!     .await?;
//! ctx.insert("todo", json!({"id": "1", "text": "buy milk"}).as_object().cloned().unwrap())
//!     .await?;
//!
//! let result = ctx.push(CancellationToken::new()).await?;
//! println!("push finished: {}", result.status);
//! # Ok(())
//! # }
//! ```

mod api;
mod types;

pub use types::PushHandle;

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use crate::actions::ActionContext;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::handler::SyncHandler;
use crate::queue::OperationQueue;
use crate::remote::RemoteTable;
use crate::settings::SettingsStore;
use crate::storage::sqlite::SqliteStore;
use crate::storage::system::define_system_tables;
use crate::storage::traits::{LocalStore, TableDefinition};

struct Inner {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteTable>,
    handler: Arc<dyn SyncHandler>,
    queue: OperationQueue,
    settings: SettingsStore,
    config: SyncConfig,
    /// Held for the whole of a push, pull, purge or error resolution.
    action_lock: Mutex<()>,
}

/// Entry point for offline reads, writes and synchronization.
///
/// Cheap to clone; clones share the same queue and store.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<Inner>,
}

impl SyncContext {
    /// Prepares `store` (system tables, queue state) and returns a ready context.
    pub async fn initialize(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteTable>,
        handler: Arc<dyn SyncHandler>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        define_system_tables(store.as_ref()).await?;
        let queue = OperationQueue::load(store.clone())
            .await?
            .with_lock_timeout(config.lock_timeout());
        let settings = SettingsStore::new(store.clone());
        info!(pending = queue.pending_operations().await, "Sync context ready");

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                remote,
                handler,
                queue,
                settings,
                config,
                action_lock: Mutex::new(()),
            }),
        })
    }

    /// Opens the SQLite store named by `config.store_url` and initializes on it.
    pub async fn open(
        config: SyncConfig,
        remote: Arc<dyn RemoteTable>,
        handler: Arc<dyn SyncHandler>,
    ) -> Result<Self, SyncError> {
        let store = SqliteStore::from_config(&config).await?;
        Self::initialize(Arc::new(store), remote, handler, config).await
    }

    /// Declares (or widens) a synced table.
    pub async fn define_table(&self, definition: TableDefinition) -> Result<(), SyncError> {
        if crate::storage::system::is_system_table(&definition.name) {
            return Err(SyncError::InvalidArgument(format!(
                "'{}' is reserved for the sync engine",
                definition.name
            )));
        }
        self.inner.store.define_table(definition).await?;
        Ok(())
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.inner.store
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.inner.queue
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Live operations across all tables.
    pub async fn pending_operations(&self) -> usize {
        self.inner.queue.pending_operations().await
    }

    fn actions(&self) -> ActionContext<'_> {
        ActionContext {
            queue: &self.inner.queue,
            store: self.inner.store.as_ref(),
            remote: self.inner.remote.as_ref(),
            handler: self.inner.handler.as_ref(),
            settings: &self.inner.settings,
        }
    }
}
