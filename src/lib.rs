//! # Offline Sync
//!
//! Offline-first table synchronization: applications read and write a local
//! store while disconnected, and the engine reconciles with a remote table
//! service when asked.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SyncContext                          │
//! │  • insert / update / delete write locally and enqueue       │
//! │  • push / pull / purge run one at a time                    │
//! │  • sync errors resolved by client value, server value or    │
//! │    discard                                                  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                      │
//!          ▼                    ▼                      ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌────────────────────┐
//! │  OperationQueue  │ │   RemoteTable    │ │    LocalStore      │
//! │  • sequenced     │ │  • execute op    │ │  • SqliteStore     │
//! │  • collapsing    │ │  • read query    │ │  • MemoryStore     │
//! │  • table / item  │ │  (app supplied)  │ │  • __operations    │
//! │    locks         │ │                  │ │    __errors        │
//! └──────────────────┘ └──────────────────┘ │    __config        │
//!                                           └────────────────────┘
//!                                                     ▲
//!                           QueryDescription ─────────┘
//!                           (OData AST → SQLite SQL)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{DefaultHandler, QueryDescription, RemoteTable, SyncConfig, SyncContext};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(remote: Arc<dyn RemoteTable>) -> Result<(), offline_sync::SyncError> {
//! let config = SyncConfig {
//!     store_url: Some("sqlite://todo.db".into()),
//!     ..Default::default()
//! };
//! let ctx = SyncContext::open(config, remote, Arc::new(DefaultHandler)).await?;
//!
//! // Incremental pull: only rows changed since the last pull with this key.
//! let query = QueryDescription::parse("todo", "$filter=complete eq false")?;
//! let outcome = ctx.pull(query, Some("openTodos"), CancellationToken::new()).await?;
//! println!("pulled {} rows", outcome.upserted);
//!
//! let open = ctx.query("todo", "$filter=complete eq false&$orderby=text").await?;
//! println!("{} open items", open.rows.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`context`]: The [`SyncContext`] entry point
//! - [`queue`]: Durable operation queue and its locks
//! - [`actions`]: Push, pull and purge
//! - [`conflict`]: Sync errors and push results
//! - [`query`]: OData filter AST, parser and SQLite compiler
//! - [`storage`]: Local stores (SQLite, in-memory)
//! - [`resilience`]: Retry logic for store connections

pub mod actions;
pub mod config;
pub mod conflict;
pub mod context;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod operation;
pub mod query;
pub mod queue;
pub mod remote;
pub mod resilience;
pub mod settings;
pub mod storage;

/// Columns with meaning to the sync engine.
pub mod system_columns {
    pub const ID: &str = "id";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const DELETED: &str = "deleted";
    pub const VERSION: &str = "version";
}

pub use config::{RetryPreset, SyncConfig};
pub use context::{PushHandle, SyncContext};
pub use error::SyncError;
pub use handler::{DefaultHandler, ExecutionOutcome, SyncHandler};
pub use remote::{Parameters, RemoteError, RemoteTable};
pub use operation::{OperationKind, OperationState, TableOperation};
pub use conflict::{PushCompletionResult, PushFailedError, PushStatus, Resolution, TableOperationError};
pub use actions::pull::PullOutcome;
pub use storage::traits::{ColumnType, LocalStore, QueryResult, Row, StorageError, TableDefinition};
pub use storage::memory::MemoryStore;
pub use storage::sqlite::SqliteStore;
pub use queue::OperationQueue;
pub use query::{QueryDescription, QueryError, QueryNode, SqlCompiler};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
