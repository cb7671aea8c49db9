// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync context.
//!
//! # Example
//!
//! ```
//! use offline_sync::SyncConfig;
//!
//! // Minimal config (in-memory SQLite, defaults everywhere)
//! let config = SyncConfig::default();
//! assert_eq!(config.max_connections, 4);
//! assert!(config.store_url.is_none());
//!
//! // Full config
//! let config = SyncConfig {
//!     store_url: Some("sqlite://todo.db".into()),
//!     lock_timeout_ms: Some(30_000),
//!     ..Default::default()
//! };
//! assert_eq!(config.lock_timeout().map(|d| d.as_secs()), Some(30));
//! ```

use serde::Deserialize;
use std::time::Duration;
use crate::resilience::retry::RetryConfig;

/// Which [`RetryConfig`] preset to use when opening the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryPreset {
    /// Fail fast on bad configuration.
    #[default]
    Startup,
    /// Keep trying forever.
    Daemon,
    /// A few quick attempts.
    Query,
}

impl RetryPreset {
    #[must_use]
    pub fn to_retry_config(self) -> RetryConfig {
        match self {
            Self::Startup => RetryConfig::startup(),
            Self::Daemon => RetryConfig::daemon(),
            Self::Query => RetryConfig::query(),
        }
    }
}

/// Configuration for the sync context.
///
/// All fields have defaults; an empty document deserializes to
/// [`SyncConfig::default()`].
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// SQLite connection string (e.g. "sqlite://todo.db"). `None` opens an
    /// in-memory database.
    #[serde(default)]
    pub store_url: Option<String>,

    /// Pool size for file-backed databases.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Retry policy for the initial connection.
    #[serde(default)]
    pub connect_retry: RetryPreset,

    /// Upper bound on waiting for a table lock. `None` waits until cancelled.
    #[serde(default)]
    pub lock_timeout_ms: Option<u64>,

    /// Delete rows the server marks `deleted: true` during pull.
    #[serde(default = "default_pull_apply_tombstones")]
    pub pull_apply_tombstones: bool,

    /// Rows requested per remote read during pull.
    #[serde(default = "default_pull_page_size")]
    pub pull_page_size: u64,
}

fn default_max_connections() -> u32 { 4 }
fn default_pull_apply_tombstones() -> bool { true }
fn default_pull_page_size() -> u64 { crate::actions::pull::DEFAULT_PAGE_SIZE }

impl SyncConfig {
    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            max_connections: default_max_connections(),
            connect_retry: RetryPreset::default(),
            lock_timeout_ms: None,
            pull_apply_tombstones: default_pull_apply_tombstones(),
            pull_page_size: default_pull_page_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.connect_retry, RetryPreset::Startup);
        assert!(config.pull_apply_tombstones);
        assert_eq!(config.pull_page_size, 50);
        assert!(config.lock_timeout().is_none());
    }

    #[test]
    fn test_overrides() {
        let config: SyncConfig = serde_json::from_str(
            r#"{"store_url": "sqlite://x.db", "connect_retry": "daemon", "lock_timeout_ms": 250}"#,
        )
        .unwrap();
        assert_eq!(config.store_url.as_deref(), Some("sqlite://x.db"));
        assert_eq!(config.lock_timeout(), Some(Duration::from_millis(250)));
        assert!(config.connect_retry.to_retry_config().max_retries.is_none());
    }
}
