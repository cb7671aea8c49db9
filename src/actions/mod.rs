// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync actions: push, pull, purge.
//!
//! Each action borrows the shared pieces through [`ActionContext`] and runs
//! to completion once; the [`crate::SyncContext`] makes sure only one runs
//! at a time.

pub mod pull;
pub mod purge;
pub mod push;

pub use pull::PullAction;
pub use purge::PurgeAction;
pub use push::PushAction;

use crate::error::SyncError;
use crate::handler::SyncHandler;
use crate::queue::OperationQueue;
use crate::remote::RemoteTable;
use crate::settings::SettingsStore;
use crate::storage::traits::LocalStore;

/// Borrowed collaborators shared by every action.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub queue: &'a OperationQueue,
    pub store: &'a dyn LocalStore,
    pub remote: &'a dyn RemoteTable,
    pub handler: &'a dyn SyncHandler,
    pub settings: &'a SettingsStore,
}

/// Query keys name a delta token; keep them short and plain.
pub(crate) fn validate_query_key(query_key: &str) -> Result<(), SyncError> {
    let mut chars = query_key.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
        && query_key.len() <= 25;
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidArgument(format!(
            "query key '{query_key}' must start with a letter, contain only letters and digits, and be at most 25 characters"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_key_validation() {
        assert!(validate_query_key("todoItems").is_ok());
        assert!(validate_query_key("a1").is_ok());
        assert!(validate_query_key("x".repeat(25).as_str()).is_ok());
        assert!(validate_query_key("x".repeat(26).as_str()).is_err());
        assert!(validate_query_key("").is_err());
        assert!(validate_query_key("1abc").is_err());
        assert!(validate_query_key("my-key").is_err());
    }
}
