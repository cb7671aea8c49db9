// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Boundary to the server. HTTP, authentication and wire encoding live in
//! the host application's [`RemoteTable`] implementation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use crate::operation::TableOperation;
use crate::query::QueryDescription;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The server refused the operation (conflict, precondition failed,
    /// validation). Recorded as a sync error; the push continues.
    #[error("Server rejected the request with status {status}")]
    InvalidOperation { status: u16, body: Option<String> },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication required: {0}")]
    Authentication(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn invalid_operation(status: u16, body: impl Into<String>) -> Self {
        RemoteError::InvalidOperation {
            status,
            body: Some(body.into()),
        }
    }
}

/// Extra query-string parameters forwarded verbatim on reads.
pub type Parameters = HashMap<String, String>;

#[async_trait]
pub trait RemoteTable: Send + Sync {
    /// Sends one operation. Returns the server's copy of the row, if any.
    async fn execute(&self, operation: &TableOperation) -> Result<Option<Value>, RemoteError>;

    /// Runs `query` against the server table named in it.
    async fn read(&self, query: &QueryDescription, parameters: &Parameters) -> Result<Vec<Value>, RemoteError>;
}
