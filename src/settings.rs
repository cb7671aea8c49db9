// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delta tokens: per `(table, query key)` high-water marks of `updatedAt`,
//! kept in `__config` under `"{table}_{queryKey}_deltaToken"`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use crate::error::SyncError;
use crate::query::temporal::{format_datetime, parse_datetime};
use crate::storage::system::{columns, CONFIG_TABLE};
use crate::storage::traits::{LocalStore, Row};

pub struct SettingsStore {
    store: Arc<dyn LocalStore>,
    cache: DashMap<String, Option<DateTime<Utc>>>,
}

fn delta_token_key(table: &str, query_key: &str) -> String {
    format!("{table}_{query_key}_deltaToken")
}

impl SettingsStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    pub async fn get_delta_token(&self, table: &str, query_key: &str) -> Result<Option<DateTime<Utc>>, SyncError> {
        let key = delta_token_key(table, query_key);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(*cached);
        }
        let token = self
            .store
            .lookup(CONFIG_TABLE, &key)
            .await?
            .and_then(|row| row.get(columns::VALUE).and_then(Value::as_str).and_then(parse_datetime));
        self.cache.insert(key, token);
        Ok(token)
    }

    pub async fn set_delta_token(&self, table: &str, query_key: &str, token: DateTime<Utc>) -> Result<(), SyncError> {
        let key = delta_token_key(table, query_key);
        let mut row = Row::new();
        row.insert(crate::system_columns::ID.into(), Value::String(key.clone()));
        row.insert(columns::VALUE.into(), Value::String(format_datetime(&token)));
        self.store.upsert(CONFIG_TABLE, &[row], false).await?;
        debug!(table, query_key, token = %format_datetime(&token), "Delta token advanced");
        self.cache.insert(key, Some(token));
        Ok(())
    }

    pub async fn reset_delta_token(&self, table: &str, query_key: &str) -> Result<(), SyncError> {
        let key = delta_token_key(table, query_key);
        self.store.delete_ids(CONFIG_TABLE, &[key.clone()]).await?;
        self.cache.insert(key, None);
        Ok(())
    }
}
