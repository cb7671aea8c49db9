// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pull: fetch server rows into the local store, one page at a time.
//!
//! ```text
//! loop {
//!     read page (skip, page size) ─▶ empty? stop
//!     upsert rows, delete tombstones
//!     incremental and newest updatedAt > token ─▶ save token, skip = 0
//!     otherwise                               ─▶ skip += page length
//! }
//! ```
//!
//! With a query key the pull is incremental: rows are requested oldest
//! first with `updatedAt ge token`, and the token is saved after every page,
//! so an interrupted pull resumes where the last stored page ended. Servers
//! may return short pages; only an empty page ends the pull.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use crate::error::SyncError;
use crate::metrics;
use crate::query::temporal::parse_datetime;
use crate::query::{OrderByNode, QueryDescription, QueryNode};
use crate::remote::Parameters;
use crate::storage::traits::{row_id, Row};
use crate::system_columns::{DELETED, ID, UPDATED_AT};
use super::push::PushAction;
use super::{validate_query_key, ActionContext};

/// Rows requested per page unless configured otherwise.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Summary of a finished pull.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullOutcome {
    /// Rows written. Rows read again after the delta token moved count twice.
    pub upserted: usize,
    pub deleted: usize,
    /// Delta token after the pull, for incremental pulls.
    pub delta_token: Option<DateTime<Utc>>,
}

pub struct PullAction<'a> {
    ctx: ActionContext<'a>,
    query: QueryDescription,
    query_key: Option<String>,
    parameters: Parameters,
    cancel: CancellationToken,
    apply_tombstones: bool,
    page_size: u64,
}

/// What one stored page contributed.
struct PageOutcome {
    upserted: usize,
    deleted: usize,
    newest: Option<DateTime<Utc>>,
}

impl<'a> PullAction<'a> {
    pub fn new(ctx: ActionContext<'a>, query: QueryDescription, query_key: Option<String>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            query,
            query_key,
            parameters: Parameters::new(),
            cancel,
            apply_tombstones: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Rows requested per remote read. Zero is treated as one.
    #[must_use]
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// When off, rows flagged `deleted` are stored like any other row.
    #[must_use]
    pub fn apply_tombstones(mut self, apply: bool) -> Self {
        self.apply_tombstones = apply;
        self
    }

    fn validate(&self) -> Result<(), SyncError> {
        if !self.query.selection.is_empty() {
            return Err(SyncError::InvalidArgument(
                "Pull query with select clause is not supported.".into(),
            ));
        }
        if let Some(key) = &self.query_key {
            validate_query_key(key)?;
            if !self.query.ordering.is_empty() {
                return Err(SyncError::InvalidArgument(
                    "Incremental pull query must not have orderby clause.".into(),
                ));
            }
            if self.query.skip.is_some() || self.query.take.is_some() {
                return Err(SyncError::InvalidArgument(
                    "Incremental pull query must not have skip or top specified.".into(),
                ));
            }
        }
        Ok(())
    }

    #[instrument(name = "pull", skip_all, fields(table = %self.query.table_name, query_key = ?self.query_key))]
    pub async fn execute(self) -> Result<PullOutcome, SyncError> {
        self.validate()?;
        let start = Instant::now();
        let table = self.query.table_name.clone();

        let _table_lock = self.ctx.queue.lock_table(&table, &self.cancel).await?;

        let pending = self.ctx.queue.count_pending(&table).await;
        if pending > 0 {
            info!(pending, "Pushing pending changes before pull");
            PushAction::new(self.ctx, self.cancel.clone())
                .scoped(vec![table.clone()])
                .holding_table_lock(table.clone())
                .execute()
                .await?;
        }

        let mut token = match &self.query_key {
            Some(key) => self.ctx.settings.get_delta_token(&table, key).await?,
            None => None,
        };
        let mut outcome = PullOutcome {
            delta_token: token,
            ..PullOutcome::default()
        };
        let mut skip = self.query.skip.unwrap_or(0);
        let mut remaining = self.query.take;
        let mut pages = 0usize;

        while let Some(query) = self.page_query(token, skip, remaining) {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let results = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                results = self.ctx.remote.read(&query, &self.parameters) => results?,
            };
            if results.is_empty() {
                break;
            }
            pages += 1;
            let fetched = results.len() as u64;
            let page = self.store_page(&table, results).await?;
            outcome.upserted += page.upserted;
            outcome.deleted += page.deleted;
            debug!(page = pages, fetched, upserted = page.upserted, deleted = page.deleted, "Pull page stored");

            match (&self.query_key, page.newest) {
                (Some(key), Some(newest)) if token.map_or(true, |current| newest > current) => {
                    self.ctx.settings.set_delta_token(&table, key, newest).await?;
                    token = Some(newest);
                    outcome.delta_token = token;
                    // The filter moved; start over from the new token.
                    skip = 0;
                }
                _ => {
                    skip += fetched;
                    remaining = remaining.map(|r| r.saturating_sub(fetched));
                }
            }
        }

        metrics::record_pull(&table, outcome.upserted, outcome.deleted, start.elapsed());
        debug!(pages, upserted = outcome.upserted, deleted = outcome.deleted, "Pull finished");
        Ok(outcome)
    }

    /// Query for the next page, or `None` once the requested `$top` is used up.
    fn page_query(&self, token: Option<DateTime<Utc>>, skip: u64, remaining: Option<u64>) -> Option<QueryDescription> {
        let take = remaining.map_or(self.page_size, |r| r.min(self.page_size));
        if take == 0 {
            return None;
        }
        let mut query = self.query.clone();
        query.include_total_count = false;
        if self.query_key.is_some() {
            query.ordering = vec![OrderByNode::ascending(UPDATED_AT)];
            if let Some(token) = token {
                query = query.with_filter(QueryNode::member(UPDATED_AT).ge(QueryNode::constant(token)));
            }
        } else if query.ordering.is_empty() {
            // Skip-based paging needs a stable order.
            query.ordering.push(OrderByNode::ascending(ID));
        }
        query.skip = (skip > 0).then_some(skip);
        query.take = Some(take);
        Some(query)
    }

    async fn store_page(&self, table: &str, results: Vec<Value>) -> Result<PageOutcome, SyncError> {
        let mut upserts: Vec<Row> = Vec::new();
        let mut tombstones: Vec<String> = Vec::new();
        let mut newest: Option<DateTime<Utc>> = None;
        for value in results {
            let Value::Object(row) = value else { continue };
            let Some(id) = row_id(&row).map(String::from) else { continue };
            if let Some(updated) = row.get(UPDATED_AT).and_then(Value::as_str).and_then(parse_datetime) {
                newest = newest.max(Some(updated));
            }
            let deleted = row.get(DELETED).and_then(Value::as_bool).unwrap_or(false);
            if deleted && self.apply_tombstones {
                tombstones.push(id);
            } else {
                upserts.push(row);
            }
        }

        if !upserts.is_empty() {
            self.ctx.store.upsert(table, &upserts, true).await?;
        }
        if !tombstones.is_empty() {
            self.ctx.store.delete_ids(table, &tombstones).await?;
        }
        Ok(PageOutcome {
            upserted: upserts.len(),
            deleted: tombstones.len(),
            newest,
        })
    }
}
