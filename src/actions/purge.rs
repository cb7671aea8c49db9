// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use crate::error::SyncError;
use crate::query::{QueryDescription, QueryNode};
use crate::storage::system::{columns, ERRORS_TABLE};
use super::{validate_query_key, ActionContext};

/// Removes local rows without telling the server.
///
/// Refuses while the table has pending operations unless forced, in which
/// case those operations and their sync errors are discarded too. The
/// delta token for `query_key` is reset so the next pull starts over.
pub struct PurgeAction<'a> {
    ctx: ActionContext<'a>,
    query: QueryDescription,
    query_key: Option<String>,
    force: bool,
    cancel: CancellationToken,
}

impl<'a> PurgeAction<'a> {
    pub fn new(
        ctx: ActionContext<'a>,
        query: QueryDescription,
        query_key: Option<String>,
        force: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            query,
            query_key,
            force,
            cancel,
        }
    }

    /// Returns the number of local rows removed.
    #[instrument(name = "purge", skip_all, fields(table = %self.query.table_name, force = self.force))]
    pub async fn execute(self) -> Result<u64, SyncError> {
        if let Some(key) = &self.query_key {
            validate_query_key(key)?;
        }
        let table = self.query.table_name.as_str();
        let _table_lock = self.ctx.queue.lock_table(table, &self.cancel).await?;

        if self.ctx.queue.count_pending(table).await > 0 {
            if !self.force {
                return Err(SyncError::InvalidState(
                    "The table cannot be purged because it has pending operations.".into(),
                ));
            }
            let discarded = self.ctx.queue.delete_table(table).await?;
            let filter = QueryNode::member(columns::TABLE_NAME).equals(QueryNode::constant(table));
            self.ctx
                .store
                .delete(&QueryDescription::new(ERRORS_TABLE).with_filter(filter))
                .await?;
            info!(discarded, "Forced purge discarded pending operations");
        }

        if let Some(key) = &self.query_key {
            self.ctx.settings.reset_delta_token(table, key).await?;
        }
        let removed = self.ctx.store.delete(&self.query).await?;
        info!(removed, "Purged local rows");
        Ok(removed)
    }
}
