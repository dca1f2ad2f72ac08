//! The ingestion service: validate → project for blocks, truncate → recompute for rollbacks.
//!
//! Both mutating paths hold the same writer lock for their full duration and
//! run as one atomic store unit, so a height check can never race another
//! submission and a rollback never interleaves with a projection.

use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{IndexerError, Result};
use crate::model::Block;
use crate::projector::project;
use crate::rollback::{rollback_to, RolledBack};
use crate::storage::{LedgerRead, LedgerStore};
use crate::validator::validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub id: String,
    pub height: u64,
    pub entries: usize,
}

pub struct Indexer {
    store: LedgerStore,
    writer: Mutex<()>,
}

impl Indexer {
    pub fn new(store: LedgerStore) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Validate and commit `block`. A rejected block leaves the store untouched.
    pub async fn submit_block(&self, block: Block) -> Result<Accepted> {
        let _writer = self.writer.lock().await;
        let height = block.height;

        let res = self
            .store
            .run_atomically(IndexerError::projection, move |tx| {
                validate(tx, &block)?;
                let entries = project(tx, &block).map_err(IndexerError::projection)?;
                Ok(Accepted {
                    id: block.id,
                    height: block.height,
                    entries,
                })
            })
            .await;

        match &res {
            Ok(accepted) => tracing::info!(
                height = accepted.height,
                id = %accepted.id,
                entries = accepted.entries,
                "block accepted"
            ),
            Err(IndexerError::Rejected(reason)) => {
                tracing::warn!(height, kind = reason.kind(), %reason, "block rejected")
            }
            Err(e) => tracing::error!(height, kind = e.kind(), error = %e, "block not committed"),
        }
        res
    }

    /// Materialized balance of `address`; addresses never seen hold 0.
    pub async fn get_balance(&self, address: &str) -> Result<i64> {
        let address = address.to_owned();
        self.store
            .read(move |tx| tx.get_balance(&address))
            .await
            .map_err(IndexerError::read)
    }

    pub async fn current_height(&self) -> Result<u64> {
        self.store
            .read(|tx| tx.max_height())
            .await
            .map_err(IndexerError::read)
    }

    /// Revert indexed state to `target`. All or nothing.
    pub async fn rollback(&self, target: u64) -> Result<RolledBack> {
        let _writer = self.writer.lock().await;

        let res = self
            .store
            .run_atomically(IndexerError::rollback, move |tx| {
                rollback_to(tx, target).map_err(IndexerError::rollback)
            })
            .await;

        match &res {
            Ok(done) if done.removed_blocks == 0 => {
                tracing::info!(
                    target_height = target,
                    height = done.to_height,
                    "rollback target not below tip, nothing to do"
                )
            }
            Ok(done) => tracing::info!(
                from = done.from_height,
                to = done.to_height,
                blocks = done.removed_blocks,
                entries = done.removed_entries,
                "rolled back"
            ),
            Err(e) => tracing::error!(target_height = target, kind = e.kind(), error = %e, "rollback failed"),
        }
        res
    }
}
