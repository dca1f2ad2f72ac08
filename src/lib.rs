//! Block ingestion and address balance ledger.
//!
//! Blocks are validated against the stored chain, projected into signed
//! ledger entries and materialized balances, and can be rolled back to an
//! earlier height with balances recomputed from the surviving entries.

pub mod config;
pub mod crypto;
pub mod error;
pub mod indexer;
pub mod model;
pub mod projector;
pub mod rollback;
pub mod routes;
pub mod storage;
pub mod validator;

use std::sync::Arc;

use indexer::Indexer;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<Indexer>,
}

impl AppState {
    pub fn new(indexer: Indexer) -> Self {
        Self {
            indexer: Arc::new(indexer),
        }
    }
}
