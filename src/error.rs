//! Error types for block ingestion, projection and rollback.

use thiserror::Error;

/// Why a submitted block was refused. Nothing a rejected block wrote survives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid block height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },

    #[error("transaction {tx_id} spends unknown output {input_tx_id}:{index}")]
    DanglingInput {
        tx_id: String,
        input_tx_id: String,
        index: u32,
    },

    #[error("transaction {tx_id} spends already spent output {input_tx_id}:{index}")]
    DoubleSpend {
        tx_id: String,
        input_tx_id: String,
        index: u32,
    },

    #[error("transaction {tx_id}: inputs ({inputs}) do not equal outputs ({outputs})")]
    ConservationMismatch {
        tx_id: String,
        inputs: i128,
        outputs: i128,
    },

    #[error("transaction {tx_id}: output {index} value exceeds the ledger range")]
    ValueOutOfRange { tx_id: String, index: u32 },

    #[error("invalid block id: expected {expected}, got {got}")]
    InvalidBlockId { expected: String, got: String },

    #[error("balance of {address} would leave the ledger range")]
    BalanceOverflow { address: String },
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::InvalidHeight { .. } => "InvalidHeight",
            Rejection::DanglingInput { .. } => "DanglingInput",
            Rejection::DoubleSpend { .. } => "DoubleSpend",
            Rejection::ConservationMismatch { .. } => "ConservationMismatch",
            Rejection::ValueOutOfRange { .. } => "ValueOutOfRange",
            Rejection::InvalidBlockId { .. } => "InvalidBlockId",
            Rejection::BalanceOverflow { .. } => "BalanceOverflow",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("output {tx_id}:{index} not found")]
    NotFound { tx_id: String, index: u32 },

    #[error("balance of {address} out of range")]
    BalanceOverflow { address: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Busy/locked database, poisoned handle or a lost worker thread.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::CannotOpen
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("block rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error("projection failed: {0}")]
    ProjectionFailed(StoreError),

    #[error("rollback failed: {0}")]
    RollbackFailed(StoreError),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl IndexerError {
    /// Classify a store failure hit while committing a block. A balance that
    /// would overflow rejects the block instead.
    pub fn projection(err: StoreError) -> Self {
        if let StoreError::BalanceOverflow { address } = err {
            return Rejection::BalanceOverflow { address }.into();
        }
        if err.is_unavailable() {
            IndexerError::StoreUnavailable(err.to_string())
        } else {
            IndexerError::ProjectionFailed(err)
        }
    }

    /// Classify a store failure hit while truncating and recomputing.
    pub fn rollback(err: StoreError) -> Self {
        if err.is_unavailable() {
            IndexerError::StoreUnavailable(err.to_string())
        } else {
            IndexerError::RollbackFailed(err)
        }
    }

    /// Store failures outside a mutating unit (validation reads, balance queries).
    pub fn read(err: StoreError) -> Self {
        IndexerError::StoreUnavailable(err.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IndexerError::Rejected(r) => r.kind(),
            IndexerError::ProjectionFailed(_) => "ProjectionFailed",
            IndexerError::RollbackFailed(_) => "RollbackFailed",
            IndexerError::StoreUnavailable(_) => "StoreUnavailable",
        }
    }
}

pub type Result<T, E = IndexerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_database_counts_as_unavailable() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        let err = IndexerError::projection(StoreError::Sqlite(busy));
        assert_eq!(err.kind(), "StoreUnavailable");
    }

    #[test]
    fn constraint_failure_is_a_projection_failure() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            None,
        );
        let err = IndexerError::projection(StoreError::Sqlite(constraint));
        assert_eq!(err.kind(), "ProjectionFailed");
        let err = IndexerError::rollback(StoreError::Unavailable("gone".into()));
        assert_eq!(err.kind(), "StoreUnavailable");
    }

    #[test]
    fn balance_overflow_during_projection_is_a_rejection() {
        let err = IndexerError::projection(StoreError::BalanceOverflow {
            address: "A".into(),
        });
        assert!(matches!(
            err,
            IndexerError::Rejected(Rejection::BalanceOverflow { ref address }) if address == "A"
        ));
        assert_eq!(err.kind(), "BalanceOverflow");
    }

    #[test]
    fn rejection_kind_passes_through() {
        let err: IndexerError = Rejection::InvalidHeight { expected: 3, got: 2 }.into();
        assert_eq!(err.kind(), "InvalidHeight");
        assert_eq!(
            err.to_string(),
            "block rejected: invalid block height: expected 3, got 2"
        );
    }
}
