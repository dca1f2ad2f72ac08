//! Truncation of the indexed chain and full balance recompute.

use serde::Serialize;

use crate::error::StoreError;
use crate::storage::{LedgerRead, StoreTx};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RolledBack {
    pub from_height: u64,
    pub to_height: u64,
    pub removed_blocks: usize,
    pub removed_entries: usize,
}

/// Drop everything above `target` and rebuild balances from the surviving entries.
/// A target at or above the current height changes nothing.
pub(crate) fn rollback_to(tx: &StoreTx<'_>, target: u64) -> Result<RolledBack, StoreError> {
    let current = tx.max_height()?;
    if target >= current {
        return Ok(RolledBack {
            from_height: current,
            to_height: current,
            removed_blocks: 0,
            removed_entries: 0,
        });
    }

    // entries and transactions reference blocks
    let removed_entries = tx.delete_entries_above_height(target)?;
    tx.delete_transactions_above_height(target)?;
    let removed_blocks = tx.delete_blocks_above_height(target)?;

    recompute_balances(tx, target)?;

    Ok(RolledBack {
        from_height: current,
        to_height: target,
        removed_blocks,
        removed_entries,
    })
}

/// Overwrite every balance row with the sum of entries at or below `height`.
/// Addresses left without entries are reset to zero.
pub(crate) fn recompute_balances(tx: &StoreTx<'_>, height: u64) -> Result<(), StoreError> {
    let totals = tx.entry_totals_up_to(height)?;
    for address in tx.balance_rows()?.into_keys() {
        if !totals.contains_key(&address) {
            tx.overwrite_balance(&address, 0)?;
        }
    }
    for (address, total) in &totals {
        tx.overwrite_balance(address, *total)?;
    }
    Ok(())
}
