//! Turns an accepted block into signed ledger entries and balance deltas.

use crate::error::StoreError;
use crate::model::{Block, LedgerEntry};
use crate::storage::{LedgerRead, StoreTx};

/// Apply `block` inside the caller's transaction and return how many entries
/// were written. Must only be called on a block that passed validation.
///
/// A transaction id that is already committed is skipped entirely, whatever
/// inputs and outputs the new copy carries.
pub(crate) fn project(tx: &StoreTx<'_>, block: &Block) -> Result<usize, StoreError> {
    let mut written = 0;
    for (position, transaction) in block.transactions.iter().enumerate() {
        if !tx.insert_transaction(&transaction.id, &block.id, position)? {
            tracing::debug!(tx_id = %transaction.id, "transaction already recorded, skipping");
            continue;
        }

        for (index, input) in transaction.inputs.iter().enumerate() {
            let address = tx.entry_address(&input.tx_id, input.index)?;
            let value = tx.entry_value(&input.tx_id, input.index)?.abs();
            let entry = LedgerEntry::spend(
                &transaction.id,
                &block.id,
                index as u32,
                &address,
                value,
                input,
            );
            written += apply(tx, &entry)?;
        }

        for (index, output) in transaction.outputs.iter().enumerate() {
            let value = i64::try_from(output.value)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            let entry =
                LedgerEntry::output(&transaction.id, &block.id, index as u32, &output.address, value);
            written += apply(tx, &entry)?;
        }
    }

    tx.insert_block(&block.id, block.height)?;
    Ok(written)
}

/// Append `entry` and move its address balance, refusing any balance that
/// would leave the signed 64-bit range.
fn apply(tx: &StoreTx<'_>, entry: &LedgerEntry) -> Result<usize, StoreError> {
    if tx
        .get_balance(&entry.address)?
        .checked_add(entry.value)
        .is_none()
    {
        return Err(StoreError::BalanceOverflow {
            address: entry.address.clone(),
        });
    }
    if !tx.insert_ledger_entry(entry)? {
        return Ok(0);
    }
    tx.upsert_balance_delta(&entry.address, entry.value)?;
    Ok(1)
}
