//! Block acceptance checks. Reads only; never mutates the store.

use std::collections::HashSet;

use crate::crypto::expected_block_id;
use crate::error::{IndexerError, Rejection, StoreError};
use crate::model::{Block, Input, Transaction};
use crate::storage::LedgerRead;

/// Run every acceptance check in order, stopping at the first failure:
/// height sequencing, per-transaction conservation, then block identity.
pub fn validate<R: LedgerRead + ?Sized>(store: &R, block: &Block) -> Result<(), IndexerError> {
    check_height(store, block)?;
    check_transactions(store, block)?;
    check_block_id(block)?;
    Ok(())
}

pub fn check_height<R: LedgerRead + ?Sized>(store: &R, block: &Block) -> Result<(), IndexerError> {
    let current = store.max_height().map_err(IndexerError::read)?;
    let expected = current + 1;
    if block.height != expected {
        return Err(Rejection::InvalidHeight {
            expected,
            got: block.height,
        }
        .into());
    }
    Ok(())
}

/// Conservation and spendability of every transaction. Outputs spent by an
/// earlier transaction of the same block count as spent.
pub fn check_transactions<R: LedgerRead + ?Sized>(
    store: &R,
    block: &Block,
) -> Result<(), IndexerError> {
    let mut claimed: HashSet<&Input> = HashSet::new();
    for tx in &block.transactions {
        let outputs = output_total(tx)?;
        if tx.is_coinbase() {
            continue;
        }

        let mut inputs: i128 = 0;
        for input in &tx.inputs {
            let value = store
                .entry_value(&input.tx_id, input.index)
                .map_err(|e| dangling_or_unavailable(e, tx, input))?;
            let spent = store.is_spent(input, &tx.id).map_err(IndexerError::read)?;
            if spent || !claimed.insert(input) {
                return Err(Rejection::DoubleSpend {
                    tx_id: tx.id.clone(),
                    input_tx_id: input.tx_id.clone(),
                    index: input.index,
                }
                .into());
            }
            inputs += i128::from(value).abs();
        }

        if inputs != outputs {
            return Err(Rejection::ConservationMismatch {
                tx_id: tx.id.clone(),
                inputs,
                outputs,
            }
            .into());
        }
    }
    Ok(())
}

pub fn check_block_id(block: &Block) -> Result<(), IndexerError> {
    let expected = expected_block_id(block);
    if block.id != expected {
        return Err(Rejection::InvalidBlockId {
            expected,
            got: block.id.clone(),
        }
        .into());
    }
    Ok(())
}

/// Sum of output values. Each value and the running total must fit a signed
/// ledger entry; `index` names the output that crosses the range.
fn output_total(tx: &Transaction) -> Result<i128, IndexerError> {
    let mut total: i128 = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        total += i128::from(output.value);
        if total > i128::from(i64::MAX) {
            return Err(Rejection::ValueOutOfRange {
                tx_id: tx.id.clone(),
                index: index as u32,
            }
            .into());
        }
    }
    Ok(total)
}

fn dangling_or_unavailable(err: StoreError, tx: &Transaction, input: &Input) -> IndexerError {
    match err {
        StoreError::NotFound { .. } => Rejection::DanglingInput {
            tx_id: tx.id.clone(),
            input_tx_id: input.tx_id.clone(),
            index: input.index,
        }
        .into(),
        other => IndexerError::read(other),
    }
}
