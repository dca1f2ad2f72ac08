//! Data model for submitted blocks and the derived ledger entries.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// SHA-256 hex of the decimal height followed by the ordered transaction ids.
    pub id: String,
    /// 1-indexed, gapless.
    pub height: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Transaction ids in block order.
    pub fn tx_ids(&self) -> impl Iterator<Item = &str> {
        self.transactions.iter().map(|tx| tx.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
}

impl Transaction {
    /// A transaction without inputs mints its outputs.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Reference to output `index` of a previously committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    pub tx_id: String,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: String,
    pub value: u64,
}

/// Which side of a transaction an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Input,
    Output,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Input => "in",
            EntryKind::Output => "out",
        }
    }
}

/// One signed movement of value. Outputs are stored positive, spent inputs negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub tx_id: String,
    pub block_id: String,
    pub kind: EntryKind,
    pub index: u32,
    pub address: String,
    pub value: i64,
    pub input_ref: Option<Input>,
}

impl LedgerEntry {
    pub fn output(tx_id: &str, block_id: &str, index: u32, address: &str, value: i64) -> Self {
        Self {
            tx_id: tx_id.to_owned(),
            block_id: block_id.to_owned(),
            kind: EntryKind::Output,
            index,
            address: address.to_owned(),
            value,
            input_ref: None,
        }
    }

    pub fn spend(
        tx_id: &str,
        block_id: &str,
        index: u32,
        address: &str,
        value: i64,
        spent: &Input,
    ) -> Self {
        Self {
            tx_id: tx_id.to_owned(),
            block_id: block_id.to_owned(),
            kind: EntryKind::Input,
            index,
            address: address.to_owned(),
            value: -value,
            input_ref: Some(spent.clone()),
        }
    }
}
