//! Block identity hashing.

use sha2::{Digest, Sha256};

use crate::model::Block;

/// Hash inputs (concatenate as bytes, SHA-256) and return lowercase hex.
pub fn hash_concat(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hex::encode(hasher.finalize())
}

/// Compute the id a block at `height` with the given ordered transaction ids must carry.
/// The height is hashed as its decimal string, directly followed by each id.
pub fn compute_block_id<'a>(height: u64, tx_ids: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(height.to_string());
    for id in tx_ids {
        hasher.update(id);
    }
    hex::encode(hasher.finalize())
}

/// Recompute the expected id of `block` from its own height and transactions.
pub fn expected_block_id(block: &Block) -> String {
    compute_block_id(block.height, block.tx_ids())
}
