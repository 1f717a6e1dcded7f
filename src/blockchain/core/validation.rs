use crate::error::ChainError;

use super::chain::Body;

/// Reports whether `hash` starts with at least `difficulty` zero bits.
///
/// Difficulties wider than the hash can never be met.
pub fn valid_hash(hash: &[u8], difficulty: u64) -> bool {
    let Ok(full) = usize::try_from(difficulty / 8) else {
        return false;
    };
    let rem = (difficulty % 8) as u32;
    if full > hash.len() || (full == hash.len() && rem > 0) {
        return false;
    }
    if hash[..full].iter().any(|b| *b != 0) {
        return false;
    }
    rem == 0 || hash[full] & (0xFFu8 << (8 - rem)) == 0
}

/// Checks that every receipt belongs to the transaction at the same index.
pub fn validate_body(body: &Body) -> Result<(), ChainError> {
    if body.transactions.len() != body.receipts.len() {
        return Err(ChainError::InvalidBlock(format!(
            "{} transactions but {} receipts",
            body.transactions.len(),
            body.receipts.len()
        )));
    }
    for (i, (tx, receipt)) in body.transactions.iter().zip(&body.receipts).enumerate() {
        tx.validate_size()?;
        if receipt.tx_hash != tx.hash() {
            return Err(ChainError::InvalidBlock(format!(
                "Receipt {} does not match transaction {}",
                i,
                hex::encode(tx.hash())
            )));
        }
    }
    Ok(())
}
