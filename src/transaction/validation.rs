/// Stateless checks run before a transaction is admitted to the pool
use crate::crypto::Address;
use crate::error::ChainError;
use crate::transaction::types::{Transaction, MAX_TRANSACTION_SIZE};

impl Transaction {
    /// Size of the transaction in its bincode encoding.
    pub fn encoded_size(&self) -> Result<usize, ChainError> {
        Ok(bincode::serialized_size(self)? as usize)
    }

    /// Validate transaction size to prevent DoS attacks
    pub fn validate_size(&self) -> Result<(), ChainError> {
        let size = self.encoded_size()?;
        if size > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "Transaction too large: {} bytes (max: {})",
                size, MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }

    /// Checks that the transaction is signed and the signer is recoverable.
    pub fn validate_signature(&self) -> Result<Address, ChainError> {
        self.from()
    }
}
