//! Transaction pool configuration.

use crate::transaction::MAX_TRANSACTION_SIZE;

/// Configuration for the transaction pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum executable transactions held for a single sender.
    pub max_pending_per_sender: usize,
    /// Maximum future-nonce transactions held for a single sender.
    pub max_queued_per_sender: usize,
    /// Minimum gas price required for admission.
    pub min_gas_price: u64,
    /// Maximum encoded transaction size in bytes.
    pub max_tx_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    pub const fn new() -> Self {
        Self {
            max_pending_per_sender: 64,
            max_queued_per_sender: 64,
            min_gas_price: 0,
            max_tx_size: MAX_TRANSACTION_SIZE,
        }
    }

    pub const fn with_max_pending_per_sender(mut self, max: usize) -> Self {
        self.max_pending_per_sender = max;
        self
    }

    pub const fn with_max_queued_per_sender(mut self, max: usize) -> Self {
        self.max_queued_per_sender = max;
        self
    }

    pub const fn with_min_gas_price(mut self, min: u64) -> Self {
        self.min_gas_price = min;
        self
    }

    pub const fn with_max_tx_size(mut self, max: usize) -> Self {
        self.max_tx_size = max;
        self
    }
}
