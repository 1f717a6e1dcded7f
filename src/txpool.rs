//! Transaction pool: admission, per-sender nonce chains and fee-priority
//! extraction for block assembly.

pub mod config;
pub mod ordering;
pub mod pool;

use std::sync::Arc;

use crate::transaction::Transaction;

pub use config::PoolConfig;
pub use pool::{Admission, TransactionPool};

/// Something the block assembler can draw executable transactions from.
pub trait TxSource: Send + Sync {
    /// Removes and returns the next transaction to execute, if any.
    fn pop(&self) -> Option<Arc<Transaction>>;
}
