//! Error types for QuarryChain

use crate::crypto::Address;
use thiserror::Error;

/// Failures reported by a state backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Account codec error: {0}")]
    Codec(String),
    #[error("Unknown state root: {0}")]
    UnknownRoot(String),
    #[error("State backend error: {0}")]
    Backend(String),
}

/// Reasons the transaction pool refuses a submission.
///
/// A refused transaction is dropped; the pool is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxPoolError {
    #[error("Sender could not be recovered or has no account")]
    UnknownSender,
    #[error("Transaction already known to the pool")]
    AlreadyKnown,
    #[error("Stale nonce: got {got}, committed {committed}")]
    StaleNonce { got: u64, committed: u64 },
    #[error("Replacement fee too low: offered {offered}, required at least {required}")]
    FeeTooLow { offered: u64, required: u64 },
    #[error("Transaction size {size} exceeds maximum {max}")]
    TxTooLarge { size: usize, max: usize },
    #[error("Gas price {price} below pool minimum {min}")]
    GasPriceTooLow { price: u64, min: u64 },
    #[error("Sender {} has too many transactions", hex::encode(.0))]
    SenderFull(Address),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors surfaced by the block assembler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("Assembler is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("Packing task failed: {0}")]
    Join(String),
    #[error("No nonce satisfies difficulty {0}")]
    NonceSpaceExhausted(u64),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid proof of work")]
    InvalidProofOfWork,
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Bincode error: {0}")]
    BincodeError(#[from] Box<bincode::ErrorKind>),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Pool(#[from] TxPoolError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
