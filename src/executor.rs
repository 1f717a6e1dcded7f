//! Balance-transfer state transition.
//!
//! Execution failures are data: a transaction that cannot be applied yields a
//! receipt with [`ReceiptStatus::Failure`](crate::transaction::ReceiptStatus)
//! and leaves the state untouched. Only a failing state backend produces an
//! error.

use crate::cache::SenderCache;
use crate::error::StateError;
use crate::state::StateDb;
use crate::transaction::{Receipt, Transaction, TRANSFER_GAS};
use std::sync::Arc;
use tracing::{debug, trace};

/// Applies one transaction to a state store.
pub trait StateMachine: Send + Sync {
    fn execute(&self, state: &dyn StateDb, tx: &Transaction) -> Result<Receipt, StateError>;
}

/// Why a transaction produced a failure receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    InsufficientGas,
    CostOverflow,
    UnknownSender,
    NonceMismatch,
    InsufficientBalance,
    BalanceOverflow,
}

/// The flat-fee transfer machine.
///
/// A successful execution debits `value + 21000 * gas_price` from the sender,
/// advances the sender's nonce by one and credits `value` to the receiver.
/// Gas declared above 21000 is accepted and ignored.
#[derive(Debug, Clone, Default)]
pub struct TransferMachine {
    senders: Arc<SenderCache>,
}

impl TransferMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shares a sender cache with other components (typically the pool).
    pub fn with_sender_cache(senders: Arc<SenderCache>) -> Self {
        TransferMachine { senders }
    }

    /// Executes `tx`, returning either the state change it made or the reason
    /// it was rejected.
    pub fn apply(&self, state: &dyn StateDb, tx: &Transaction) -> Result<Result<(), FailureReason>, StateError> {
        if tx.gas < TRANSFER_GAS {
            return Ok(Err(FailureReason::InsufficientGas));
        }
        let Some(cost) = tx.intrinsic_cost() else {
            return Ok(Err(FailureReason::CostOverflow));
        };

        let Ok(from) = self.senders.sender(tx) else {
            return Ok(Err(FailureReason::UnknownSender));
        };
        let Some(mut sender) = state.load(&from)? else {
            return Ok(Err(FailureReason::UnknownSender));
        };

        // Accounts advance one nonce per successful execution.
        if sender.nonce.checked_add(1) != Some(tx.nonce) {
            return Ok(Err(FailureReason::NonceMismatch));
        }
        if sender.balance < cost {
            return Ok(Err(FailureReason::InsufficientBalance));
        }

        // The receiver's credit is checked before the sender is touched so that
        // a rejected transfer never leaves a half-applied debit behind.
        let receiver_before = if tx.to == from {
            sender.balance - cost
        } else {
            state.load(&tx.to)?.map_or(0, |account| account.balance)
        };
        if receiver_before.checked_add(tx.value).is_none() {
            return Ok(Err(FailureReason::BalanceOverflow));
        }

        sender.balance -= cost;
        sender.nonce += 1;
        state.store(&from, sender)?;

        let mut receiver = state.load(&tx.to)?.unwrap_or_default();
        receiver.balance += tx.value;
        state.store(&tx.to, receiver)?;

        trace!(
            from = %hex::encode(from),
            to = %hex::encode(tx.to),
            value = tx.value,
            cost,
            "transfer applied"
        );
        Ok(Ok(()))
    }
}

impl StateMachine for TransferMachine {
    fn execute(&self, state: &dyn StateDb, tx: &Transaction) -> Result<Receipt, StateError> {
        let tx_hash = tx.hash();
        match self.apply(state, tx)? {
            Ok(()) => Ok(Receipt::success(tx_hash)),
            Err(reason) => {
                debug!(tx = %hex::encode(tx_hash), ?reason, "transaction failed");
                Ok(Receipt::failure(tx_hash))
            }
        }
    }
}
