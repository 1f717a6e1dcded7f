//! Transaction pool implementation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cache::SenderCache;
use crate::crypto::{Address, Sha256Hash};
use crate::error::{StateError, TxPoolError};
use crate::state::StateDb;
use crate::transaction::Transaction;
use crate::txpool::config::PoolConfig;
use crate::txpool::ordering::{PooledTx, Priority, Replacement, SenderTxs};
use crate::txpool::TxSource;

/// How an accepted transaction was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Appended to the sender's executable chain.
    Pending,
    /// Held behind a nonce gap; `expected` is the nonce that would be executable.
    Queued { expected: u64 },
    /// Took the place of a cheaper transaction with the same nonce.
    Replaced { previous: Sha256Hash },
}

#[derive(Debug, Default)]
struct PoolInner {
    senders: HashMap<Address, SenderTxs>,
    known: HashSet<Sha256Hash>,
    ranked: BTreeSet<Priority>,
    next_seq: u64,
    pending_count: usize,
    queued_count: usize,
}

impl PoolInner {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Re-indexes `sender` under the key of its current head.
    fn rerank(&mut self, sender: &Address) {
        let Some(txs) = self.senders.get_mut(sender) else {
            return;
        };
        if let Some(old) = txs.ranked.take() {
            self.ranked.remove(&old);
        }
        if let Some(head) = txs.head() {
            let key = Priority::of(head);
            self.ranked.insert(key);
            txs.ranked = Some(key);
        }
    }

    /// Recounts from scratch; used after bulk removals.
    fn update_counts(&mut self) {
        self.pending_count = self.senders.values().map(SenderTxs::pending_len).sum();
        self.queued_count = self.senders.values().map(SenderTxs::queued_len).sum();
    }
}

/// A thread-safe transaction pool with per-sender nonce ordering and
/// cross-sender fee prioritization.
///
/// Every operation takes the single pool lock, so submissions for the same
/// sender are serialized against each other and against `pop`.
pub struct TransactionPool {
    inner: Mutex<PoolInner>,
    state: Arc<dyn StateDb>,
    senders: Arc<SenderCache>,
    config: PoolConfig,
}

impl std::fmt::Debug for TransactionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TransactionPool")
            .field("pending", &inner.pending_count)
            .field("queued", &inner.queued_count)
            .field("config", &self.config)
            .finish()
    }
}

impl TransactionPool {
    pub fn new(state: Arc<dyn StateDb>, config: PoolConfig) -> Self {
        Self::with_sender_cache(state, config, Arc::new(SenderCache::default()))
    }

    pub fn with_sender_cache(
        state: Arc<dyn StateDb>,
        config: PoolConfig,
        senders: Arc<SenderCache>,
    ) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            state,
            senders,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Classifies and inserts a transaction.
    ///
    /// A refused transaction is dropped and the pool is left unchanged.
    pub fn submit(&self, tx: Transaction) -> Result<Admission, TxPoolError> {
        let size = tx
            .encoded_size()
            .map_err(|e| TxPoolError::State(StateError::Codec(e.to_string())))?;
        if size > self.config.max_tx_size {
            return Err(TxPoolError::TxTooLarge {
                size,
                max: self.config.max_tx_size,
            });
        }
        if tx.gas_price < self.config.min_gas_price {
            return Err(TxPoolError::GasPriceTooLow {
                price: tx.gas_price,
                min: self.config.min_gas_price,
            });
        }

        let sender = self
            .senders
            .sender(&tx)
            .map_err(|_| TxPoolError::UnknownSender)?;
        let hash = tx.hash();

        let nonce = tx.nonce;
        let offered = tx.gas_price;

        let mut inner = self.inner.lock();
        let known = inner.known.contains(&hash);
        let queued_here = inner
            .senders
            .get(&sender)
            .map_or(false, |txs| txs.is_queued(nonce, &hash));
        if known && !queued_here {
            return Err(TxPoolError::AlreadyKnown);
        }

        let account = self
            .state
            .load(&sender)?
            .ok_or(TxPoolError::UnknownSender)?;
        if nonce <= account.nonce {
            return Err(TxPoolError::StaleNonce {
                got: nonce,
                committed: account.nonce,
            });
        }

        let (popped, tail, pending_len, queued_len) = match inner.senders.get(&sender) {
            Some(txs) => (txs.popped_nonce, txs.tail_nonce(), txs.pending_len(), txs.queued_len()),
            None => (None, None, 0, 0),
        };
        let expected = account
            .nonce
            .max(popped.unwrap_or(0))
            .max(tail.unwrap_or(0));
        let next = expected.saturating_add(1);

        if queued_here {
            // The same bytes are already queued: they only move once the gap
            // in front of them has closed.
            if nonce != next {
                return Err(TxPoolError::AlreadyKnown);
            }
            if pending_len >= self.config.max_pending_per_sender {
                return Err(TxPoolError::SenderFull(sender));
            }
            let txs = inner.senders.entry(sender).or_default();
            let Some(queued) = txs.take_queued(nonce, &hash) else {
                return Err(TxPoolError::AlreadyKnown);
            };
            txs.push_pending(queued);
            inner.queued_count = inner.queued_count.saturating_sub(1);
            inner.pending_count += 1;
            inner.rerank(&sender);
            debug!(tx = %hex::encode(hash), nonce, "queued transaction resubmitted as executable");
            return Ok(Admission::Pending);
        }

        let seq = inner.next_seq();
        let pooled = PooledTx {
            tx: Arc::new(tx),
            hash,
            sender,
            seq,
        };

        let admission = if nonce > next {
            let replacing = inner
                .senders
                .get(&sender)
                .map_or(false, |txs| txs.has_queued(nonce));
            if !replacing && queued_len >= self.config.max_queued_per_sender {
                return Err(TxPoolError::SenderFull(sender));
            }
            let txs = inner.senders.entry(sender).or_default();
            match txs.insert_queued(pooled) {
                Ok(Some(previous)) => {
                    inner.known.remove(&previous.hash);
                }
                Ok(None) => inner.queued_count += 1,
                Err(existing) => {
                    return Err(TxPoolError::FeeTooLow {
                        offered,
                        required: existing,
                    })
                }
            }
            Admission::Queued { expected: next }
        } else if nonce == next {
            if pending_len >= self.config.max_pending_per_sender {
                return Err(TxPoolError::SenderFull(sender));
            }
            let txs = inner.senders.entry(sender).or_default();
            let opened = txs.push_pending(pooled);
            let overtaken = txs.drop_queued_through(nonce);
            if opened {
                trace!(sender = %hex::encode(sender), nonce, "opened bucket");
            }
            inner.pending_count += 1;
            inner.queued_count = inner.queued_count.saturating_sub(overtaken.len());
            for stale in overtaken {
                inner.known.remove(&stale);
            }
            Admission::Pending
        } else {
            // account.nonce < nonce <= expected: a fee replacement.
            if let Some(popped) = popped.filter(|p| nonce <= *p) {
                return Err(TxPoolError::StaleNonce {
                    got: nonce,
                    committed: popped,
                });
            }
            let Some(txs) = inner.senders.get_mut(&sender) else {
                return Err(TxPoolError::StaleNonce {
                    got: nonce,
                    committed: expected,
                });
            };
            match txs.replace_pending(pooled) {
                Replacement::Replaced(previous) => {
                    inner.known.remove(&previous.hash);
                    Admission::Replaced {
                        previous: previous.hash,
                    }
                }
                Replacement::Underpriced { existing } => {
                    return Err(TxPoolError::FeeTooLow {
                        offered,
                        required: existing,
                    })
                }
                Replacement::Missing => {
                    return Err(TxPoolError::StaleNonce {
                        got: nonce,
                        committed: expected,
                    })
                }
            }
        };

        inner.known.insert(hash);
        inner.rerank(&sender);
        debug!(
            tx = %hex::encode(hash),
            sender = %hex::encode(sender),
            nonce,
            ?admission,
            "transaction admitted"
        );
        Ok(admission)
    }

    /// Removes and returns the best executable transaction across all senders.
    pub fn pop(&self) -> Option<Arc<Transaction>> {
        let mut inner = self.inner.lock();
        let best = inner.ranked.pop_first()?;
        let pooled = {
            let txs = inner.senders.get_mut(&best.sender)?;
            txs.ranked = None;
            txs.pop_head()?
        };
        inner.known.remove(&pooled.hash);
        inner.pending_count = inner.pending_count.saturating_sub(1);
        inner.rerank(&best.sender);
        trace!(
            tx = %hex::encode(pooled.hash),
            nonce = pooled.nonce(),
            gas_price = pooled.gas_price(),
            "popped transaction"
        );
        Some(pooled.tx)
    }

    /// Repoints the pool's view of committed state and drops what it makes
    /// obsolete: transactions at or below their sender's committed nonce, and
    /// pending chains that no longer start right after it.
    pub fn set_root(&self, root: &Sha256Hash) -> Result<(), TxPoolError> {
        self.state.set_root(root)?;

        let mut inner = self.inner.lock();
        let addresses: Vec<Address> = inner.senders.keys().copied().collect();
        let mut dropped = 0usize;
        for address in addresses {
            let account = self.state.load(&address)?;
            let Some(txs) = inner.senders.get_mut(&address) else {
                continue;
            };
            let removed = match account {
                Some(account) => txs.reconcile(account.nonce),
                None => txs.clear(),
            };
            dropped += removed.len();
            for hash in removed {
                inner.known.remove(&hash);
            }
            inner.rerank(&address);
        }
        inner.senders.retain(|_, txs| !txs.is_idle());
        inner.update_counts();

        if dropped > 0 {
            debug!(root = %hex::encode(root), dropped, "pool reconciled with committed state");
        }
        if inner.pending_count == 0 && inner.queued_count > 0 {
            warn!(queued = inner.queued_count, "only queued transactions remain");
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending_count
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().queued_count
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.pending_count + inner.queued_count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, hash: &Sha256Hash) -> bool {
        self.inner.lock().known.contains(hash)
    }

    /// Pending transactions of `sender` in the order they would be popped.
    pub fn pending_for(&self, sender: &Address) -> Vec<Arc<Transaction>> {
        let inner = self.inner.lock();
        inner
            .senders
            .get(sender)
            .map(|txs| txs.pending().map(|p| p.tx.clone()).collect())
            .unwrap_or_default()
    }

    /// Queued transactions of `sender`, ascending by nonce.
    pub fn queued_for(&self, sender: &Address) -> Vec<Arc<Transaction>> {
        let inner = self.inner.lock();
        inner
            .senders
            .get(sender)
            .map(|txs| txs.queued().map(|p| p.tx.clone()).collect())
            .unwrap_or_default()
    }

    pub fn bucket_count(&self, sender: &Address) -> usize {
        self.inner
            .lock()
            .senders
            .get(sender)
            .map_or(0, SenderTxs::bucket_count)
    }
}

impl TxSource for TransactionPool {
    fn pop(&self) -> Option<Arc<Transaction>> {
        TransactionPool::pop(self)
    }
}
