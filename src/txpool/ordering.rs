//! Per-sender chains and the cross-sender priority key.

use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::crypto::{Address, Sha256Hash};
use crate::transaction::Transaction;

/// A transaction held by the pool together with its derived metadata.
#[derive(Debug, Clone)]
pub struct PooledTx {
    pub tx: Arc<Transaction>,
    pub hash: Sha256Hash,
    pub sender: Address,
    /// Arrival ticket, used to break gas price ties first-come first-served.
    pub seq: u64,
}

impl PooledTx {
    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }

    pub fn gas_price(&self) -> u64 {
        self.tx.gas_price
    }
}

/// Ordering key of a sender's head transaction in the cross-sender index.
///
/// Sorts by descending gas price, then by arrival, then by address, so the
/// first element of a `BTreeSet<Priority>` is the next transaction to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority {
    pub gas_price: Reverse<u64>,
    pub seq: u64,
    pub sender: Address,
}

impl Priority {
    pub fn of(tx: &PooledTx) -> Self {
        Priority {
            gas_price: Reverse(tx.gas_price()),
            seq: tx.seq,
            sender: tx.sender,
        }
    }
}

/// A nonce-contiguous run of one sender's pending transactions.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    txs: VecDeque<PooledTx>,
}

impl Bucket {
    fn with(tx: PooledTx) -> Self {
        let mut txs = VecDeque::new();
        txs.push_back(tx);
        Bucket { txs }
    }

    pub fn len(&self) -> usize {
        self.txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty()
    }

    pub fn head(&self) -> Option<&PooledTx> {
        self.txs.front()
    }

    pub fn tail(&self) -> Option<&PooledTx> {
        self.txs.back()
    }

    /// Gas price the bucket competes with: that of its head.
    pub fn gas_price(&self) -> u64 {
        self.head().map_or(0, PooledTx::gas_price)
    }

    fn position(&self, nonce: u64) -> Option<usize> {
        let first = self.head()?.nonce();
        let idx = usize::try_from(nonce.checked_sub(first)?).ok()?;
        (idx < self.txs.len()).then_some(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PooledTx> {
        self.txs.iter()
    }
}

/// Outcome of trying to replace a pending transaction.
#[derive(Debug)]
pub enum Replacement {
    Replaced(PooledTx),
    Underpriced { existing: u64 },
    Missing,
}

/// Everything the pool holds for one sender.
///
/// `buckets` hold the executable chain, consecutive nonces across bucket
/// boundaries. `queued` holds transactions beyond a nonce gap; they are never
/// promoted into `buckets`.
#[derive(Debug, Default)]
pub struct SenderTxs {
    buckets: VecDeque<Bucket>,
    queued: BTreeMap<u64, PooledTx>,
    /// Highest nonce already handed out by `pop` since the last state update.
    pub popped_nonce: Option<u64>,
    /// Key under which the head is currently indexed, if any.
    pub ranked: Option<Priority>,
}

impl SenderTxs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<&PooledTx> {
        self.buckets.front().and_then(Bucket::head)
    }

    pub fn tail_nonce(&self) -> Option<u64> {
        self.buckets.back().and_then(Bucket::tail).map(PooledTx::nonce)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn pending_len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// True when no transaction is held and no popped nonce is remembered.
    pub fn is_idle(&self) -> bool {
        self.buckets.is_empty() && self.queued.is_empty() && self.popped_nonce.is_none()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PooledTx> {
        self.buckets.iter().flat_map(Bucket::iter)
    }

    pub fn queued(&self) -> impl Iterator<Item = &PooledTx> {
        self.queued.values()
    }

    /// Appends the next executable transaction. It extends the last bucket
    /// unless its price drops below that bucket's tail, in which case it opens
    /// a new bucket. Returns true if a bucket was opened.
    pub fn push_pending(&mut self, tx: PooledTx) -> bool {
        match self.buckets.back_mut() {
            Some(last) if last.tail().map_or(true, |t| tx.gas_price() >= t.gas_price()) => {
                last.txs.push_back(tx);
                false
            }
            _ => {
                self.buckets.push_back(Bucket::with(tx));
                true
            }
        }
    }

    /// Replaces the pending transaction with the same nonce when `tx` pays at
    /// least as much. The replacement inherits the arrival ticket of the
    /// transaction it displaces.
    pub fn replace_pending(&mut self, mut tx: PooledTx) -> Replacement {
        let nonce = tx.nonce();
        for bucket in self.buckets.iter_mut() {
            if let Some(idx) = bucket.position(nonce) {
                let existing = bucket.txs[idx].gas_price();
                if tx.gas_price() < existing {
                    return Replacement::Underpriced { existing };
                }
                tx.seq = bucket.txs[idx].seq;
                let old = std::mem::replace(&mut bucket.txs[idx], tx);
                return Replacement::Replaced(old);
            }
        }
        Replacement::Missing
    }

    /// Queues a future transaction, replacing a queued one with the same nonce
    /// when `tx` pays at least as much.
    pub fn insert_queued(&mut self, tx: PooledTx) -> Result<Option<PooledTx>, u64> {
        match self.queued.get(&tx.nonce()) {
            Some(existing) if tx.gas_price() < existing.gas_price() => Err(existing.gas_price()),
            _ => Ok(self.queued.insert(tx.nonce(), tx)),
        }
    }

    pub fn has_queued(&self, nonce: u64) -> bool {
        self.queued.contains_key(&nonce)
    }

    pub fn is_queued(&self, nonce: u64, hash: &Sha256Hash) -> bool {
        self.queued.get(&nonce).map_or(false, |tx| tx.hash == *hash)
    }

    /// Removes the queued entry at `nonce` if it is exactly `hash`.
    pub fn take_queued(&mut self, nonce: u64, hash: &Sha256Hash) -> Option<PooledTx> {
        match self.queued.get(&nonce) {
            Some(tx) if tx.hash == *hash => self.queued.remove(&nonce),
            _ => None,
        }
    }

    /// Drops queued entries the pending chain has already reached.
    pub fn drop_queued_through(&mut self, nonce: u64) -> Vec<Sha256Hash> {
        let mut removed = Vec::new();
        while let Some(entry) = self.queued.first_entry() {
            if *entry.key() > nonce {
                break;
            }
            removed.push(entry.remove().hash);
        }
        removed
    }

    /// Removes the head of the first bucket and discards the bucket if it
    /// becomes empty.
    pub fn pop_head(&mut self) -> Option<PooledTx> {
        let first = self.buckets.front_mut()?;
        let tx = first.txs.pop_front()?;
        if first.is_empty() {
            self.buckets.pop_front();
        }
        self.popped_nonce = Some(tx.nonce());
        Some(tx)
    }

    /// Reconciles with a sender nonce read from committed state.
    ///
    /// Drops every transaction at or below `committed`, forgets the popped
    /// nonce, and drops the pending chain entirely if it no longer starts at
    /// `committed + 1`. Returns the hashes removed.
    pub fn reconcile(&mut self, committed: u64) -> Vec<Sha256Hash> {
        let mut removed = Vec::new();
        self.popped_nonce = None;

        for bucket in self.buckets.iter_mut() {
            while bucket.head().map_or(false, |tx| tx.nonce() <= committed) {
                if let Some(tx) = bucket.txs.pop_front() {
                    removed.push(tx.hash);
                }
            }
        }
        self.buckets.retain(|bucket| !bucket.is_empty());

        let contiguous = self
            .head()
            .map_or(true, |head| Some(head.nonce()) == committed.checked_add(1));
        if !contiguous {
            removed.extend(self.buckets.drain(..).flat_map(|b| b.txs).map(|tx| tx.hash));
        }

        let stale: Vec<u64> = self.queued.range(..=committed).map(|(nonce, _)| *nonce).collect();
        for nonce in stale {
            if let Some(tx) = self.queued.remove(&nonce) {
                removed.push(tx.hash);
            }
        }
        removed
    }

    /// Removes everything, returning the hashes that were held.
    pub fn clear(&mut self) -> Vec<Sha256Hash> {
        self.popped_nonce = None;
        let mut removed: Vec<Sha256Hash> =
            self.buckets.drain(..).flat_map(|b| b.txs).map(|tx| tx.hash).collect();
        removed.extend(std::mem::take(&mut self.queued).into_values().map(|tx| tx.hash));
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::address_from_string;

    fn pooled(nonce: u64, gas_price: u64, seq: u64) -> PooledTx {
        let tx = Transaction::new(address_from_string("to"), nonce, 0, 21_000, gas_price, Vec::new());
        PooledTx {
            hash: tx.hash(),
            tx: Arc::new(tx),
            sender: address_from_string("sender"),
            seq,
        }
    }

    #[test]
    fn priority_prefers_higher_price_then_earlier_arrival() {
        let cheap = Priority::of(&pooled(1, 1, 0));
        let rich = Priority::of(&pooled(1, 9, 5));
        let rich_late = Priority::of(&pooled(1, 9, 6));

        assert!(rich < cheap);
        assert!(rich < rich_late);
    }

    #[test]
    fn price_drop_opens_new_bucket() {
        let mut sender = SenderTxs::new();
        assert!(sender.push_pending(pooled(1, 5, 0)));
        assert!(!sender.push_pending(pooled(2, 5, 1)));
        assert!(!sender.push_pending(pooled(3, 8, 2)));
        assert!(sender.push_pending(pooled(4, 2, 3)));

        assert_eq!(sender.bucket_count(), 2);
        assert_eq!(sender.pending_len(), 4);
        assert_eq!(sender.tail_nonce(), Some(4));
    }

    #[test]
    fn pop_head_follows_nonce_order_and_discards_empty_buckets() {
        let mut sender = SenderTxs::new();
        sender.push_pending(pooled(1, 5, 0));
        sender.push_pending(pooled(2, 1, 1));

        assert_eq!(sender.pop_head().map(|t| t.nonce()), Some(1));
        assert_eq!(sender.bucket_count(), 1);
        assert_eq!(sender.popped_nonce, Some(1));
        assert_eq!(sender.pop_head().map(|t| t.nonce()), Some(2));
        assert_eq!(sender.bucket_count(), 0);
        assert!(sender.pop_head().is_none());
    }

    #[test]
    fn replace_pending_requires_equal_or_higher_price() {
        let mut sender = SenderTxs::new();
        sender.push_pending(pooled(1, 5, 0));
        sender.push_pending(pooled(2, 5, 1));

        assert!(matches!(
            sender.replace_pending(pooled(2, 4, 2)),
            Replacement::Underpriced { existing: 5 }
        ));
        assert!(matches!(sender.replace_pending(pooled(2, 5, 3)), Replacement::Replaced(_)));
        assert!(matches!(sender.replace_pending(pooled(9, 5, 4)), Replacement::Missing));
    }

    #[test]
    fn reconcile_drops_confirmed_and_broken_chains() {
        let mut sender = SenderTxs::new();
        sender.push_pending(pooled(3, 5, 0));
        sender.push_pending(pooled(4, 5, 1));
        sender.insert_queued(pooled(7, 1, 2)).unwrap();
        sender.popped_nonce = Some(2);

        // Nonce 3 landed: 4 is next and the chain still lines up.
        assert_eq!(sender.reconcile(3).len(), 1);
        assert_eq!(sender.head().map(|t| t.nonce()), Some(4));
        assert_eq!(sender.popped_nonce, None);

        // Committed state went back to 1: the chain no longer starts at 2.
        assert_eq!(sender.reconcile(1).len(), 1);
        assert_eq!(sender.pending_len(), 0);
        assert_eq!(sender.queued_len(), 1);
    }

    #[test]
    fn replacement_keeps_arrival_ticket() {
        let mut sender = SenderTxs::new();
        sender.push_pending(pooled(1, 5, 3));
        assert!(matches!(sender.replace_pending(pooled(1, 6, 9)), Replacement::Replaced(_)));
        assert_eq!(sender.head().map(|t| (t.gas_price(), t.seq)), Some((6, 3)));
    }

    #[test]
    fn queued_entries_can_be_taken_or_overtaken() {
        let mut sender = SenderTxs::new();
        let first = pooled(4, 1, 0);
        let hash = first.hash;
        sender.insert_queued(first).unwrap();
        sender.insert_queued(pooled(6, 1, 1)).unwrap();
        sender.insert_queued(pooled(9, 1, 2)).unwrap();

        assert!(sender.take_queued(4, &[0u8; 32]).is_none());
        assert_eq!(sender.take_queued(4, &hash).map(|t| t.nonce()), Some(4));
        assert_eq!(sender.drop_queued_through(6).len(), 1);
        assert_eq!(sender.queued().map(PooledTx::nonce).collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn queued_replacement_respects_price() {
        let mut sender = SenderTxs::new();
        assert!(sender.insert_queued(pooled(5, 3, 0)).unwrap().is_none());
        assert_eq!(sender.insert_queued(pooled(5, 2, 1)).unwrap_err(), 3);
        assert!(sender.insert_queued(pooled(5, 3, 2)).unwrap().is_some());
        assert!(sender.has_queued(5));
    }
}
