//! Caching layer for recovered transaction senders
//!
//! Sender recovery is the most expensive step of both admission and
//! execution, and each transaction goes through both. The cache is keyed by
//! transaction hash, which covers the signature, so a hit is always exact.
use crate::crypto::{Address, Sha256Hash};
use crate::error::ChainError;
use crate::transaction::Transaction;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub const DEFAULT_SENDER_CACHE_SIZE: usize = 4096;

/// Thread-safe LRU of transaction hash -> recovered sender.
#[derive(Debug)]
pub struct SenderCache {
    cache: Mutex<LruCache<Sha256Hash, Address>>,
}

impl Default for SenderCache {
    fn default() -> Self {
        Self::new(DEFAULT_SENDER_CACHE_SIZE)
    }
}

impl SenderCache {
    /// Create a new LRU cache with specified capacity (0 is treated as 1).
    pub fn new(capacity: usize) -> Self {
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity_nz)),
        }
    }

    /// Returns the sender of `tx`, recovering and remembering it on a miss.
    /// Failed recoveries are not cached.
    pub fn sender(&self, tx: &Transaction) -> Result<Address, ChainError> {
        let hash = tx.hash();
        if let Some(address) = self.cache.lock().get(&hash) {
            return Ok(*address);
        }
        let address = tx.from()?;
        self.cache.lock().put(hash, address);
        Ok(address)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{address_from_string, KeyPair};

    #[test]
    fn test_sender_is_cached_after_first_recovery() {
        let cache = SenderCache::new(8);
        let keypair = KeyPair::generate().unwrap();
        let tx = Transaction::signed(&keypair, address_from_string("bob"), 1, 1, 21_000, 1);

        assert!(cache.is_empty());
        assert_eq!(cache.sender(&tx).unwrap(), keypair.address());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sender(&tx).unwrap(), keypair.address());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_recovery_not_cached() {
        let cache = SenderCache::new(8);
        let tx = Transaction::new(address_from_string("bob"), 1, 1, 21_000, 1, Vec::new());
        assert!(cache.sender(&tx).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_becomes_one() {
        let cache = SenderCache::new(0);
        assert_eq!(cache.capacity(), 1);

        let keypair = KeyPair::generate().unwrap();
        let first = Transaction::signed(&keypair, address_from_string("bob"), 1, 1, 21_000, 1);
        let second = Transaction::signed(&keypair, address_from_string("bob"), 2, 1, 21_000, 1);
        cache.sender(&first).unwrap();
        cache.sender(&second).unwrap();
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
