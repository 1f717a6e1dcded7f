//! Account state storage.
//!
//! [`StateDb`] is the narrow interface the pool and executor consume. Accounts
//! are stored encoded, keyed by address, and the whole store is summarized by
//! a content-derived root. [`MemoryState`] keeps committed snapshots by root so
//! a reader can be repointed with [`StateDb::set_root`].

use crate::crypto::{Address, Sha256Hash};
use crate::error::StateError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: u64,
}

impl Account {
    pub fn new(nonce: u64, balance: u64) -> Self {
        Account { nonce, balance }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        bincode::serialize(self).map_err(|e| StateError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StateError> {
        bincode::deserialize(bytes).map_err(|e| StateError::Codec(e.to_string()))
    }
}

/// Abstraction over the committed account store.
pub trait StateDb: Send + Sync {
    /// Reads an account; `Ok(None)` when the address was never stored.
    fn load(&self, address: &Address) -> Result<Option<Account>, StateError>;

    fn store(&self, address: &Address, account: Account) -> Result<(), StateError>;

    /// Digest over every stored account, including uncommitted writes.
    fn root(&self) -> Sha256Hash;

    /// Repoints the store onto a previously committed snapshot.
    fn set_root(&self, root: &Sha256Hash) -> Result<(), StateError>;

    /// Records the current contents as a snapshot and returns its root.
    fn commit(&self) -> Result<Sha256Hash, StateError>;
}

type Entries = BTreeMap<Address, Vec<u8>>;

fn entries_root(entries: &Entries) -> Sha256Hash {
    let mut hasher = Sha256::new();
    for (address, value) in entries {
        hasher.update(address);
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value);
    }
    hasher.finalize().into()
}

/// Committed snapshots kept by a [`MemoryState`] unless configured otherwise.
pub const DEFAULT_SNAPSHOT_RETENTION: usize = 64;

#[derive(Debug)]
struct Inner {
    working: Entries,
    snapshots: HashMap<Sha256Hash, Entries>,
    /// Snapshot roots, least recently committed first.
    order: VecDeque<Sha256Hash>,
    retention: usize,
}

impl Inner {
    fn remember(&mut self, root: Sha256Hash, entries: Entries) {
        if self.snapshots.insert(root, entries).is_some() {
            self.order.retain(|r| *r != root);
        }
        self.order.push_back(root);
        while self.order.len() > self.retention {
            if let Some(oldest) = self.order.pop_front() {
                self.snapshots.remove(&oldest);
            }
        }
    }
}

/// In-memory state store with root-addressed snapshots.
#[derive(Debug)]
pub struct MemoryState {
    inner: RwLock<Inner>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    /// Creates an empty store whose empty root is already committed.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_SNAPSHOT_RETENTION)
    }

    /// Like [`MemoryState::new`], keeping only the `retention` most recently
    /// committed snapshots (at least one).
    pub fn with_retention(retention: usize) -> Self {
        let mut inner = Inner {
            working: Entries::new(),
            snapshots: HashMap::new(),
            order: VecDeque::new(),
            retention: retention.max(1),
        };
        inner.remember(entries_root(&inner.working), Entries::new());
        MemoryState {
            inner: RwLock::new(inner),
        }
    }

    /// Creates a store holding `accounts`, committed as its first snapshot.
    pub fn with_accounts<I>(accounts: I) -> Result<Self, StateError>
    where
        I: IntoIterator<Item = (Address, Account)>,
    {
        let state = Self::new();
        for (address, account) in accounts {
            state.store(&address, account)?;
        }
        state.commit()?;
        Ok(state)
    }

    pub fn len(&self) -> usize {
        self.inner.read().working.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_snapshot(&self, root: &Sha256Hash) -> bool {
        self.inner.read().snapshots.contains_key(root)
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.read().snapshots.len()
    }
}

impl StateDb for MemoryState {
    fn load(&self, address: &Address) -> Result<Option<Account>, StateError> {
        let inner = self.inner.read();
        inner
            .working
            .get(address)
            .map(|bytes| Account::decode(bytes))
            .transpose()
    }

    fn store(&self, address: &Address, account: Account) -> Result<(), StateError> {
        let bytes = account.encode()?;
        self.inner.write().working.insert(*address, bytes);
        Ok(())
    }

    fn root(&self) -> Sha256Hash {
        entries_root(&self.inner.read().working)
    }

    fn set_root(&self, root: &Sha256Hash) -> Result<(), StateError> {
        let mut inner = self.inner.write();
        let snapshot = inner
            .snapshots
            .get(root)
            .cloned()
            .ok_or_else(|| StateError::UnknownRoot(hex::encode(root)))?;
        inner.working = snapshot;
        Ok(())
    }

    fn commit(&self) -> Result<Sha256Hash, StateError> {
        let mut inner = self.inner.write();
        let root = entries_root(&inner.working);
        let snapshot = inner.working.clone();
        inner.remember(root, snapshot);
        Ok(root)
    }
}
