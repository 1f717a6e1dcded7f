use crate::crypto::{Address, Sha256Hash};
use crate::error::ChainError;
use crate::persistence::Persistence;
use crate::transaction::{Receipt, Transaction};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::validation::{valid_hash, validate_body};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Header {
    pub parent_hash: Sha256Hash,
    pub state_root: Sha256Hash,
    pub height: u64,
    pub coinbase: Address,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Proof-of-work counter.
    pub nonce: u64,
    /// Required count of leading zero bits in [`Header::hash`].
    pub difficulty: u64,
}

impl Header {
    pub fn genesis(state_root: Sha256Hash) -> Self {
        Header {
            parent_hash: [0u8; 32],
            state_root,
            height: 0,
            coinbase: [0u8; 32],
            timestamp: 0,
            nonce: 0,
            difficulty: 0,
        }
    }

    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.parent_hash);
        hasher.update(self.state_root);
        hasher.update(self.height.to_le_bytes());
        hasher.update(self.coinbase);
        hasher.update(self.timestamp.to_le_bytes());
        hasher.update(self.nonce.to_le_bytes());
        hasher.update(self.difficulty.to_le_bytes());
        hasher.finalize().into()
    }

    pub fn meets_difficulty(&self) -> bool {
        valid_hash(&self.hash(), self.difficulty)
    }
}

/// Executed transactions and their receipts, index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Body {
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}

impl Body {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tx: Transaction, receipt: Receipt) {
        self.transactions.push(tx);
        self.receipts.push(receipt);
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn successful(&self) -> usize {
        self.receipts.iter().filter(|r| r.is_success()).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SealedBlock {
    pub header: Header,
    pub body: Body,
}

impl SealedBlock {
    pub fn hash(&self) -> Sha256Hash {
        self.header.hash()
    }
}

/// The canonical sequence of sealed headers.
pub struct Blockchain {
    headers: Vec<Header>,
    persistence: Box<dyn Persistence>,
}

impl Blockchain {
    /// Starts a fresh chain whose genesis commits to `genesis_state_root`.
    pub fn new(genesis_state_root: Sha256Hash, persistence: Box<dyn Persistence>) -> Result<Self, ChainError> {
        let genesis = SealedBlock {
            header: Header::genesis(genesis_state_root),
            body: Body::new(),
        };
        persistence.save_block(&genesis)?;
        info!(hash = %hex::encode(genesis.hash()), "created genesis block");
        Ok(Blockchain {
            headers: vec![genesis.header],
            persistence,
        })
    }

    /// Restores a chain from previously saved blocks, re-checking linkage
    /// and proof of work.
    pub fn load(persistence: Box<dyn Persistence>) -> Result<Self, ChainError> {
        let blocks = persistence.load_blocks()?;
        let mut blocks = blocks.into_iter();
        let genesis = blocks
            .next()
            .ok_or_else(|| ChainError::InvalidBlock("No blocks saved".to_string()))?;
        if genesis.header.height != 0 {
            return Err(ChainError::InvalidBlock(format!(
                "First saved block has height {}",
                genesis.header.height
            )));
        }

        let mut chain = Blockchain {
            headers: vec![genesis.header],
            persistence,
        };
        for block in blocks {
            chain.check(&block)?;
            chain.headers.push(block.header);
        }
        info!(height = chain.height(), "loaded chain");
        Ok(chain)
    }

    /// Loads the saved chain, or starts a new one when nothing was saved.
    pub fn open(genesis_state_root: Sha256Hash, persistence: Box<dyn Persistence>) -> Result<Self, ChainError> {
        if persistence.load_blocks()?.is_empty() {
            Self::new(genesis_state_root, persistence)
        } else {
            Self::load(persistence)
        }
    }

    pub fn head(&self) -> &Header {
        // `new` and `load` both guarantee a genesis header.
        &self.headers[self.headers.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.head().height
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    /// Validates `block` against the head and appends it.
    pub fn append(&mut self, block: SealedBlock) -> Result<(), ChainError> {
        self.check(&block)?;
        self.persistence.save_block(&block)?;
        debug!(
            height = block.header.height,
            hash = %hex::encode(block.hash()),
            txs = block.body.len(),
            "appended block"
        );
        self.headers.push(block.header);
        Ok(())
    }

    fn check(&self, block: &SealedBlock) -> Result<(), ChainError> {
        let head = self.head();
        if block.header.height != head.height + 1 {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid block height. Expected {}, but got {}.",
                head.height + 1,
                block.header.height
            )));
        }
        let head_hash = head.hash();
        if block.header.parent_hash != head_hash {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid parent hash. Expected {}, but got {}.",
                hex::encode(head_hash),
                hex::encode(block.header.parent_hash)
            )));
        }
        if !block.header.meets_difficulty() {
            return Err(ChainError::InvalidProofOfWork);
        }
        validate_body(&block.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryPersistence;

    fn seal(mut header: Header) -> Header {
        while !header.meets_difficulty() {
            header.nonce += 1;
        }
        header
    }

    fn child_of(parent: &Header, difficulty: u64) -> Header {
        seal(Header {
            parent_hash: parent.hash(),
            state_root: [1u8; 32],
            height: parent.height + 1,
            coinbase: [2u8; 32],
            timestamp: 1_700_000_000_000,
            nonce: 0,
            difficulty,
        })
    }

    #[test]
    fn test_header_hash_covers_nonce() {
        let mut header = Header::genesis([0u8; 32]);
        let before = header.hash();
        header.nonce = 1;
        assert_ne!(before, header.hash());
    }

    #[test]
    fn test_append_sealed_block() {
        let mut chain = Blockchain::new([0u8; 32], Box::new(InMemoryPersistence::new())).unwrap();
        let header = child_of(chain.head(), 8);
        chain
            .append(SealedBlock {
                header: header.clone(),
                body: Body::new(),
            })
            .unwrap();

        assert_eq!(chain.height(), 1);
        assert_eq!(chain.head(), &header);
        assert_eq!(chain.headers().len(), 2);
    }

    #[test]
    fn test_append_rejects_bad_linkage() {
        let mut chain = Blockchain::new([0u8; 32], Box::new(InMemoryPersistence::new())).unwrap();
        let genesis = chain.head().clone();

        let mut wrong_height = child_of(&genesis, 0);
        wrong_height.height = 5;
        assert!(matches!(
            chain.append(SealedBlock { header: wrong_height, body: Body::new() }),
            Err(ChainError::InvalidBlock(_))
        ));

        let mut wrong_parent = child_of(&genesis, 0);
        wrong_parent.parent_hash = [9u8; 32];
        assert!(matches!(
            chain.append(SealedBlock { header: wrong_parent, body: Body::new() }),
            Err(ChainError::InvalidBlock(_))
        ));
        assert_eq!(chain.height(), 0);
    }

    #[test]
    fn test_append_rejects_insufficient_work() {
        let mut chain = Blockchain::new([0u8; 32], Box::new(InMemoryPersistence::new())).unwrap();
        let mut header = child_of(chain.head(), 12);
        while header.meets_difficulty() {
            header.nonce += 1;
        }
        assert!(matches!(
            chain.append(SealedBlock { header, body: Body::new() }),
            Err(ChainError::InvalidProofOfWork)
        ));
    }

    #[test]
    fn test_load_replays_saved_blocks() {
        let persistence = InMemoryPersistence::new();
        let mut chain = Blockchain::new([0u8; 32], Box::new(persistence.clone())).unwrap();
        for _ in 0..3 {
            let header = child_of(chain.head(), 4);
            chain.append(SealedBlock { header, body: Body::new() }).unwrap();
        }

        let restored = Blockchain::load(Box::new(persistence)).unwrap();
        assert_eq!(restored.height(), 3);
        assert_eq!(restored.head(), chain.head());
    }

    #[test]
    fn test_open_creates_or_loads() {
        let persistence = InMemoryPersistence::new();
        assert!(Blockchain::load(Box::new(persistence.clone())).is_err());

        let chain = Blockchain::open([3u8; 32], Box::new(persistence.clone())).unwrap();
        assert_eq!(chain.head().state_root, [3u8; 32]);

        let reopened = Blockchain::open([4u8; 32], Box::new(persistence)).unwrap();
        assert_eq!(reopened.head().state_root, [3u8; 32]);
    }
}
