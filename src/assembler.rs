//! Block assembly: open a block on the chain head, pack it from the pool in
//! the background, then seal it with proof of work.
//!
//! ```text
//! Idle|Sealed --open--> Opened --pack--> Packing --finalize--> Sealed
//!                          \---------------finalize-----------/
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::blockchain::{valid_hash, Blockchain, Body, Header, SealedBlock};
use crate::crypto::Address;
use crate::error::{AssemblyError, StateError};
use crate::executor::StateMachine;
use crate::state::StateDb;
use crate::txpool::TxSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    pub coinbase: Address,
    /// Leading zero bits required of a sealed header hash.
    pub difficulty: u64,
    /// Upper bound on how long a packing task keeps drawing from the pool.
    pub pack_duration: Duration,
    /// How long the packing task sleeps when the pool is empty.
    pub idle_backoff: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        AssemblerConfig {
            coinbase: [0u8; 32],
            difficulty: 8,
            pack_duration: Duration::from_secs(2),
            idle_backoff: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Idle,
    Opened,
    Packing,
    Sealed,
}

impl AssemblerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssemblerState::Idle => "idle",
            AssemblerState::Opened => "opened",
            AssemblerState::Packing => "packing",
            AssemblerState::Sealed => "sealed",
        }
    }
}

impl std::fmt::Display for AssemblerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle that stops a running packing task early.
///
/// Cloneable and safe to fire any number of times, including after the task
/// has already finished.
#[derive(Debug, Clone, Default)]
pub struct Interrupter {
    token: CancellationToken,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.token.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }
}

enum Stage {
    Idle,
    Opened {
        header: Header,
    },
    Packing {
        header: Header,
        interrupter: Interrupter,
        task: JoinHandle<Result<Body, StateError>>,
    },
    Sealed,
}

impl Stage {
    fn state(&self) -> AssemblerState {
        match self {
            Stage::Idle => AssemblerState::Idle,
            Stage::Opened { .. } => AssemblerState::Opened,
            Stage::Packing { .. } => AssemblerState::Packing,
            Stage::Sealed => AssemblerState::Sealed,
        }
    }
}

pub struct BlockAssembler {
    pool: Arc<dyn TxSource>,
    state: Arc<dyn StateDb>,
    machine: Arc<dyn StateMachine>,
    chain: Arc<RwLock<Blockchain>>,
    config: AssemblerConfig,
    stage: Stage,
}

impl BlockAssembler {
    pub fn new(
        pool: Arc<dyn TxSource>,
        state: Arc<dyn StateDb>,
        machine: Arc<dyn StateMachine>,
        chain: Arc<RwLock<Blockchain>>,
        config: AssemblerConfig,
    ) -> Self {
        BlockAssembler {
            pool,
            state,
            machine,
            chain,
            config,
            stage: Stage::Idle,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.stage.state()
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    fn wrong_state(&self, expected: &'static str) -> AssemblyError {
        AssemblyError::InvalidState {
            expected,
            actual: self.state().as_str(),
        }
    }

    /// Starts a new block on top of the current chain head.
    pub fn open(&mut self) -> Result<(), AssemblyError> {
        if !matches!(self.stage, Stage::Idle | Stage::Sealed) {
            return Err(self.wrong_state("idle or sealed"));
        }
        let header = {
            let chain = self.chain.read();
            let head = chain.head();
            Header {
                parent_hash: head.hash(),
                state_root: [0u8; 32],
                height: head.height + 1,
                coinbase: self.config.coinbase,
                timestamp: 0,
                nonce: 0,
                difficulty: self.config.difficulty,
            }
        };
        info!(height = header.height, parent = %hex::encode(header.parent_hash), "opened block");
        self.stage = Stage::Opened { header };
        Ok(())
    }

    /// Spawns the packing task on the current tokio runtime.
    ///
    /// The task executes pool transactions in pop order until it is
    /// interrupted or `pack_duration` has elapsed.
    pub fn pack(&mut self) -> Result<Interrupter, AssemblyError> {
        if !matches!(self.stage, Stage::Opened { .. }) {
            return Err(self.wrong_state("opened"));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| AssemblyError::Join(e.to_string()))?;
        let Stage::Opened { header } = std::mem::replace(&mut self.stage, Stage::Idle) else {
            return Err(self.wrong_state("opened"));
        };

        let interrupter = Interrupter::default();
        let packer = Packer {
            pool: self.pool.clone(),
            state: self.state.clone(),
            machine: self.machine.clone(),
            token: interrupter.token.clone(),
            deadline: Instant::now() + self.config.pack_duration,
            idle_backoff: self.config.idle_backoff,
        };
        let task = runtime.spawn(packer.run());
        debug!(height = header.height, "packing started");

        self.stage = Stage::Packing {
            header,
            interrupter: interrupter.clone(),
            task,
        };
        Ok(interrupter)
    }

    /// Stops the packing task if one is running. Never blocks.
    pub fn interrupt(&self) {
        if let Stage::Packing { interrupter, .. } = &self.stage {
            interrupter.interrupt();
        }
    }

    /// Waits for packing to end, then stamps and seals the block.
    ///
    /// Without a prior interrupt this waits for the packing deadline.
    pub async fn finalize(&mut self) -> Result<SealedBlock, AssemblyError> {
        if !matches!(self.stage, Stage::Opened { .. } | Stage::Packing { .. }) {
            return Err(self.wrong_state("opened or packing"));
        }
        let (mut header, body) = match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Opened { header } => (header, Body::new()),
            Stage::Packing { header, task, .. } => {
                let body = task.await.map_err(|e| AssemblyError::Join(e.to_string()))??;
                (header, body)
            }
            other => {
                self.stage = other;
                return Err(self.wrong_state("opened or packing"));
            }
        };

        header.timestamp = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        header.difficulty = self.config.difficulty;
        header.state_root = self.state.root();

        let difficulty = header.difficulty;
        let header = tokio::task::spawn_blocking(move || seal(header))
            .await
            .map_err(|e| AssemblyError::Join(e.to_string()))?
            .ok_or(AssemblyError::NonceSpaceExhausted(difficulty))?;

        info!(
            height = header.height,
            hash = %hex::encode(header.hash()),
            nonce = header.nonce,
            txs = body.len(),
            succeeded = body.successful(),
            "sealed block"
        );
        self.stage = Stage::Sealed;
        Ok(SealedBlock { header, body })
    }
}

/// Searches nonces from zero until the header hash meets its difficulty.
pub fn seal(mut header: Header) -> Option<Header> {
    for nonce in 0..=u64::MAX {
        header.nonce = nonce;
        if valid_hash(&header.hash(), header.difficulty) {
            return Some(header);
        }
    }
    None
}

struct Packer {
    pool: Arc<dyn TxSource>,
    state: Arc<dyn StateDb>,
    machine: Arc<dyn StateMachine>,
    token: CancellationToken,
    deadline: Instant,
    idle_backoff: Duration,
}

impl Packer {
    async fn run(self) -> Result<Body, StateError> {
        let mut body = Body::new();
        while !self.token.is_cancelled() && Instant::now() < self.deadline {
            match self.pool.pop() {
                Some(tx) => {
                    let receipt = self.machine.execute(self.state.as_ref(), &tx)?;
                    trace!(tx = %hex::encode(receipt.tx_hash), ok = receipt.is_success(), "packed");
                    body.push(Arc::unwrap_or_clone(tx), receipt);
                    tokio::task::yield_now().await;
                }
                None => {
                    let wake = (Instant::now() + self.idle_backoff).min(self.deadline);
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep_until(wake) => {}
                    }
                }
            }
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{address_from_string, KeyPair};
    use crate::executor::TransferMachine;
    use crate::persistence::InMemoryPersistence;
    use crate::state::{Account, MemoryState};
    use crate::transaction::Transaction;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct QueueSource(parking_lot::Mutex<VecDeque<Arc<Transaction>>>);

    impl QueueSource {
        fn push(&self, tx: Transaction) {
            self.0.lock().push_back(Arc::new(tx));
        }
    }

    impl TxSource for QueueSource {
        fn pop(&self) -> Option<Arc<Transaction>> {
            self.0.lock().pop_front()
        }
    }

    struct Fixture {
        source: Arc<QueueSource>,
        state: Arc<MemoryState>,
        assembler: BlockAssembler,
        key: KeyPair,
    }

    fn fixture(pack_duration: Duration) -> Fixture {
        let key = KeyPair::generate().unwrap();
        let state = Arc::new(MemoryState::with_accounts([(key.address(), Account::new(0, 1_000_000))]).unwrap());
        let chain = Blockchain::new(state.root(), Box::new(InMemoryPersistence::new())).unwrap();
        let source = Arc::new(QueueSource::default());
        let config = AssemblerConfig {
            coinbase: address_from_string("miner"),
            difficulty: 4,
            pack_duration,
            idle_backoff: Duration::from_millis(5),
        };
        let assembler = BlockAssembler::new(
            source.clone(),
            state.clone(),
            Arc::new(TransferMachine::new()),
            Arc::new(RwLock::new(chain)),
            config,
        );
        Fixture {
            source,
            state,
            assembler,
            key,
        }
    }

    fn transfer(key: &KeyPair, nonce: u64) -> Transaction {
        Transaction::signed(key, address_from_string("bob"), nonce, 10, 21_000, 1)
    }

    #[tokio::test]
    async fn test_pack_and_seal() {
        let mut f = fixture(Duration::from_secs(5));
        for nonce in 1..=3 {
            f.source.push(transfer(&f.key, nonce));
        }

        f.assembler.open().unwrap();
        let interrupter = f.assembler.pack().unwrap();
        assert_eq!(f.assembler.state(), AssemblerState::Packing);
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupter.interrupt();
        let block = f.assembler.finalize().await.unwrap();

        assert_eq!(f.assembler.state(), AssemblerState::Sealed);
        let nonces: Vec<u64> = block.body.transactions.iter().map(|tx| tx.nonce).collect();
        assert_eq!(nonces, vec![1, 2, 3]);
        assert_eq!(block.body.successful(), 3);
        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.state_root, f.state.root());
        assert!(block.header.meets_difficulty());
        assert_eq!(f.state.load(&f.key.address()).unwrap().unwrap().nonce, 3);
    }

    #[tokio::test]
    async fn test_failed_execution_is_still_packed() {
        let mut f = fixture(Duration::from_secs(5));
        f.source.push(transfer(&f.key, 2));
        f.source.push(transfer(&f.key, 1));

        f.assembler.open().unwrap();
        let interrupter = f.assembler.pack().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupter.interrupt();
        let block = f.assembler.finalize().await.unwrap();

        let statuses: Vec<bool> = block.body.receipts.iter().map(|r| r.is_success()).collect();
        assert_eq!(statuses, vec![false, true]);
        assert_eq!(block.body.receipts[0].tx_hash, block.body.transactions[0].hash());
    }

    #[tokio::test]
    async fn test_late_submissions_are_picked_up() {
        let mut f = fixture(Duration::from_secs(5));
        f.assembler.open().unwrap();
        let interrupter = f.assembler.pack().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        f.source.push(transfer(&f.key, 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupter.interrupt();

        let block = f.assembler.finalize().await.unwrap();
        assert_eq!(block.body.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_ends_packing() {
        let mut f = fixture(Duration::from_millis(30));
        f.assembler.open().unwrap();
        let interrupter = f.assembler.pack().unwrap();

        let started = std::time::Instant::now();
        let block = f.assembler.finalize().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(block.body.is_empty());
        assert!(!interrupter.is_interrupted());

        // Packing already stopped on its own; a late interrupt changes nothing.
        interrupter.interrupt();
        f.assembler.interrupt();
        assert!(interrupter.is_interrupted());
        assert_eq!(f.assembler.state(), AssemblerState::Sealed);
        assert!(f.assembler.open().is_ok());
    }

    #[tokio::test]
    async fn test_interrupt_is_idempotent() {
        let mut f = fixture(Duration::from_secs(5));
        f.assembler.interrupt();

        f.assembler.open().unwrap();
        let interrupter = f.assembler.pack().unwrap();
        interrupter.interrupt();
        interrupter.interrupt();
        f.assembler.interrupt();
        f.assembler.finalize().await.unwrap();

        interrupter.interrupt();
        f.assembler.interrupt();
        assert!(interrupter.is_interrupted());
    }

    #[tokio::test]
    async fn test_finalize_without_packing_seals_empty_block() {
        let mut f = fixture(Duration::from_secs(5));
        f.assembler.open().unwrap();
        let block = f.assembler.finalize().await.unwrap();
        assert!(block.body.is_empty());
        assert!(block.header.meets_difficulty());
    }

    #[tokio::test]
    async fn test_wrong_state_calls_rejected() {
        let mut f = fixture(Duration::from_secs(5));
        assert!(matches!(
            f.assembler.pack(),
            Err(AssemblyError::InvalidState { actual: "idle", .. })
        ));
        assert!(f.assembler.finalize().await.is_err());

        f.assembler.open().unwrap();
        assert!(f.assembler.open().is_err());
        let interrupter = f.assembler.pack().unwrap();
        assert!(matches!(f.assembler.pack(), Err(AssemblyError::InvalidState { actual: "packing", .. })));
        interrupter.interrupt();
        f.assembler.finalize().await.unwrap();

        assert!(f.assembler.finalize().await.is_err());
        assert!(f.assembler.open().is_ok());
    }

    #[test]
    fn test_seal_finds_valid_nonce() {
        let mut header = Header::genesis([5u8; 32]);
        header.difficulty = 10;
        let sealed = seal(header).unwrap();
        assert!(valid_hash(&sealed.hash(), 10));
    }
}
