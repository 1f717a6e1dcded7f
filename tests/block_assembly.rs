//! Integration tests for assembling, sealing and persisting blocks

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tempfile::TempDir;

use quarrychain::assembler::{AssemblerConfig, AssemblerState, BlockAssembler};
use quarrychain::blockchain::Blockchain;
use quarrychain::crypto::{address_from_string, KeyPair};
use quarrychain::executor::TransferMachine;
use quarrychain::persistence::{Database, InMemoryPersistence};
use quarrychain::state::{Account, MemoryState, StateDb};
use quarrychain::transaction::{Transaction, TRANSFER_GAS};
use quarrychain::txpool::{PoolConfig, TransactionPool};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn config() -> AssemblerConfig {
    AssemblerConfig {
        coinbase: address_from_string("miner"),
        difficulty: 6,
        pack_duration: Duration::from_secs(5),
        idle_backoff: Duration::from_millis(5),
    }
}

fn db_path(dir: &TempDir) -> String {
    dir.path().join("chain.db").to_string_lossy().into_owned()
}

#[tokio::test]
async fn test_assemble_append_and_reload() -> TestResult {
    let dir = TempDir::new()?;
    let path = db_path(&dir);

    let alice = KeyPair::generate()?;
    let state = Arc::new(MemoryState::with_accounts([(alice.address(), Account::new(0, 1_000_000))])?);
    let chain = Arc::new(RwLock::new(Blockchain::new(state.root(), Box::new(Database::open(&path)?))?));
    let pool = Arc::new(TransactionPool::new(state.clone(), PoolConfig::default()));
    let mut assembler = BlockAssembler::new(
        pool.clone(),
        state.clone(),
        Arc::new(TransferMachine::new()),
        chain.clone(),
        config(),
    );

    let mut nonce = 0;
    for round in 0..2 {
        for _ in 0..3 {
            nonce += 1;
            pool.submit(Transaction::signed(
                &alice,
                address_from_string("bob"),
                nonce,
                5,
                TRANSFER_GAS,
                round + 1,
            ))?;
        }

        assembler.open()?;
        let interrupter = assembler.pack()?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        interrupter.interrupt();
        let block = assembler.finalize().await?;
        assert_eq!(assembler.state(), AssemblerState::Sealed);
        assert_eq!(block.body.successful(), 3);

        chain.write().append(block)?;
        let root = state.commit()?;
        pool.set_root(&root)?;
        assert!(pool.is_empty());
    }

    assert_eq!(chain.read().height(), 2);
    assert_eq!(chain.read().head().state_root, state.root());

    let db = Database::open(&path)?;
    let saved = db.load_blocks()?;
    assert_eq!(saved.len(), 3);
    assert_eq!(saved[2].body.transactions.len(), 3);

    let reloaded = Blockchain::load(Box::new(db))?;
    assert_eq!(reloaded.head(), chain.read().head());
    Ok(())
}

#[tokio::test]
async fn test_interrupt_after_pack_returned_is_harmless() -> TestResult {
    let state = Arc::new(MemoryState::new());
    let chain = Arc::new(RwLock::new(Blockchain::new(
        state.root(),
        Box::new(InMemoryPersistence::new()),
    )?));
    let pool = Arc::new(TransactionPool::new(state.clone(), PoolConfig::default()));
    let mut assembler = BlockAssembler::new(pool, state, Arc::new(TransferMachine::new()), chain.clone(), config());

    assembler.open()?;
    let interrupter = assembler.pack()?;
    interrupter.interrupt();
    let block = assembler.finalize().await?;
    interrupter.interrupt();
    assembler.interrupt();

    assert!(block.body.is_empty());
    chain.write().append(block)?;
    assert_eq!(chain.read().height(), 1);
    Ok(())
}

#[tokio::test]
async fn test_tampered_block_rejected() -> TestResult {
    let state = Arc::new(MemoryState::new());
    let chain = Arc::new(RwLock::new(Blockchain::new(
        state.root(),
        Box::new(InMemoryPersistence::new()),
    )?));
    let pool = Arc::new(TransactionPool::new(state.clone(), PoolConfig::default()));
    let mut assembler = BlockAssembler::new(pool, state, Arc::new(TransferMachine::new()), chain.clone(), config());

    assembler.open()?;
    let mut block = assembler.finalize().await?;
    let tx = Transaction::new(address_from_string("x"), 1, 1, TRANSFER_GAS, 1, Vec::new());
    block.body.transactions.push(tx);

    assert!(chain.write().append(block).is_err());
    assert_eq!(chain.read().height(), 0);
    Ok(())
}
