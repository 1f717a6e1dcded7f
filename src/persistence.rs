//! Database persistence layer for QuarryChain

use crate::blockchain::{Body, Header, SealedBlock};
use crate::error::ChainError;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

/// Abstraction for persistence backends. Saving a block at an existing
/// height replaces it.
pub trait Persistence: Send + Sync {
    fn save_block(&self, block: &SealedBlock) -> Result<(), ChainError>;
    /// All saved blocks, ascending by height.
    fn load_blocks(&self) -> Result<Vec<SealedBlock>, ChainError>;
}

fn poisoned<T>(_: T) -> ChainError {
    ChainError::DatabaseError("Mutex poisoned".to_string())
}

fn to_hash(bytes: Vec<u8>, column: usize) -> rusqlite::Result<[u8; 32]> {
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Blob,
            format!("expected 32 bytes, got {}", bytes.len()).into(),
        )
    })
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, ChainError> {
        let conn = Connection::open(path)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to open database: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blocks (
                height INTEGER PRIMARY KEY,
                hash BLOB NOT NULL,
                parent_hash BLOB NOT NULL,
                state_root BLOB NOT NULL,
                coinbase BLOB NOT NULL,
                timestamp INTEGER NOT NULL,
                nonce INTEGER NOT NULL,
                difficulty INTEGER NOT NULL,
                body TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to create blocks table: {}", e)))?;

        Ok(Database { conn: Mutex::new(conn) })
    }

    pub fn save_block(&self, block: &SealedBlock) -> Result<(), ChainError> {
        let body_json = serde_json::to_string(&block.body)
            .map_err(|e| ChainError::DatabaseError(format!("Failed to serialize body: {}", e)))?;
        let header = &block.header;

        let conn = self.conn.lock().map_err(poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO blocks (height, hash, parent_hash, state_root, coinbase, timestamp, nonce, difficulty, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                header.height as i64,
                block.hash().to_vec(),
                header.parent_hash.to_vec(),
                header.state_root.to_vec(),
                header.coinbase.to_vec(),
                header.timestamp as i64,
                header.nonce as i64,
                header.difficulty as i64,
                body_json,
            ],
        )
        .map_err(|e| ChainError::DatabaseError(format!("Failed to save block: {}", e)))?;

        Ok(())
    }

    pub fn load_blocks(&self) -> Result<Vec<SealedBlock>, ChainError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let mut stmt = conn
            .prepare(
                "SELECT height, parent_hash, state_root, coinbase, timestamp, nonce, difficulty, body
                 FROM blocks ORDER BY height ASC",
            )
            .map_err(|e| ChainError::DatabaseError(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                let height: i64 = row.get(0)?;
                let timestamp: i64 = row.get(4)?;
                let nonce: i64 = row.get(5)?;
                let difficulty: i64 = row.get(6)?;
                let body_json: String = row.get(7)?;
                let body: Body = serde_json::from_str(&body_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
                })?;

                Ok(SealedBlock {
                    header: Header {
                        parent_hash: to_hash(row.get(1)?, 1)?,
                        state_root: to_hash(row.get(2)?, 2)?,
                        height: height as u64,
                        coinbase: to_hash(row.get(3)?, 3)?,
                        timestamp: timestamp as u64,
                        nonce: nonce as u64,
                        difficulty: difficulty as u64,
                    },
                    body,
                })
            })
            .map_err(|e| ChainError::DatabaseError(format!("Failed to query blocks: {}", e)))?;

        let mut blocks = Vec::new();
        for block in rows {
            blocks.push(block.map_err(|e| ChainError::DatabaseError(format!("Failed to load block: {}", e)))?);
        }
        Ok(blocks)
    }
}

// Implement the Persistence trait for the rusqlite-backed Database
impl Persistence for Database {
    fn save_block(&self, block: &SealedBlock) -> Result<(), ChainError> {
        Database::save_block(self, block)
    }

    fn load_blocks(&self) -> Result<Vec<SealedBlock>, ChainError> {
        Database::load_blocks(self)
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
///
/// Clones share the same storage.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub blocks: Arc<Mutex<Vec<SealedBlock>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_block(&self, block: &SealedBlock) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        blocks.retain(|b| b.header.height != block.header.height);
        blocks.push(block.clone());
        blocks.sort_by_key(|b| b.header.height);
        Ok(())
    }

    fn load_blocks(&self) -> Result<Vec<SealedBlock>, ChainError> {
        Ok(self.blocks.lock().map_err(poisoned)?.clone())
    }
}
