//! Configuration management for QuarryChain

use crate::assembler::AssemblerConfig;
use crate::crypto::address_from_hex;
use crate::error::ChainError;
use crate::txpool::PoolConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Highest satisfiable difficulty: every bit of a SHA-256 hash.
pub const MAX_DIFFICULTY: u64 = 256;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_coinbase")]
    pub coinbase: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: u64,
    #[serde(default = "default_pack_duration", with = "humantime_serde_str")]
    pub pack_duration: Duration,
    #[serde(default = "default_idle_backoff", with = "humantime_serde_str")]
    pub idle_backoff: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            coinbase: default_coinbase(),
            difficulty: default_difficulty(),
            pack_duration: default_pack_duration(),
            idle_backoff: default_idle_backoff(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_max_per_sender")]
    pub max_pending_per_sender: usize,
    #[serde(default = "default_max_per_sender")]
    pub max_queued_per_sender: usize,
    #[serde(default)]
    pub min_gas_price: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_pending_per_sender: default_max_per_sender(),
            max_queued_per_sender: default_max_per_sender(),
            min_gas_price: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_coinbase() -> String {
    "00".repeat(32)
}

fn default_difficulty() -> u64 {
    8
}

fn default_pack_duration() -> Duration {
    Duration::from_secs(2)
}

fn default_idle_backoff() -> Duration {
    Duration::from_millis(10)
}

fn default_max_per_sender() -> usize {
    64
}

fn default_db_path() -> String {
    "./data/quarrychain.db".to_string()
}

/// Durations written as humantime strings such as `"2s"` or `"150ms"`.
mod humantime_serde_str {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ChainError> {
        let config: Config = toml::from_str(s).map_err(|e| ChainError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChainError> {
        if self.database.path.is_empty() {
            return Err(ChainError::Config("database.path must be set".into()));
        }
        if self.miner.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::Config(format!(
                "miner.difficulty {} exceeds {}",
                self.miner.difficulty, MAX_DIFFICULTY
            )));
        }
        address_from_hex(&self.miner.coinbase)
            .map_err(|e| ChainError::Config(format!("miner.coinbase: {}", e)))?;
        Ok(())
    }

    pub fn assembler(&self) -> Result<AssemblerConfig, ChainError> {
        Ok(AssemblerConfig {
            coinbase: address_from_hex(&self.miner.coinbase)
                .map_err(|e| ChainError::Config(format!("miner.coinbase: {}", e)))?,
            difficulty: self.miner.difficulty,
            pack_duration: self.miner.pack_duration,
            idle_backoff: self.miner.idle_backoff,
        })
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig::default()
            .with_max_pending_per_sender(self.pool.max_pending_per_sender)
            .with_max_queued_per_sender(self.pool.max_queued_per_sender)
            .with_min_gas_price(self.pool.min_gas_price)
    }
}

/// Reads `config.toml` from the working directory, falling back to defaults
/// when it is absent.
pub fn load_config() -> Result<Config, ChainError> {
    load_config_from("config.toml")
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, ChainError> {
    let path = path.as_ref();
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    let config_str = fs::read_to_string(path)?;
    Config::from_toml_str(&config_str)
}
