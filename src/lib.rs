//! QuarryChain - A minimal proof-of-work account ledger
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Ledger
//! - [`blockchain`] - Headers, sealed blocks and the header chain
//! - [`transaction`] - Transfer and receipt types
//! - [`txpool`] - Transaction pool with per-sender nonce ordering
//!
//! ## Execution & Assembly
//! - [`executor`] - Balance-transfer state machine
//! - [`assembler`] - Block packing and proof-of-work sealing
//!
//! ## Cryptography
//! - [`crypto`] - Recoverable signatures and address derivation (secp256k1)
//!
//! ## State Management
//! - [`state`] - Account store with root-addressed snapshots
//! - [`persistence`] - Database layer (SQLite)
//! - [`cache`] - Sender recovery cache
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod transaction;
pub mod txpool;

// ============================================================================
// Execution & Assembly
// ============================================================================
pub mod assembler;
pub mod executor;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod cache;
pub mod persistence;
pub mod state;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
