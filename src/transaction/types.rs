/// Transaction and receipt types for QuarryChain
use crate::crypto::{recover_address, sha256, Address, KeyPair, Sha256Hash, Signature};
use crate::error::ChainError;
use sha2::{Digest, Sha256};

/// Maximum transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// Flat gas charged for every transfer, regardless of the declared gas limit.
pub const TRANSFER_GAS: u64 = 21_000;

/// A signed value transfer.
///
/// The sender is not stored; it is recovered from the signature over
/// [`Transaction::payload_hash`] whenever it is needed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub to: Address,
    pub nonce: u64,
    pub value: u64,
    pub gas: u64,
    pub gas_price: u64,
    #[serde(default)]
    pub input: Vec<u8>,
    pub signature: Option<Signature>,
}

impl Transaction {
    /// Creates an unsigned transfer.
    pub fn new(to: Address, nonce: u64, value: u64, gas: u64, gas_price: u64, input: Vec<u8>) -> Self {
        Transaction {
            to,
            nonce,
            value,
            gas,
            gas_price,
            input,
            signature: None,
        }
    }

    /// Creates a transfer and signs it with `keypair`.
    pub fn signed(
        keypair: &KeyPair,
        to: Address,
        nonce: u64,
        value: u64,
        gas: u64,
        gas_price: u64,
    ) -> Self {
        let mut tx = Self::new(to, nonce, value, gas, gas_price, Vec::new());
        tx.sign(keypair);
        tx
    }

    /// The encoded body covered by the signature (every field except it).
    pub fn signable_message(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(9 + 32 + 8 * 5 + self.input.len());
        message.extend_from_slice("TRANSFER:".as_bytes());
        message.extend_from_slice(&self.to);
        message.extend_from_slice(&self.nonce.to_le_bytes());
        message.extend_from_slice(&self.value.to_le_bytes());
        message.extend_from_slice(&self.gas.to_le_bytes());
        message.extend_from_slice(&self.gas_price.to_le_bytes());
        message.extend_from_slice(&(self.input.len() as u64).to_le_bytes());
        message.extend_from_slice(&self.input);
        message
    }

    pub fn payload_hash(&self) -> Sha256Hash {
        sha256(&self.signable_message())
    }

    pub fn sign(&mut self, keypair: &KeyPair) {
        self.signature = Some(keypair.sign_recoverable(&self.payload_hash()));
    }

    /// Transaction identity: payload plus signature, so a re-signed transfer is
    /// a distinct transaction.
    pub fn hash(&self) -> Sha256Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.signable_message());
        match &self.signature {
            Some(signature) => hasher.update(signature.to_bytes()),
            None => hasher.update([0u8]),
        }
        hasher.finalize().into()
    }

    /// Recovers the sending address from the signature.
    pub fn from(&self) -> Result<Address, ChainError> {
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| ChainError::CryptoError("Transaction not signed".to_string()))?;
        recover_address(&self.payload_hash(), signature)
    }

    /// `value + TRANSFER_GAS * gas_price`, or `None` if it does not fit in a u64.
    pub fn intrinsic_cost(&self) -> Option<u64> {
        TRANSFER_GAS
            .checked_mul(self.gas_price)
            .and_then(|fee| fee.checked_add(self.value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum ReceiptStatus {
    Failure = 0,
    Success = 1,
}

/// Outcome of executing one transaction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Receipt {
    pub tx_hash: Sha256Hash,
    pub status: ReceiptStatus,
}

impl Receipt {
    pub fn success(tx_hash: Sha256Hash) -> Self {
        Receipt {
            tx_hash,
            status: ReceiptStatus::Success,
        }
    }

    pub fn failure(tx_hash: Sha256Hash) -> Self {
        Receipt {
            tx_hash,
            status: ReceiptStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}
