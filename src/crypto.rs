//! Cryptographic primitives for QuarryChain

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Offset added to the recovery id when it is stored in a signature.
const RECOVERY_ID_OFFSET: u8 = 27;

/// Type alias for the derived address, which is a 32-byte hash.
pub type Address = [u8; 32];

/// Output of the crate-wide hash function.
pub type Sha256Hash = [u8; 32];

pub fn sha256(data: &[u8]) -> Sha256Hash {
    Sha256::digest(data).into()
}

/// Convenience function to create an address from a string (hashes the string).
/// Useful for testing and debugging.
pub fn address_from_string(s: &str) -> Address {
    sha256(s.as_bytes())
}

/// Convert an address to a hex string for display.
pub fn address_to_hex(addr: &Address) -> String {
    hex::encode(addr)
}

/// Convert a hex string to an address.
pub fn address_from_hex(hex_str: &str) -> Result<Address, ChainError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| ChainError::CryptoError(format!("Invalid hex address: {}", e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        ChainError::CryptoError(format!("Address must be 32 bytes, got {}", bytes.len()))
    })
}

/// Derives the address owned by a public key: SHA-256 of its compressed form.
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let pubkey_bytes: [u8; PUBLIC_KEY_SIZE] = public_key.serialize();
    sha256(&pubkey_bytes)
}

/// A recoverable ECDSA signature split into its scalar halves.
///
/// `v` carries the recovery id offset by 27, so it is always 27 or 28 for
/// signatures produced by [`KeyPair::sign_recoverable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl Signature {
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut out = [0u8; 65];
        out[..32].copy_from_slice(&self.r);
        out[32..64].copy_from_slice(&self.s);
        out[64] = self.v;
        out
    }
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self, ChainError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    /// Creates a KeyPair from an existing SecretKey.
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    pub fn address(&self) -> Address {
        public_key_to_address(&self.public_key)
    }

    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Signs a 32-byte digest, producing a signature the signer's address can
    /// be recovered from.
    pub fn sign_recoverable(&self, digest: &Sha256Hash) -> Signature {
        let message = Message::from_digest(*digest);
        let signature = SECP256K1_CONTEXT.sign_ecdsa_recoverable(&message, &self.secret_key);
        let (recovery_id, compact) = signature.serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[..32]);
        s.copy_from_slice(&compact[32..]);

        Signature {
            r,
            s,
            // recovery ids are 0..=3, the cast cannot truncate
            v: recovery_id.to_i32() as u8 + RECOVERY_ID_OFFSET,
        }
    }
}

/// Recovers the signer of `digest` and returns its address.
pub fn recover_address(digest: &Sha256Hash, signature: &Signature) -> Result<Address, ChainError> {
    let recovery_id = signature
        .v
        .checked_sub(RECOVERY_ID_OFFSET)
        .ok_or_else(|| ChainError::CryptoError(format!("Invalid recovery byte {}", signature.v)))?;
    let recovery_id = RecoveryId::from_i32(i32::from(recovery_id))
        .map_err(|e| ChainError::CryptoError(format!("Invalid recovery id: {}", e)))?;

    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r);
    compact[32..].copy_from_slice(&signature.s);
    let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    let message = Message::from_digest(*digest);
    let public_key = SECP256K1_CONTEXT
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| ChainError::CryptoError("Public key recovery failed".to_string()))?;

    Ok(public_key_to_address(&public_key))
}
