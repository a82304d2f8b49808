//! Signing wallet backed by a secp256k1 private key.
//!
//! The key is read once from the environment into a `SecretString`, parsed,
//! and never printed: `Debug` shows only the address and chain.

use super::eip712::{keccak256, Address, Eip712Error, Word};
use k256::ecdsa::SigningKey;
use secrecy::{ExposeSecret, SecretString};
use std::env;
use thiserror::Error;

pub const PRIVATE_KEY_ENV: &str = "POLYMARKET_PRIVATE_KEY";

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("missing environment variable {0}")]
    MissingEnvVar(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error(transparent)]
    Eip712(#[from] Eip712Error),
}

pub struct Wallet {
    key: SigningKey,
    address: Address,
    chain_id: u64,
}

impl Wallet {
    /// Loads the key from `POLYMARKET_PRIVATE_KEY`.
    pub fn from_env(chain_id: u64) -> Result<Self, WalletError> {
        Self::from_env_var(PRIVATE_KEY_ENV, chain_id)
    }

    pub fn from_env_var(var: &str, chain_id: u64) -> Result<Self, WalletError> {
        let raw = env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| WalletError::MissingEnvVar(var.to_string()))?;
        Self::from_secret(&SecretString::from(raw), chain_id)
    }

    /// Parses a hex private key, with or without `0x`.
    pub fn from_secret(secret: &SecretString, chain_id: u64) -> Result<Self, WalletError> {
        let exposed = secret.expose_secret().trim();
        let hex_key = exposed.strip_prefix("0x").unwrap_or(exposed);
        if hex_key.len() != 64 {
            return Err(WalletError::InvalidPrivateKey(format!(
                "expected 64 hex characters, got {}",
                hex_key.len()
            )));
        }
        let bytes = hex::decode(hex_key)
            .map_err(|_| WalletError::InvalidPrivateKey("not hexadecimal".to_string()))?;
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| {
                WalletError::InvalidPrivateKey("not a valid secp256k1 scalar".to_string())
            })?;

        let point = key.verifying_key().to_encoded_point(false);
        let address = Address::from_public_key_hash(&keccak256(&point.as_bytes()[1..]));

        Ok(Self {
            key,
            address,
            chain_id,
        })
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Signs a 32-byte digest. Returns `0x || r || s || v` with `v` in {27, 28}.
    pub fn sign_digest(&self, digest: &Word) -> Result<String, Eip712Error> {
        let (signature, recovery) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| Eip712Error::SigningFailed(e.to_string()))?;

        let mut bytes = Vec::with_capacity(65);
        bytes.extend_from_slice(&signature.to_bytes());
        bytes.push(recovery.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
