//! CLOB request authentication.
//!
//! L1 signs a `ClobAuth` typed message with the wallet and is only used to
//! derive or create API credentials. L2 signs every trading request with
//! HMAC-SHA256 over `timestamp + METHOD + path + body`.

use super::eip712::{ClobAuth, Domain, Eip712Error};
use super::wallet::Wallet;
use base64::{
    engine::general_purpose::{STANDARD as BASE64_STANDARD, URL_SAFE as BASE64_URL_SAFE},
    Engine,
};
use hmac::{Hmac, Mac};
use reqwest::RequestBuilder;
use serde::Deserialize;
use sha2::Sha256;
use std::env;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_ENV: &str = "POLY_API_KEY";
pub const API_SECRET_ENV: &str = "POLY_API_SECRET";
pub const PASSPHRASE_ENV: &str = "POLY_PASSPHRASE";

#[derive(Debug, Error)]
pub enum ClobAuthError {
    #[error("typed-data signing failed: {0}")]
    Signing(#[from] Eip712Error),

    #[error("API secret is not valid base64")]
    InvalidSecret,

    #[error("HMAC key rejected: {0}")]
    Hmac(String),
}

/// API key triple issued by the CLOB.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl ApiCredentials {
    /// Reads `POLY_API_KEY`, `POLY_API_SECRET` and `POLY_PASSPHRASE`.
    /// `None` unless all three are set.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let read = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        Some(Self {
            api_key: read(API_KEY_ENV)?,
            secret: read(API_SECRET_ENV)?,
            passphrase: read(PASSPHRASE_ENV)?,
        })
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// L1
// =============================================================================

#[derive(Debug, Clone)]
pub struct L1Headers {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub nonce: String,
}

impl L1Headers {
    /// Signs a `ClobAuth` attestation for `timestamp` and `nonce`.
    pub fn sign(wallet: &Wallet, timestamp: i64, nonce: u64) -> Result<Self, ClobAuthError> {
        let message = ClobAuth {
            address: wallet.address(),
            timestamp: timestamp.to_string(),
            nonce,
        };
        let digest = Domain::clob_auth(wallet.chain_id()).signing_hash(&message.struct_hash());
        let signature = wallet.sign_digest(&digest)?;

        Ok(Self {
            address: wallet.address().to_string(),
            signature,
            timestamp: message.timestamp,
            nonce: nonce.to_string(),
        })
    }

    #[must_use]
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("POLY_ADDRESS", &self.address)
            .header("POLY_SIGNATURE", &self.signature)
            .header("POLY_TIMESTAMP", &self.timestamp)
            .header("POLY_NONCE", &self.nonce)
    }
}

// =============================================================================
// L2
// =============================================================================

#[derive(Debug, Clone)]
pub struct L2Headers {
    pub address: String,
    pub signature: String,
    pub timestamp: String,
    pub api_key: String,
    pub passphrase: String,
}

impl L2Headers {
    #[must_use]
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("POLY_ADDRESS", &self.address)
            .header("POLY_SIGNATURE", &self.signature)
            .header("POLY_TIMESTAMP", &self.timestamp)
            .header("POLY_API_KEY", &self.api_key)
            .header("POLY_PASSPHRASE", &self.passphrase)
    }
}

/// Per-request HMAC signer. The secret is decoded once at construction.
#[derive(Clone)]
pub struct L2Auth {
    credentials: ApiCredentials,
    key: Vec<u8>,
    address: String,
}

impl L2Auth {
    pub fn new(credentials: ApiCredentials, address: String) -> Result<Self, ClobAuthError> {
        let key = BASE64_URL_SAFE
            .decode(credentials.secret.trim())
            .or_else(|_| BASE64_STANDARD.decode(credentials.secret.trim()))
            .map_err(|_| ClobAuthError::InvalidSecret)?;
        Ok(Self {
            credentials,
            key,
            address,
        })
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// URL-safe base64 of `HMAC-SHA256(key, timestamp + METHOD + path + body)`.
    pub fn signature(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, ClobAuthError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|e| ClobAuthError::Hmac(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(method.to_uppercase().as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        Ok(BASE64_URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    pub fn headers(
        &self,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<L2Headers, ClobAuthError> {
        Ok(L2Headers {
            address: self.address.clone(),
            signature: self.signature(timestamp, method, path, body)?,
            timestamp: timestamp.to_string(),
            api_key: self.credentials.api_key.clone(),
            passphrase: self.credentials.passphrase.clone(),
        })
    }
}

impl std::fmt::Debug for L2Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("L2Auth")
            .field("api_key", &self.credentials.api_key)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
