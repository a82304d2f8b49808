//! EIP-712 typed-data hashing for CTF Exchange orders and CLOB auth messages.
//!
//! Every hash here must match the on-chain verifier byte for byte:
//! `keccak256(0x19 0x01 || domainSeparator || structHash)`.

use serde::{Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

pub const POLYGON_CHAIN_ID: u64 = 137;

pub const STANDARD_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
pub const NEG_RISK_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";

const EXCHANGE_DOMAIN_NAME: &str = "Polymarket CTF Exchange";
const CLOB_AUTH_DOMAIN_NAME: &str = "ClobAuthDomain";
const DOMAIN_VERSION: &str = "1";

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const DOMAIN_TYPE_NO_CONTRACT: &str = "EIP712Domain(string name,string version,uint256 chainId)";

const ORDER_TYPE: &str = "Order(uint256 salt,address maker,address signer,address taker,\
uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,\
uint256 feeRateBps,uint8 side,uint8 signatureType)";

const CLOB_AUTH_TYPE: &str =
    "ClobAuth(address address,string timestamp,uint256 nonce,string message)";

pub const CLOB_AUTH_MESSAGE: &str = "This message attests that I control the given wallet";

pub type Word = [u8; 32];

#[derive(Debug, Error)]
pub enum Eip712Error {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid uint256 '{0}'")]
    InvalidUint(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),
}

#[must_use]
pub fn keccak256(data: &[u8]) -> Word {
    Keccak256::digest(data).into()
}

// =============================================================================
// Primitive types
// =============================================================================

/// A 20-byte account address. Displays with the EIP-55 mixed-case checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    #[must_use]
    pub fn from_public_key_hash(hash: &Word) -> Self {
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[12..]);
        Address(bytes)
    }

    #[must_use]
    pub fn checksummed(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = Eip712Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| Eip712Error::InvalidAddress(format!("{s}: {e}")))?;
        let bytes: [u8; 20] = bytes.try_into().map_err(|b: Vec<u8>| {
            Eip712Error::InvalidAddress(format!("{s}: expected 20 bytes, got {}", b.len()))
        })?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.checksummed())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.checksummed())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.checksummed())
    }
}

/// Parses a base-10 string into a big-endian uint256 word.
pub fn parse_uint256(value: &str) -> Result<Word, Eip712Error> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Eip712Error::InvalidUint(value.to_string()));
    }
    let mut word = [0u8; 32];
    for digit in value.bytes().map(|b| b - b'0') {
        let mut carry = u16::from(digit);
        for byte in word.iter_mut().rev() {
            let v = u16::from(*byte) * 10 + carry;
            *byte = (v & 0xff) as u8;
            carry = v >> 8;
        }
        if carry != 0 {
            return Err(Eip712Error::InvalidUint(value.to_string()));
        }
    }
    Ok(word)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl Serialize for Side {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the maker's signature is verified on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureType {
    #[default]
    Eoa,
    PolyProxy,
    GnosisSafe,
}

impl SignatureType {
    #[must_use]
    pub fn as_u8(&self) -> u8 {
        match self {
            SignatureType::Eoa => 0,
            SignatureType::PolyProxy => 1,
            SignatureType::GnosisSafe => 2,
        }
    }
}

// =============================================================================
// Struct encoding
// =============================================================================

/// Accumulates `typeHash || enc(field)...` and hashes it.
struct StructEncoder {
    buf: Vec<u8>,
}

impl StructEncoder {
    fn new(type_string: &str, fields: usize) -> Self {
        let mut buf = Vec::with_capacity((fields + 1) * 32);
        buf.extend_from_slice(&keccak256(type_string.as_bytes()));
        Self { buf }
    }

    fn word(mut self, word: &Word) -> Self {
        self.buf.extend_from_slice(word);
        self
    }

    fn uint(self, value: u64) -> Self {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&value.to_be_bytes());
        self.word(&word)
    }

    fn address(self, address: &Address) -> Self {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&address.0);
        self.word(&word)
    }

    fn string(self, value: &str) -> Self {
        let hash = keccak256(value.as_bytes());
        self.word(&hash)
    }

    fn finish(self) -> Word {
        keccak256(&self.buf)
    }
}

/// An EIP-712 signing domain.
#[derive(Debug, Clone)]
pub struct Domain {
    pub name: &'static str,
    pub version: &'static str,
    pub chain_id: u64,
    pub verifying_contract: Option<Address>,
}

impl Domain {
    /// Exchange domain for the given chain and contract.
    #[must_use]
    pub fn exchange(chain_id: u64, contract: Address) -> Self {
        Self {
            name: EXCHANGE_DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id,
            verifying_contract: Some(contract),
        }
    }

    /// Polygon exchange domain, standard or neg-risk.
    pub fn polymarket(chain_id: u64, neg_risk: bool) -> Result<Self, Eip712Error> {
        let contract = if neg_risk {
            NEG_RISK_EXCHANGE
        } else {
            STANDARD_EXCHANGE
        };
        Ok(Self::exchange(chain_id, contract.parse()?))
    }

    #[must_use]
    pub fn clob_auth(chain_id: u64) -> Self {
        Self {
            name: CLOB_AUTH_DOMAIN_NAME,
            version: DOMAIN_VERSION,
            chain_id,
            verifying_contract: None,
        }
    }

    #[must_use]
    pub fn separator(&self) -> Word {
        match &self.verifying_contract {
            Some(contract) => StructEncoder::new(DOMAIN_TYPE, 4)
                .string(self.name)
                .string(self.version)
                .uint(self.chain_id)
                .address(contract)
                .finish(),
            None => StructEncoder::new(DOMAIN_TYPE_NO_CONTRACT, 3)
                .string(self.name)
                .string(self.version)
                .uint(self.chain_id)
                .finish(),
        }
    }

    /// `keccak256(0x19 0x01 || separator || struct_hash)`
    #[must_use]
    pub fn signing_hash(&self, struct_hash: &Word) -> Word {
        let mut data = Vec::with_capacity(66);
        data.extend_from_slice(&[0x19, 0x01]);
        data.extend_from_slice(&self.separator());
        data.extend_from_slice(struct_hash);
        keccak256(&data)
    }
}

/// The exchange `Order` struct as the contract hashes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub salt: u64,
    pub maker: Address,
    pub signer: Address,
    pub taker: Address,
    /// Base-10 ERC-1155 position id.
    pub token_id: String,
    pub maker_amount: u64,
    pub taker_amount: u64,
    pub expiration: u64,
    pub nonce: u64,
    pub fee_rate_bps: u64,
    pub side: Side,
    pub signature_type: SignatureType,
}

impl Order {
    pub fn struct_hash(&self) -> Result<Word, Eip712Error> {
        let token_id = parse_uint256(&self.token_id)?;
        Ok(StructEncoder::new(ORDER_TYPE, 12)
            .uint(self.salt)
            .address(&self.maker)
            .address(&self.signer)
            .address(&self.taker)
            .word(&token_id)
            .uint(self.maker_amount)
            .uint(self.taker_amount)
            .uint(self.expiration)
            .uint(self.nonce)
            .uint(self.fee_rate_bps)
            .uint(u64::from(self.side.as_u8()))
            .uint(u64::from(self.signature_type.as_u8()))
            .finish())
    }
}

/// L1 attestation that the caller controls `address`.
#[derive(Debug, Clone)]
pub struct ClobAuth {
    pub address: Address,
    pub timestamp: String,
    pub nonce: u64,
}

impl ClobAuth {
    #[must_use]
    pub fn struct_hash(&self) -> Word {
        StructEncoder::new(CLOB_AUTH_TYPE, 4)
            .address(&self.address)
            .string(&self.timestamp)
            .uint(self.nonce)
            .string(CLOB_AUTH_MESSAGE)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTOR_MAKER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const AMOY_EXCHANGE: &str = "0xdFE02Eb6733538f8Ea35D585af8DE5958AD99E40";

    fn vector_order() -> Order {
        let maker: Address = VECTOR_MAKER.parse().unwrap();
        Order {
            salt: 479_249_096_354,
            maker,
            signer: maker,
            taker: Address::ZERO,
            token_id: "1234".to_string(),
            maker_amount: 100_000_000,
            taker_amount: 50_000_000,
            expiration: 0,
            nonce: 0,
            fee_rate_bps: 100,
            side: Side::Buy,
            signature_type: SignatureType::Eoa,
        }
    }

    #[test]
    fn signing_hash_matches_reference_vector() {
        let domain = Domain::exchange(80002, AMOY_EXCHANGE.parse().unwrap());
        let hash = domain.signing_hash(&vector_order().struct_hash().unwrap());
        assert_eq!(
            hex::encode(hash),
            "02ca1d1aa31103804173ad1acd70066cb6c1258a4be6dada055111f9a7ea4e55"
        );
    }

    #[test]
    fn neg_risk_signing_hash_matches_reference_vector() {
        let domain = Domain::exchange(80002, NEG_RISK_EXCHANGE.parse().unwrap());
        let hash = domain.signing_hash(&vector_order().struct_hash().unwrap());
        assert_eq!(
            hex::encode(hash),
            "f15790d3edc4b5aed427b0b543a9206fcf4b1a13dfed016d33bfb313076263b8"
        );
    }

    #[test]
    fn domains_differ_by_contract_and_chain() {
        let standard = Domain::polymarket(137, false).unwrap().separator();
        let neg_risk = Domain::polymarket(137, true).unwrap().separator();
        let amoy = Domain::polymarket(80002, false).unwrap().separator();
        assert_ne!(standard, neg_risk);
        assert_ne!(standard, amoy);
        assert_ne!(Domain::clob_auth(137).separator(), standard);
    }

    #[test]
    fn uint256_parses_large_token_ids() {
        let word = parse_uint256("1000000").unwrap();
        assert_eq!(&word[29..], &[0x0f, 0x42, 0x40]);

        // 2^256 - 1
        let max = parse_uint256(
            "115792089237316195423570985008687907853269984665640564039457584007913129639935",
        )
        .unwrap();
        assert_eq!(max, [0xff; 32]);

        assert!(parse_uint256(
            "115792089237316195423570985008687907853269984665640564039457584007913129639936"
        )
        .is_err());
        assert!(parse_uint256("12a").is_err());
        assert!(parse_uint256("").is_err());
    }

    #[test]
    fn address_round_trips_with_checksum() {
        let addr: Address = VECTOR_MAKER.to_lowercase().parse().unwrap();
        assert_eq!(addr.to_string(), VECTOR_MAKER);
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn side_serializes_as_wire_string() {
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), "\"SELL\"");
        assert_eq!(Side::Buy.as_u8(), 0);
    }
}
