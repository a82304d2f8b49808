//! Order construction: tick and size rounding, fixed-point amounts, market
//! pricing with slippage, and the signed wire payload.

use super::eip712::{Address, Domain, Eip712Error, Order, Side, SignatureType};
use super::wallet::Wallet;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// USDC and outcome shares both use 6 decimals on chain.
pub const AMOUNT_DECIMALS: u32 = 6;
pub const PRICE_DECIMALS: u32 = 2;
pub const SIZE_DECIMALS: u32 = 2;

pub const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
pub const MAX_PRICE: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("price {0} outside (0, 1)")]
    InvalidPrice(Decimal),

    #[error("size {0} rounds to zero shares")]
    InvalidSize(Decimal),

    #[error("amount {0} does not fit the fixed-point range")]
    AmountOverflow(Decimal),

    #[error(transparent)]
    Signing(#[from] Eip712Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Truncate,
    Nearest,
}

/// Converts a decimal amount into 6-decimal integer units.
pub fn to_usdc_units(value: Decimal, rounding: Rounding) -> Result<u64, OrderError> {
    let scaled = value * Decimal::from(10u64.pow(AMOUNT_DECIMALS));
    let whole = match rounding {
        Rounding::Truncate => scaled.trunc(),
        Rounding::Nearest => {
            scaled.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        }
    };
    if whole.is_sign_negative() {
        return Err(OrderError::AmountOverflow(value));
    }
    whole.to_u64().ok_or(OrderError::AmountOverflow(value))
}

/// Snaps a price to the nearest cent tick.
#[must_use]
pub fn round_price(price: Decimal) -> Decimal {
    price.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a share size down to two decimals.
#[must_use]
pub fn round_size(size: Decimal) -> Decimal {
    size.round_dp_with_strategy(SIZE_DECIMALS, RoundingStrategy::ToZero)
}

/// `(maker_amount, taker_amount)` in fixed-point units. The side that is
/// spent truncates, the side that is received rounds to nearest, so the
/// order never commits more than the decimal intent.
pub fn order_amounts(side: Side, price: Decimal, size: Decimal) -> Result<(u64, u64), OrderError> {
    let price = round_price(price);
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(OrderError::InvalidPrice(price));
    }
    let shares = round_size(size);
    if shares <= Decimal::ZERO {
        return Err(OrderError::InvalidSize(size));
    }
    let notional = shares * price;

    match side {
        Side::Buy => Ok((
            to_usdc_units(notional, Rounding::Truncate)?,
            to_usdc_units(shares, Rounding::Nearest)?,
        )),
        Side::Sell => Ok((
            to_usdc_units(shares, Rounding::Truncate)?,
            to_usdc_units(notional, Rounding::Nearest)?,
        )),
    }
}

/// Aggressive limit price for a marketable buy: floor to the tick, add slippage.
#[must_use]
pub fn market_buy_price(best_ask: Decimal, slippage: Decimal) -> Decimal {
    let floored =
        best_ask.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::ToNegativeInfinity);
    (floored + slippage).clamp(MIN_PRICE, MAX_PRICE)
}

/// Aggressive limit price for a marketable sell: ceil to the tick, subtract slippage.
#[must_use]
pub fn market_sell_price(best_bid: Decimal, slippage: Decimal) -> Decimal {
    let ceiled =
        best_bid.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::ToPositiveInfinity);
    (ceiled - slippage).clamp(MIN_PRICE, MAX_PRICE)
}

// =============================================================================
// Requests and signed payloads
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Fill what is available now, cancel the rest.
    Fak,
    Fok,
    Gtc,
}

/// A limit order the caller wants placed.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
}

impl OrderRequest {
    /// Marketable buy at `best_ask + slippage`, fill-and-kill.
    #[must_use]
    pub fn market_buy(token_id: &str, best_ask: Decimal, size: Decimal, slippage: Decimal) -> Self {
        Self {
            token_id: token_id.to_string(),
            side: Side::Buy,
            price: market_buy_price(best_ask, slippage),
            size: round_size(size),
            order_type: OrderType::Fak,
        }
    }

    /// Marketable sell at `best_bid - slippage`, fill-and-kill.
    #[must_use]
    pub fn market_sell(
        token_id: &str,
        best_bid: Decimal,
        size: Decimal,
        slippage: Decimal,
    ) -> Self {
        Self {
            token_id: token_id.to_string(),
            side: Side::Sell,
            price: market_sell_price(best_bid, slippage),
            size: round_size(size),
            order_type: OrderType::Fak,
        }
    }
}

/// A signed order. Never mutated after signing.
#[derive(Debug, Clone)]
pub struct SignedOrder {
    order: Order,
    signature: String,
}

impl SignedOrder {
    #[must_use]
    pub fn order(&self) -> &Order {
        &self.order
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    #[must_use]
    pub fn payload(&self) -> OrderPayload {
        OrderPayload {
            salt: self.order.salt,
            maker: self.order.maker,
            signer: self.order.signer,
            taker: self.order.taker,
            token_id: self.order.token_id.clone(),
            maker_amount: self.order.maker_amount.to_string(),
            taker_amount: self.order.taker_amount.to_string(),
            expiration: self.order.expiration.to_string(),
            nonce: self.order.nonce.to_string(),
            fee_rate_bps: self.order.fee_rate_bps.to_string(),
            side: self.order.side,
            signature_type: self.order.signature_type.as_u8(),
            signature: self.signature.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub salt: u64,
    pub maker: Address,
    pub signer: Address,
    pub taker: Address,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub side: Side,
    pub signature_type: u8,
    pub signature: String,
}

/// Body of `POST /order`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOrderBody {
    pub order: OrderPayload,
    pub owner: String,
    pub order_type: OrderType,
}

/// Builds and signs exchange orders for one wallet and domain.
#[derive(Debug, Clone)]
pub struct OrderBuilder {
    wallet: Arc<Wallet>,
    domain: Domain,
    fee_rate_bps: u64,
    signature_type: SignatureType,
}

impl OrderBuilder {
    #[must_use]
    pub fn new(wallet: Arc<Wallet>, domain: Domain) -> Self {
        Self {
            wallet,
            domain,
            fee_rate_bps: 0,
            signature_type: SignatureType::Eoa,
        }
    }

    #[must_use]
    pub fn with_fee_rate_bps(mut self, fee_rate_bps: u64) -> Self {
        self.fee_rate_bps = fee_rate_bps;
        self
    }

    #[must_use]
    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Unsigned order with a fresh random salt.
    pub fn build(&self, request: &OrderRequest) -> Result<Order, OrderError> {
        let (maker_amount, taker_amount) =
            order_amounts(request.side, request.price, request.size)?;
        let maker = self.wallet.address();
        Ok(Order {
            salt: generate_salt(),
            maker,
            signer: maker,
            taker: Address::ZERO,
            token_id: request.token_id.clone(),
            maker_amount,
            taker_amount,
            expiration: 0,
            nonce: 0,
            fee_rate_bps: self.fee_rate_bps,
            side: request.side,
            signature_type: self.signature_type,
        })
    }

    pub fn sign(&self, order: Order) -> Result<SignedOrder, OrderError> {
        let digest = self.domain.signing_hash(&order.struct_hash()?);
        let signature = self.wallet.sign_digest(&digest)?;
        Ok(SignedOrder { order, signature })
    }

    pub fn build_signed(&self, request: &OrderRequest) -> Result<SignedOrder, OrderError> {
        self.sign(self.build(request)?)
    }
}

/// Random salt that stays inside the JSON-safe integer range.
#[must_use]
pub fn generate_salt() -> u64 {
    rand::thread_rng().gen_range(1..(1u64 << 53))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clob::wallet::tests::test_wallet;
    use rust_decimal_macros::dec;

    #[test]
    fn truncation_keeps_sub_unit_precision() {
        assert_eq!(to_usdc_units(dec!(4.9985), Rounding::Truncate).unwrap(), 4_998_500);
        assert_eq!(to_usdc_units(dec!(4.99999999), Rounding::Truncate).unwrap(), 4_999_999);
        assert_eq!(to_usdc_units(dec!(4.99999999), Rounding::Nearest).unwrap(), 5_000_000);
        assert!(to_usdc_units(dec!(-1), Rounding::Nearest).is_err());
    }

    #[test]
    fn buy_amounts_spend_usdc_receive_shares() {
        let (maker, taker) = order_amounts(Side::Buy, dec!(0.50), dec!(100)).unwrap();
        assert_eq!(maker, 50_000_000);
        assert_eq!(taker, 100_000_000);
    }

    #[test]
    fn sell_amounts_spend_shares_receive_usdc() {
        let (maker, taker) = order_amounts(Side::Sell, dec!(0.60), dec!(50)).unwrap();
        assert_eq!(maker, 50_000_000);
        assert_eq!(taker, 30_000_000);
    }

    #[test]
    fn size_rounds_down_and_price_snaps_to_tick() {
        // 10.752688 -> 10.75 shares, 10.75 * 0.19 = 2.0425 USDC
        let (maker, taker) = order_amounts(Side::Buy, dec!(0.19), dec!(10.752688)).unwrap();
        assert_eq!(taker, 10_750_000);
        assert_eq!(maker, 2_042_500);

        // 0.1995 snaps to 0.20; 5.88 * 0.20 = 1.176
        let (maker, taker) = order_amounts(Side::Sell, dec!(0.1995), dec!(5.8823)).unwrap();
        assert_eq!(maker, 5_880_000);
        assert_eq!(taker, 1_176_000);
    }

    #[test]
    fn amounts_never_exceed_intent() {
        let price = dec!(0.37);
        let size = dec!(13.339);
        let (maker, _) = order_amounts(Side::Buy, price, size).unwrap();
        assert!(Decimal::from(maker) <= price * size * dec!(1000000));
    }

    #[test]
    fn rejects_degenerate_orders() {
        assert!(order_amounts(Side::Buy, dec!(0), dec!(10)).is_err());
        assert!(order_amounts(Side::Buy, dec!(1), dec!(10)).is_err());
        assert!(order_amounts(Side::Buy, dec!(0.5), dec!(0.004)).is_err());
    }

    #[test]
    fn market_prices_apply_slippage_on_the_tick() {
        assert_eq!(market_buy_price(dec!(0.437), dec!(0.02)), dec!(0.45));
        assert_eq!(market_buy_price(dec!(0.985), dec!(0.02)), dec!(0.99));
        assert_eq!(market_sell_price(dec!(0.431), dec!(0.03)), dec!(0.41));
        assert_eq!(market_sell_price(dec!(0.02), dec!(0.03)), dec!(0.01));
    }

    #[test]
    fn market_requests_are_fill_and_kill() {
        let buy = OrderRequest::market_buy("42", dec!(0.40), dec!(12.345), dec!(0.02));
        assert_eq!(buy.order_type, OrderType::Fak);
        assert_eq!(buy.price, dec!(0.42));
        assert_eq!(buy.size, dec!(12.34));

        let sell = OrderRequest::market_sell("42", dec!(0.60), dec!(12.34), dec!(0.03));
        assert_eq!(sell.side, Side::Sell);
        assert_eq!(sell.price, dec!(0.57));
    }

    #[test]
    fn signed_payload_matches_wire_shape() {
        let builder = OrderBuilder::new(
            Arc::new(test_wallet(137)),
            Domain::polymarket(137, false).unwrap(),
        );
        let request = OrderRequest::market_buy("1234", dec!(0.40), dec!(10), dec!(0.02));
        let signed = builder.build_signed(&request).unwrap();

        let body = PostOrderBody {
            order: signed.payload(),
            owner: "api-key".to_string(),
            order_type: request.order_type,
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["orderType"], "FAK");
        assert_eq!(json["owner"], "api-key");
        assert_eq!(json["order"]["side"], "BUY");
        assert_eq!(json["order"]["tokenId"], "1234");
        assert_eq!(json["order"]["makerAmount"], "4200000");
        assert_eq!(json["order"]["takerAmount"], "10000000");
        assert_eq!(json["order"]["signatureType"], 0);
        assert!(json["order"]["salt"].is_u64());
        assert_eq!(json["order"]["signature"].as_str().unwrap().len(), 132);
    }

    fn order_from_wire(json: &serde_json::Value) -> Order {
        let address = |key: &str| json[key].as_str().unwrap().parse::<Address>().unwrap();
        let amount = |key: &str| json[key].as_str().unwrap().parse::<u64>().unwrap();
        Order {
            salt: json["salt"].as_u64().unwrap(),
            maker: address("maker"),
            signer: address("signer"),
            taker: address("taker"),
            token_id: json["tokenId"].as_str().unwrap().to_string(),
            maker_amount: amount("makerAmount"),
            taker_amount: amount("takerAmount"),
            expiration: amount("expiration"),
            nonce: amount("nonce"),
            fee_rate_bps: amount("feeRateBps"),
            side: match json["side"].as_str().unwrap() {
                "BUY" => Side::Buy,
                "SELL" => Side::Sell,
                other => panic!("unexpected side {other}"),
            },
            signature_type: match json["signatureType"].as_u64().unwrap() {
                0 => SignatureType::Eoa,
                1 => SignatureType::PolyProxy,
                2 => SignatureType::GnosisSafe,
                other => panic!("unexpected signature type {other}"),
            },
        }
    }

    #[test]
    fn signed_order_round_trips_through_wire_json() {
        use crate::clob::eip712::keccak256;
        use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

        let wallet = Arc::new(test_wallet(137));
        let domain = Domain::polymarket(137, false).unwrap();
        let builder = OrderBuilder::new(Arc::clone(&wallet), domain.clone());
        let request = OrderRequest::market_sell("1234", dec!(0.55), dec!(8), dec!(0.02));
        let signed = builder.build_signed(&request).unwrap();

        let json = serde_json::to_value(signed.payload()).unwrap();
        let rebuilt = order_from_wire(&json);
        assert_eq!(&rebuilt, signed.order());

        let struct_hash = rebuilt.struct_hash().unwrap();
        assert_eq!(struct_hash, signed.order().struct_hash().unwrap());
        let digest = domain.signing_hash(&struct_hash);
        assert_eq!(
            digest,
            domain.signing_hash(&signed.order().struct_hash().unwrap())
        );

        // r || s || v from the wire recovers the wallet that signed
        let sig_hex = json["signature"].as_str().unwrap();
        let bytes = hex::decode(sig_hex.strip_prefix("0x").unwrap()).unwrap();
        assert_eq!(bytes.len(), 65);
        let signature = Signature::from_slice(&bytes[..64]).unwrap();
        let recovery = RecoveryId::from_byte(bytes[64] - 27).unwrap();
        let key = VerifyingKey::recover_from_prehash(&digest, &signature, recovery).unwrap();
        let point = key.to_encoded_point(false);
        let recovered = Address::from_public_key_hash(&keccak256(&point.as_bytes()[1..]));
        assert_eq!(recovered, wallet.address());
        assert_eq!(rebuilt.signer, wallet.address());

        // Same salt, same signature
        let again = builder.sign(rebuilt.clone()).unwrap();
        assert_eq!(again.signature(), signed.signature());
        let mut resalted = rebuilt;
        resalted.salt += 1;
        assert_ne!(builder.sign(resalted).unwrap().signature(), signed.signature());
    }

    #[test]
    fn salts_are_fresh() {
        let a = generate_salt();
        let b = generate_salt();
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
    }
}
