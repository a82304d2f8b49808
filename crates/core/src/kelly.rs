//! Fractional Kelly sizing for binary outcome shares.
//!
//! A share bought at price `c` pays 1 on a win, so the net odds are
//! `b = (1 - c) / c` and the full Kelly fraction of bankroll is
//!
//! ```text
//! f* = (p(b + 1) - 1) / b
//! ```
//!
//! The sizer scales `f*` down by a configured fraction; bounds and
//! exchange minimums are applied by the caller.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KellySizer {
    /// Fraction of full Kelly to stake (0.25 = quarter Kelly).
    pub fraction: f64,
}

impl Default for KellySizer {
    fn default() -> Self {
        Self { fraction: 0.25 }
    }
}

/// Outcome of a sizing call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KellyStake {
    pub full_fraction: f64,
    pub applied_fraction: f64,
    /// Bankroll times the applied fraction, never negative.
    pub stake: Decimal,
}

impl KellySizer {
    #[must_use]
    pub fn new(fraction: f64) -> Self {
        Self { fraction }
    }

    /// Full Kelly fraction for win probability `win_prob` at share price
    /// `price`. `None` when the inputs describe no valid bet.
    #[must_use]
    pub fn full_fraction(win_prob: f64, price: f64) -> Option<f64> {
        if !(0.0..=1.0).contains(&win_prob) || price <= 0.0 || price >= 1.0 {
            return None;
        }
        let b = (1.0 - price) / price;
        Some((win_prob * (b + 1.0) - 1.0) / b)
    }

    /// Sizes a stake against `bankroll`. Non-positive Kelly yields a zero stake.
    #[must_use]
    pub fn size(&self, win_prob: f64, price: Decimal, bankroll: Decimal) -> KellyStake {
        let full = price
            .to_f64()
            .and_then(|c| Self::full_fraction(win_prob, c))
            .unwrap_or(0.0);
        let applied = (full * self.fraction).max(0.0);
        let stake = Decimal::from_f64(applied)
            .map(|f| (bankroll * f).max(Decimal::ZERO))
            .unwrap_or(Decimal::ZERO);

        KellyStake {
            full_fraction: full,
            applied_fraction: applied,
            stake,
        }
    }

    /// Expected profit per share bought at `price`.
    #[must_use]
    pub fn expected_value(win_prob: f64, price: f64) -> f64 {
        win_prob * (1.0 - price) - (1.0 - win_prob) * price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn full_fraction_matches_closed_form() {
        // p = 0.6, c = 0.5 -> b = 1, f* = 0.2
        let f = KellySizer::full_fraction(0.6, 0.5).unwrap();
        assert!((f - 0.2).abs() < 1e-9);

        // Equivalent form (p - c) / (1 - c)
        let f = KellySizer::full_fraction(0.678, 0.40).unwrap();
        assert!((f - (0.678 - 0.40) / 0.60).abs() < 1e-9);
    }

    #[test]
    fn invalid_price_has_no_fraction() {
        assert!(KellySizer::full_fraction(0.6, 0.0).is_none());
        assert!(KellySizer::full_fraction(0.6, 1.0).is_none());
        assert!(KellySizer::full_fraction(1.2, 0.5).is_none());
    }

    #[test]
    fn quarter_kelly_scales_stake() {
        let sizer = KellySizer::default();
        let sized = sizer.size(0.6, dec!(0.5), dec!(1000));
        assert!((sized.applied_fraction - 0.05).abs() < 1e-9);
        assert!((sized.stake - dec!(50)).abs() < dec!(0.0001));
    }

    #[test]
    fn negative_edge_sizes_to_zero() {
        let sized = KellySizer::default().size(0.4, dec!(0.5), dec!(1000));
        assert!(sized.full_fraction < 0.0);
        assert_eq!(sized.stake, Decimal::ZERO);
    }

    #[test]
    fn expected_value_sign_follows_edge() {
        assert!(KellySizer::expected_value(0.6, 0.5) > 0.0);
        assert!(KellySizer::expected_value(0.4, 0.5) < 0.0);
        assert!(KellySizer::expected_value(0.5, 0.5).abs() < 1e-12);
    }
}
