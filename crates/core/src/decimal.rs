//! Decimal arithmetic for balances, prices and health factors.
//!
//! On-chain amounts are integers scaled by the token's decimals; off-chain
//! valuation runs on [`Decimal`] so no value ever passes through a float.
//! Oracle prices carry 8 decimals, health factors reported by the pool 18.

use alloy::primitives::U256;
use rust_decimal::Decimal;

/// Decimals of oracle prices and of the pool's base currency.
pub const PRICE_DECIMALS: u32 = 8;

/// Decimals of health factors reported on chain.
pub const HEALTH_FACTOR_DECIMALS: u32 = 18;

/// Largest scale a [`Decimal`] can carry.
const MAX_SCALE: u32 = 28;

/// 2^96 - 1, the largest [`Decimal`] mantissa.
const MAX_MANTISSA: U256 = U256::from_limbs([u64::MAX, u32::MAX as u64, 0, 0]);

pub fn bps_denominator() -> Decimal {
    Decimal::from(10_000u32)
}

/// `value / 10^decimals` as a decimal.
///
/// Values too wide for a decimal lose their least significant digits; only a
/// value that still overflows at scale zero yields `None`.
pub fn to_decimal(value: U256, decimals: u32) -> Option<Decimal> {
    let mut mantissa = value;
    let mut scale = decimals;
    let ten = U256::from(10u8);
    while mantissa > MAX_MANTISSA || scale > MAX_SCALE {
        if scale == 0 {
            return None;
        }
        mantissa /= ten;
        scale -= 1;
    }
    Some(Decimal::from_i128_with_scale(mantissa.to::<u128>() as i128, scale))
}

/// `floor(value * 10^decimals)` as an integer amount. Negative values clamp to zero.
pub fn from_decimal(value: Decimal, decimals: u32) -> U256 {
    if value.is_sign_negative() || value.is_zero() {
        return U256::ZERO;
    }
    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let ten = U256::from(10u8);
    let scaled = mantissa.saturating_mul(ten.pow(U256::from(decimals)));
    scaled / ten.pow(U256::from(value.scale()))
}

/// Oracle answer (8 decimals) to a USD price.
pub fn price_from_oracle(raw: U256) -> Decimal {
    to_decimal(raw, PRICE_DECIMALS).unwrap_or(Decimal::MAX)
}

/// USD value of `amount` token units. Saturates instead of overflowing.
pub fn usd_value(amount: U256, decimals: u8, price: Decimal) -> Decimal {
    to_decimal(amount, decimals as u32)
        .and_then(|units| units.checked_mul(price))
        .unwrap_or(Decimal::MAX)
}

/// Token units worth `usd` at `price`, truncated to the token's precision.
pub fn units_for_usd(usd: Decimal, decimals: u8, price: Decimal) -> U256 {
    if price.is_zero() {
        return U256::ZERO;
    }
    usd.checked_div(price)
        .map(|units| from_decimal(units, decimals as u32))
        .unwrap_or(U256::ZERO)
}

/// `collateral * (threshold / 10000) / debt`, with `threshold` in basis points.
///
/// Zero debt yields zero: a position without debt has no meaningful ratio and
/// is never liquidatable, which callers check through the debt itself.
pub fn health_factor(collateral_base: Decimal, debt_base: Decimal, threshold_bps: Decimal) -> Decimal {
    if debt_base.is_zero() {
        return Decimal::ZERO;
    }
    threshold_bps
        .checked_div(bps_denominator())
        .and_then(|ratio| collateral_base.checked_mul(ratio))
        .and_then(|weighted| weighted.checked_div(debt_base))
        .unwrap_or(Decimal::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_to_decimal_scales() {
        assert_eq!(to_decimal(U256::from(1_500_000u64), 6), Some(dec("1.5")));
        assert_eq!(
            to_decimal(U256::from(2_000_000_000_000_000_000u128), 18),
            Some(dec("2"))
        );
        assert_eq!(to_decimal(U256::ZERO, 18), Some(Decimal::ZERO));
    }

    #[test]
    fn test_to_decimal_wide_values_keep_magnitude() {
        // 1e12 tokens with 18 decimals needs more than 96 bits of mantissa.
        let wide = U256::from(10u8).pow(U256::from(30u8));
        assert_eq!(to_decimal(wide, 18), Some(dec("1000000000000")));
        assert_eq!(to_decimal(U256::MAX, 0), None);
    }

    #[test]
    fn test_from_decimal_truncates() {
        assert_eq!(from_decimal(dec("1.2345678"), 6), U256::from(1_234_567u64));
        assert_eq!(from_decimal(dec("-1"), 6), U256::ZERO);
        assert_eq!(from_decimal(dec("3"), 18), U256::from(3_000_000_000_000_000_000u128));
    }

    #[test]
    fn test_usd_value() {
        // 1.5 ETH at $2000
        let amount = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(usd_value(amount, 18, dec("2000")), dec("3000"));

        // 1000 USDC at $1
        let price = price_from_oracle(U256::from(100_000_000u64));
        assert_eq!(usd_value(U256::from(1_000_000_000u64), 6, price), dec("1000"));
    }

    #[test]
    fn test_units_for_usd() {
        assert_eq!(units_for_usd(dec("3000"), 18, dec("2000")), U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(units_for_usd(dec("10"), 6, Decimal::ZERO), U256::ZERO);
    }

    #[test]
    fn test_health_factor_examples() {
        assert_eq!(health_factor(dec("1000"), dec("500"), dec("8000")), dec("1.6"));
        assert_eq!(health_factor(dec("1000"), Decimal::ZERO, dec("8000")), Decimal::ZERO);
    }

    #[test]
    fn test_health_factor_matches_formula_on_random_inputs() {
        // Deterministic LCG so failures reproduce.
        let mut seed: u64 = 0x5eed_1234_abcd_0001;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            seed >> 16
        };

        for _ in 0..1_000 {
            let collateral = Decimal::new((next() % 10_000_000_000) as i64, 4);
            let debt = Decimal::new((next() % 10_000_000_000 + 1) as i64, 4);
            let threshold = Decimal::from(next() % 10_000);

            let expected = collateral * (threshold / dec("10000")) / debt;
            let actual = health_factor(collateral, debt, threshold);
            assert_eq!(actual, expected, "c={collateral} d={debt} t={threshold}");

            // Exact rational check where the quotient terminates.
            let lhs = actual * debt;
            let rhs = collateral * threshold / dec("10000");
            assert!((lhs - rhs).abs() <= dec("0.000000001"), "c={collateral} d={debt} t={threshold}");
        }
    }
}
