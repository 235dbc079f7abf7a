//! Fixed-point helpers shared by pricing and accounting.
//!
//! Rates are 18-decimal fixed point ("wad"). Amounts keep each asset's native
//! decimal count and are only rescaled at conversion boundaries. Every
//! division truncates toward zero.

use crate::core::error::{FundError, FundResult};
use alloy_primitives::U256;
use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;

/// Decimal places of every normalized rate.
pub const WAD_DECIMALS: u8 = 18;

/// Denominator for weights, fee rates and slippage bounds.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// `10^18`, the wad representation of 1.0.
pub fn wad() -> U256 {
    pow10(WAD_DECIMALS)
}

/// `10^exp` as a `U256`, saturating past `10^77`.
pub fn pow10(exp: u8) -> U256 {
    let ten = U256::from(10u64);
    (0..exp).fold(U256::from(1u64), |acc, _| acc.saturating_mul(ten))
}

/// Computes `a * b / denominator` with a full-width intermediate, truncating.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> FundResult<U256> {
    a.checked_mul(b)
        .and_then(|product| product.checked_div(denominator))
        .ok_or(FundError::Overflow)
}

pub fn checked_add(a: U256, b: U256) -> FundResult<U256> {
    a.checked_add(b).ok_or(FundError::Overflow)
}

/// Returns `bps / 10000` of `amount`.
pub fn bps_of(amount: U256, bps: u64) -> FundResult<U256> {
    mul_div(amount, U256::from(bps), U256::from(BPS_DENOMINATOR))
}

/// Lowest acceptable output for a trade expected to return `expected`.
pub fn min_out_after_slippage(expected: U256, slippage_bps: u64) -> FundResult<U256> {
    if slippage_bps > BPS_DENOMINATOR {
        return Err(FundError::InvalidSlippage(slippage_bps));
    }
    bps_of(expected, BPS_DENOMINATOR - slippage_bps)
}

/// Moves an amount between two decimal precisions.
pub fn rescale(amount: U256, from_decimals: u8, to_decimals: u8) -> FundResult<U256> {
    if from_decimals == to_decimals {
        Ok(amount)
    } else if from_decimals < to_decimals {
        amount
            .checked_mul(pow10(to_decimals - from_decimals))
            .ok_or(FundError::Overflow)
    } else {
        Ok(amount / pow10(from_decimals - to_decimals))
    }
}

/// Converts `amount` (native units, `from_decimals`) at `rate_wad` quote units
/// per whole base unit into native quote units with `to_decimals`.
pub fn convert(amount: U256, from_decimals: u8, rate_wad: U256, to_decimals: u8) -> FundResult<U256> {
    let quote_wad = mul_div(amount, rate_wad, pow10(from_decimals))?;
    mul_div(quote_wad, pow10(to_decimals), wad())
}

/// Parses a human-readable amount into native units.
pub fn parse_units(value: Decimal, decimals: u8) -> Result<U256> {
    if value.is_sign_negative() {
        bail!("Amount {value} must not be negative");
    }
    let normalized = value.normalize();
    let scale = normalized.scale();
    if scale > u32::from(decimals) {
        bail!("Amount {value} has more than {decimals} fractional digits");
    }
    let mantissa = u128::try_from(normalized.mantissa())
        .with_context(|| format!("Amount {value} is out of range"))?;
    // scale <= decimals <= u8::MAX
    let factor = pow10(decimals - scale as u8);
    U256::from(mantissa)
        .checked_mul(factor)
        .with_context(|| format!("Amount {value} overflows"))
}

/// Renders native units as a decimal string, truncated to `max_fraction`
/// fractional digits with trailing zeros removed.
pub fn format_units(value: U256, decimals: u8, max_fraction: usize) -> String {
    let base = pow10(decimals);
    let whole = value / base;
    if decimals == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", (value % base).to_string(), width = decimals as usize);
    let shown: String = fraction.chars().take(max_fraction).collect();
    let shown = shown.trim_end_matches('0');
    if shown.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{shown}")
    }
}
