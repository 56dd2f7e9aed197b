//! Conversions between human-readable currency amounts and the smallest unit.

use anyhow::{bail, Context, Result};

/// Decimals of the native currency (ether ↔ wei).
pub const ETHER_DECIMALS: u32 = 18;

/// Parses a decimal amount such as `"0.1"` into the smallest unit.
pub fn parse_units(amount: &str, decimals: u32) -> Result<u128> {
    let amount = amount.trim();
    if amount.is_empty() {
        bail!("empty amount");
    }

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };

    if whole.is_empty() && fraction.is_empty() {
        bail!("invalid amount: {}", amount);
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
        bail!("invalid amount: {}", amount);
    }
    if fraction.len() > decimals as usize {
        bail!("amount {} has more than {} decimals", amount, decimals);
    }

    let scale = 10u128
        .checked_pow(decimals)
        .context("decimals out of range")?;

    let whole_value = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().context("amount out of range")?
    };

    let fraction_value = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse::<u128>().context("amount out of range")?
    };

    whole_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction_value))
        .context("amount out of range")
}

/// Formats a smallest-unit amount as a decimal string, trimming trailing zeros.
pub fn format_units(value: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = value / scale;
    let fraction = value % scale;

    if fraction == 0 {
        return format!("{}.0", whole);
    }

    let fraction = format!("{:0>width$}", fraction, width = decimals as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

/// `parse_units` with 18 decimals.
pub fn parse_ether(amount: &str) -> Result<u128> {
    parse_units(amount, ETHER_DECIMALS)
}

/// `format_units` with 18 decimals.
pub fn format_ether(value: u128) -> String {
    format_units(value, ETHER_DECIMALS)
}
