//! Money conversion helpers.
//!
//! All balances are stored as `i64` minor units; the scale factor is
//! `10^decimals` per currency. Conversion between the internal representation
//! and the client-facing string form happens only at the API edge, and only
//! through this module. No silent truncation: inputs with excess precision
//! are rejected.

use rust_decimal::prelude::*;
use thiserror::Error;

use crate::core_types::Amount;

/// Money conversion errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("amount must be positive")]
    NotPositive,

    #[error("amount too large, would overflow")]
    Overflow,

    #[error("invalid amount format: {0}")]
    InvalidFormat(String),
}

/// Decimal places for a currency's minor units. The engine itself never
/// consults this (it works in minor units); display formatting does.
pub fn currency_decimals(code: &str) -> u32 {
    match code {
        // Zero-decimal fiat currencies
        "JPY" | "KRW" | "VND" | "CLP" => 0,
        _ => 2,
    }
}

/// Parse a client-provided decimal string into minor units.
///
/// Rejects zero, negatives, and fractional digits beyond `decimals`.
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<Amount, MoneyError> {
    let s = amount_str.trim();
    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if s.starts_with('-') || s.starts_with('+') {
        return Err(MoneyError::NotPositive);
    }

    let value =
        Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
    if value <= Decimal::ZERO {
        return Err(MoneyError::NotPositive);
    }
    if value.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: value.scale(),
            max: decimals,
        });
    }

    let scaled = value
        .checked_mul(Decimal::from(10i64.pow(decimals)))
        .ok_or(MoneyError::Overflow)?;
    scaled.trunc().to_i64().ok_or(MoneyError::Overflow)
}

/// Format minor units as a human-readable decimal string.
pub fn format_amount(minor: Amount, decimals: u32) -> String {
    let value = Decimal::from(minor) / Decimal::from(10i64.pow(decimals));
    format!("{:.prec$}", value, prec = decimals as usize)
}

/// Checked signed addition for running balances.
pub fn checked_add(balance: Amount, delta: Amount) -> Result<Amount, MoneyError> {
    balance.checked_add(delta).ok_or(MoneyError::Overflow)
}
