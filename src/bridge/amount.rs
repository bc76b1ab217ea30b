//! Pre-flight amount validation
//!
//! Runs before any chain call. Checks, in order: well-formed positive decimal,
//! minimum transfer size, then available balance in base units.

use crate::error::TransferError;

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, Zero};
use ethers::types::U256;
use ethers::utils::format_units;
use std::str::FromStr;

/// USDC decimals on Ethereum
pub const USDC_DECIMALS: u32 = 6;

/// Largest token precision accepted from configuration
pub const MAX_DECIMALS: u32 = 18;

#[derive(Debug, Clone)]
pub struct AmountValidator {
    decimals: u32,
    minimum: BigDecimal,
}

impl AmountValidator {
    pub fn new(decimals: u32, minimum: BigDecimal) -> Self {
        Self { decimals, minimum }
    }

    /// Parse amount text into base units, without looking at any balance
    pub fn parse(&self, text: &str) -> Result<U256, TransferError> {
        let amount = parse_decimal(text)?;

        if amount.is_zero() {
            return Err(TransferError::InvalidAmount(text.to_string()));
        }

        if amount < self.minimum {
            return Err(TransferError::BelowMinimum {
                minimum: self.minimum.normalized().to_string(),
            });
        }

        // 10^decimals as an exact decimal
        let unit = BigDecimal::new(BigInt::from(1u8), -i64::from(self.decimals));
        let scaled = &amount * unit;
        if !scaled.is_integer() {
            return Err(TransferError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                text, self.decimals
            )));
        }

        let (units, _) = scaled.with_scale(0).into_bigint_and_exponent();
        U256::from_dec_str(&units.to_string())
            .map_err(|_| TransferError::InvalidAmount(format!("{} is too large", text)))
    }

    /// Full validation against the freshly fetched balance
    pub fn validate(&self, text: &str, available: U256) -> Result<U256, TransferError> {
        let value = self.parse(text)?;

        if value > available {
            return Err(TransferError::InsufficientBalance {
                have: self.format(available),
                need: self.format(value),
            });
        }

        Ok(value)
    }

    /// Human-readable token amount
    pub fn format(&self, value: U256) -> String {
        format_units(value, self.decimals).unwrap_or_else(|_| value.to_string())
    }
}

impl Default for AmountValidator {
    fn default() -> Self {
        Self::new(USDC_DECIMALS, BigDecimal::from(1))
    }
}

/// Plain decimal text only: digits with at most one '.'
fn parse_decimal(text: &str) -> Result<BigDecimal, TransferError> {
    let trimmed = text.trim();
    let mut dots = 0;
    let mut digits = 0;
    for c in trimmed.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return Err(TransferError::InvalidAmount(text.to_string())),
        }
    }
    if digits == 0 || dots > 1 {
        return Err(TransferError::InvalidAmount(text.to_string()));
    }

    BigDecimal::from_str(trimmed).map_err(|_| TransferError::InvalidAmount(text.to_string()))
}
