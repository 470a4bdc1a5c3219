//! Money types for Skillmesh
//!
//! Amounts are stored in minor units (cents) as i64 with an attached
//! currency. All arithmetic is checked; mixing currencies is an error.

use crate::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported settlement currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Inr,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Inr => "INR",
        }
    }

    /// Minor units per major unit (all supported currencies use 2 decimals)
    pub fn minor_per_major(&self) -> i64 {
        100
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::Usd
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A currency-tagged amount in minor units
///
/// Session prices are cent-denominated, so i64 minor units are exact and
/// comfortably large. Negative amounts never appear on wallets or escrows;
/// the ledger records direction via the transaction type instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    /// Value in minor units (e.g. cents)
    pub minor: i64,
    /// The currency
    pub currency: Currency,
}

impl Amount {
    /// Create a new amount from minor units
    pub fn new(minor: i64, currency: Currency) -> Self {
        Self { minor, currency }
    }

    /// Create a zero amount
    pub fn zero(currency: Currency) -> Self {
        Self { minor: 0, currency }
    }

    /// Create a USD amount from minor units
    pub fn usd(minor: i64) -> Self {
        Self::new(minor, Currency::Usd)
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.minor == 0
    }

    /// Check if the amount is strictly positive
    pub fn is_positive(&self) -> bool {
        self.minor > 0
    }

    /// Checked addition (currencies must match)
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.require_same_currency(other)?;
        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or(MarketError::AmountOverflow)?;
        Ok(Self { minor, ..self })
    }

    /// Checked subtraction (currencies must match; result may not go negative)
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.require_same_currency(other)?;
        let minor = self
            .minor
            .checked_sub(other.minor)
            .filter(|m| *m >= 0)
            .ok_or(MarketError::AmountOverflow)?;
        Ok(Self { minor, ..self })
    }

    fn require_same_currency(self, other: Self) -> Result<()> {
        if self.currency != other.currency {
            return Err(MarketError::CurrencyMismatch {
                expected: self.currency.code().to_string(),
                actual: other.currency.code().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let per = self.currency.minor_per_major();
        write!(
            f,
            "{}.{:02} {}",
            self.minor / per,
            (self.minor % per).abs(),
            self.currency
        )
    }
}
