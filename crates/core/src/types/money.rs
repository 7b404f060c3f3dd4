//! Monetary amounts using decimal arithmetic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An amount with its currency.
///
/// Amounts are in the currency's standard unit (yen, not sen). Wallet
/// balances and order totals from the commerce backend use this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's standard unit.
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Money {
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// A zero amount in the given currency.
    #[must_use]
    pub const fn zero(currency_code: CurrencyCode) -> Self {
        Self::new(Decimal::ZERO, currency_code)
    }

    /// Format for display, e.g. `JPY 1200` or `USD 19.99`.
    #[must_use]
    pub fn display(&self) -> String {
        let scale = self.currency_code.minor_units();
        format!("{} {}", self.currency_code.code(), self.amount.round_dp(scale))
    }
}

/// ISO 4217 currency codes the storefront sells in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    JPY,
    TWD,
    THB,
    USD,
}

impl CurrencyCode {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::JPY => "JPY",
            Self::TWD => "TWD",
            Self::THB => "THB",
            Self::USD => "USD",
        }
    }

    /// Number of decimal places in the currency's minor unit.
    #[must_use]
    pub const fn minor_units(&self) -> u32 {
        match self {
            Self::JPY => 0,
            Self::TWD | Self::THB | Self::USD => 2,
        }
    }
}
