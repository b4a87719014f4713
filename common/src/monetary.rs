//! Monetary types: currency codes, currency pairs and amounts.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommonError;

/// ISO 4217-style currency code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Create a new currency code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn xof() -> Self {
        Self::new("XOF")
    }

    pub fn xaf() -> Self {
        Self::new("XAF")
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CurrencyCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CurrencyCode {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl FromStr for CurrencyCode {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = Self::new(s);
        if code.0.len() < 3 || !code.0.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CommonError::InvalidCurrencyCode(s.to_string()));
        }
        Ok(code)
    }
}

/// An ordered currency pair: one unit of `base` is worth `rate` units of `quote`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: CurrencyCode,
    pub quote: CurrencyCode,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(base: impl Into<CurrencyCode>, quote: impl Into<CurrencyCode>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }

    /// Whether both sides are the same currency.
    pub fn is_identity(&self) -> bool {
        self.base == self.quote
    }

    /// The canonical direction of this pair: codes in lexicographic order.
    ///
    /// `A/B` and `B/A` share one canonical form, which is what caches and
    /// in-flight registries key on.
    pub fn canonical(&self) -> Self {
        if self.is_canonical() {
            self.clone()
        } else {
            self.inverse()
        }
    }

    /// Whether this pair is already in canonical direction.
    pub fn is_canonical(&self) -> bool {
        self.base <= self.quote
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = CommonError;

    /// Parses `EUR/USD`, `EUR-USD` or `EURUSD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (base, quote) = match s.find(['/', '-']) {
            Some(idx) => (&s[..idx], &s[idx + 1..]),
            None if s.len() == 6 => (&s[..3], &s[3..]),
            None => return Err(CommonError::InvalidCurrencyPair(s.to_string())),
        };
        Ok(Self {
            base: base.parse()?,
            quote: quote.parse()?,
        })
    }
}

/// Round `value` half-to-even to exactly `digits` decimal places.
///
/// The result always carries a scale of `digits`, so `1` rounded to two
/// places is `1.00`.
pub fn round_half_even(value: Decimal, digits: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(digits, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(digits);
    rounded
}

/// Reciprocal of a positive rate.
pub fn reciprocal(rate: Decimal) -> Option<Decimal> {
    if rate <= Decimal::ZERO {
        return None;
    }
    Decimal::ONE.checked_div(rate)
}
