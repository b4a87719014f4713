//! Currency catalog: the static registry of supported currencies.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;
use crate::monetary::{round_half_even, CurrencyCode};

/// Where the display symbol goes relative to the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolPosition {
    Before,
    After,
}

/// A supported currency and its display conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: CurrencyCode,
    pub name: String,
    /// Decimal places of the minor unit (2 for cents, 0 for CFA francs).
    pub minor_unit_digits: u32,
    pub symbol: String,
    pub symbol_position: SymbolPosition,
    pub grouping_separator: String,
    pub decimal_separator: String,
    /// ISO 3166 alpha-2 codes of countries using the currency.
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Currency {
    #[allow(clippy::too_many_arguments)]
    fn builtin(
        code: &str,
        name: &str,
        minor_unit_digits: u32,
        symbol: &str,
        symbol_position: SymbolPosition,
        grouping_separator: &str,
        decimal_separator: &str,
        countries: &[&str],
    ) -> Self {
        Self {
            code: CurrencyCode::new(code),
            name: name.to_string(),
            minor_unit_digits,
            symbol: symbol.to_string(),
            symbol_position,
            grouping_separator: grouping_separator.to_string(),
            decimal_separator: decimal_separator.to_string(),
            countries: countries.iter().map(|c| c.to_string()).collect(),
            active: true,
        }
    }

    /// Round an amount to this currency's minor unit (half-to-even).
    pub fn round(&self, amount: Decimal) -> Decimal {
        round_half_even(amount, self.minor_unit_digits)
    }

    /// Render an amount with this currency's separators and symbol.
    ///
    /// `1234567.891` renders as `1 234 567,89 €` for EUR and as
    /// `$1,234,567.89` for USD.
    pub fn format_amount(&self, amount: Decimal) -> String {
        let rounded = self.round(amount);
        let negative = rounded.is_sign_negative() && !rounded.is_zero();
        let digits = rounded.abs().to_string();
        let (integer, fraction) = match digits.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (digits.as_str(), None),
        };

        let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
        for (idx, ch) in integer.chars().enumerate() {
            if idx > 0 && (integer.len() - idx) % 3 == 0 {
                grouped.push_str(&self.grouping_separator);
            }
            grouped.push(ch);
        }

        let mut number = String::new();
        if negative {
            number.push('-');
        }
        number.push_str(&grouped);
        if let Some(fraction) = fraction.filter(|_| self.minor_unit_digits > 0) {
            number.push_str(&self.decimal_separator);
            number.push_str(fraction);
        }

        match self.symbol_position {
            SymbolPosition::Before => format!("{}{}", self.symbol, number),
            SymbolPosition::After => format!("{} {}", number, self.symbol),
        }
    }
}

/// Immutable registry of currencies, loaded once at engine start.
#[derive(Debug, Clone)]
pub struct CurrencyCatalog {
    currencies: HashMap<CurrencyCode, Currency>,
}

impl CurrencyCatalog {
    /// Build a catalog from an explicit list. Later duplicates replace earlier ones.
    pub fn new(currencies: impl IntoIterator<Item = Currency>) -> Self {
        Self {
            currencies: currencies
                .into_iter()
                .map(|c| (c.code.clone(), c))
                .collect(),
        }
    }

    /// The built-in catalog: West/Central African and major global currencies.
    pub fn builtin() -> Self {
        use SymbolPosition::{After, Before};

        Self::new([
            Currency::builtin("XOF", "CFA Franc BCEAO", 0, "F CFA", After, " ", ",", &["BJ", "BF", "CI", "GW", "ML", "NE", "SN", "TG"]),
            Currency::builtin("XAF", "CFA Franc BEAC", 0, "F CFA", After, " ", ",", &["CM", "CF", "TD", "CG", "GQ", "GA"]),
            Currency::builtin("NGN", "Nigerian Naira", 2, "₦", Before, ",", ".", &["NG"]),
            Currency::builtin("GHS", "Ghanaian Cedi", 2, "₵", Before, ",", ".", &["GH"]),
            Currency::builtin("MAD", "Moroccan Dirham", 2, "MAD", After, " ", ",", &["MA"]),
            Currency::builtin("TND", "Tunisian Dinar", 3, "TND", After, " ", ",", &["TN"]),
            Currency::builtin("EUR", "Euro", 2, "€", After, " ", ",", &["FR", "DE", "ES", "IT", "BE", "NL", "AT", "PT"]),
            Currency::builtin("USD", "US Dollar", 2, "$", Before, ",", ".", &["US"]),
            Currency::builtin("CAD", "Canadian Dollar", 2, "CA$", Before, ",", ".", &["CA"]),
            Currency::builtin("GBP", "Pound Sterling", 2, "£", Before, ",", ".", &["GB"]),
            Currency::builtin("CHF", "Swiss Franc", 2, "CHF", After, "'", ".", &["CH"]),
        ])
    }

    /// Look up a currency by code.
    pub fn lookup(&self, code: &CurrencyCode) -> Result<&Currency, CommonError> {
        self.currencies
            .get(code)
            .ok_or_else(|| CommonError::UnknownCurrency(code.clone()))
    }

    pub fn contains(&self, code: &CurrencyCode) -> bool {
        self.currencies.contains_key(code)
    }

    /// All currencies, sorted by code.
    pub fn all(&self) -> Vec<&Currency> {
        let mut all: Vec<&Currency> = self.currencies.values().collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    /// Active currencies, sorted by code.
    pub fn active(&self) -> Vec<&Currency> {
        self.all().into_iter().filter(|c| c.active).collect()
    }

    /// Currencies used in a given country.
    pub fn by_country(&self, country: &str) -> Vec<&Currency> {
        let country = country.to_uppercase();
        self.all()
            .into_iter()
            .filter(|c| c.countries.iter().any(|cc| *cc == country))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.currencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }
}

impl Default for CurrencyCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
