//! Compiled-in pegged exchange rates.

use std::collections::HashMap;

use cambio_common::{CurrencyCode, CurrencyPair};
use rust_decimal::Decimal;

use crate::rate::{Derivation, ExchangeRate, RateSource, Tier};

/// Official CFA franc parity: 655.957 francs per euro.
pub const CFA_PER_EURO: Decimal = Decimal::from_parts(655_957, 0, 0, false, 3);

/// A currency pegged to an anchor: one unit of `anchor` is worth `rate` units of the pegged currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peg {
    pub anchor: CurrencyCode,
    pub pegged: CurrencyCode,
    pub rate: Decimal,
    /// Authority that fixes the rate (e.g. the issuing central bank).
    pub authority: String,
}

/// Pegged rates that never expire and never touch the network.
///
/// Each peg is stored once, anchor to pegged currency. The inverse direction
/// is derived by reciprocal at lookup time, and two currencies pegged to the
/// same anchor get a fixed cross rate.
#[derive(Debug, Clone, Default)]
pub struct FixedRateTable {
    pegs: HashMap<CurrencyCode, Peg>,
}

impl FixedRateTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// CFA franc pegs to the euro (655.957 XOF/XAF per EUR).
    pub fn builtin() -> Self {
        Self::new()
            .with_peg(Peg {
                anchor: CurrencyCode::eur(),
                pegged: CurrencyCode::xof(),
                rate: CFA_PER_EURO,
                authority: "BCEAO".to_string(),
            })
            .with_peg(Peg {
                anchor: CurrencyCode::eur(),
                pegged: CurrencyCode::xaf(),
                rate: CFA_PER_EURO,
                authority: "BEAC".to_string(),
            })
    }

    /// Add a peg, replacing any existing peg of the same currency.
    pub fn with_peg(mut self, peg: Peg) -> Self {
        self.pegs.insert(peg.pegged.clone(), peg);
        self
    }

    /// Look up a fixed rate for `pair` in either direction.
    pub fn lookup(&self, pair: &CurrencyPair) -> Option<ExchangeRate> {
        if pair.is_identity() {
            return None;
        }

        if let Some(peg) = self.pegs.get(&pair.quote).filter(|p| p.anchor == pair.base) {
            return Some(Self::fixed(pair.clone(), peg.rate, &peg.authority, Derivation::Direct));
        }

        if let Some(peg) = self.pegs.get(&pair.base).filter(|p| p.anchor == pair.quote) {
            let forward = Self::fixed(pair.inverse(), peg.rate, &peg.authority, Derivation::Direct);
            return forward.inverse();
        }

        // Both sides pegged to the same anchor.
        let base_peg = self.pegs.get(&pair.base)?;
        let quote_peg = self.pegs.get(&pair.quote)?;
        if base_peg.anchor != quote_peg.anchor {
            return None;
        }
        let rate = quote_peg.rate.checked_div(base_peg.rate)?;
        let authority = format!("{}+{}", base_peg.authority, quote_peg.authority);
        Some(Self::fixed(
            pair.clone(),
            rate,
            &authority,
            Derivation::Cross {
                anchor: base_peg.anchor.clone(),
            },
        ))
    }

    /// Every pair answerable from the table, anchor first.
    pub fn pairs(&self) -> Vec<CurrencyPair> {
        let mut pairs: Vec<CurrencyPair> = self
            .pegs
            .values()
            .map(|p| CurrencyPair::new(p.anchor.clone(), p.pegged.clone()))
            .collect();
        pairs.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        pairs
    }

    pub fn len(&self) -> usize {
        self.pegs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pegs.is_empty()
    }

    fn fixed(pair: CurrencyPair, rate: Decimal, authority: &str, derivation: Derivation) -> ExchangeRate {
        ExchangeRate::new(pair, rate, RateSource::Fixed(authority.to_string()), Tier::Fixed)
            .with_derivation(derivation)
    }
}
