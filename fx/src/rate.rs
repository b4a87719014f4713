//! The exchange-rate value type shared by every resolution tier.

use std::fmt;

use cambio_common::{reciprocal, today, CurrencyCode, CurrencyPair, Timestamp};
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where a rate originally came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum RateSource {
    /// `base == quote`; synthesised without I/O.
    Identity,
    /// Compiled-in peg, named after the issuing authority.
    Fixed(String),
    /// Quoted by a live provider.
    Provider(String),
    /// Read back from the durable store.
    Historical,
}

impl RateSource {
    pub fn is_fixed(&self) -> bool {
        matches!(self, RateSource::Fixed(_) | RateSource::Identity)
    }
}

impl fmt::Display for RateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateSource::Identity => write!(f, "IDENTITY"),
            RateSource::Fixed(authority) => write!(f, "FIXED:{}", authority),
            RateSource::Provider(name) => write!(f, "PROVIDER:{}", name),
            RateSource::Historical => write!(f, "HISTORICAL"),
        }
    }
}

/// How the number was obtained from its source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    /// Quoted as-is for this direction.
    Direct,
    /// Reciprocal of a quote for the inverse pair.
    Reciprocal,
    /// Computed from two legs through an anchor currency.
    Cross { anchor: CurrencyCode },
}

/// Which resolution tier answered the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Identity,
    Fixed,
    Cache,
    Provider,
    /// Cache entry past its TTL, served because fresher tiers failed.
    StaleCache,
    Store,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Tier::Identity => "identity",
            Tier::Fixed => "fixed",
            Tier::Cache => "cache",
            Tier::Provider => "provider",
            Tier::StaleCache => "stale-cache",
            Tier::Store => "store",
        };
        write!(f, "{}", label)
    }
}

/// A resolved exchange rate: one unit of `pair.base` is worth `rate` units of `pair.quote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub pair: CurrencyPair,
    /// Always strictly positive.
    pub rate: Decimal,
    /// Market date the rate applies to.
    pub as_of: NaiveDate,
    pub source: RateSource,
    pub derivation: Derivation,
    /// When the rate was obtained from its source.
    pub resolved_at: Timestamp,
    pub tier: Tier,
}

impl ExchangeRate {
    /// A directly quoted rate, resolved now.
    pub fn new(pair: CurrencyPair, rate: Decimal, source: RateSource, tier: Tier) -> Self {
        Self {
            pair,
            rate,
            as_of: today(),
            source,
            derivation: Derivation::Direct,
            resolved_at: Utc::now(),
            tier,
        }
    }

    /// The synthetic `1` rate for a same-currency pair.
    pub fn identity(currency: CurrencyCode) -> Self {
        Self::new(
            CurrencyPair::new(currency.clone(), currency),
            Decimal::ONE,
            RateSource::Identity,
            Tier::Identity,
        )
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = as_of;
        self
    }

    pub fn with_resolved_at(mut self, resolved_at: Timestamp) -> Self {
        self.resolved_at = resolved_at;
        self
    }

    pub fn with_derivation(mut self, derivation: Derivation) -> Self {
        self.derivation = derivation;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// The same rate seen from the other side of the pair.
    ///
    /// Source, as-of date and resolution time carry over unchanged; a direct
    /// quote becomes a reciprocal one and vice versa.
    pub fn inverse(&self) -> Option<Self> {
        let derivation = match &self.derivation {
            Derivation::Direct => Derivation::Reciprocal,
            Derivation::Reciprocal => Derivation::Direct,
            cross @ Derivation::Cross { .. } => cross.clone(),
        };
        Some(Self {
            pair: self.pair.inverse(),
            rate: reciprocal(self.rate)?,
            as_of: self.as_of,
            source: self.source.clone(),
            derivation,
            resolved_at: self.resolved_at,
            tier: self.tier,
        })
    }

    /// Orient this rate so that its pair equals `pair`, inverting if needed.
    pub fn oriented(self, pair: &CurrencyPair) -> Option<Self> {
        if self.pair == *pair {
            Some(self)
        } else if self.pair.inverse() == *pair {
            self.inverse()
        } else {
            None
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.source.is_fixed()
    }

    pub fn is_stale(&self) -> bool {
        self.tier == Tier::StaleCache
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.derivation, Derivation::Cross { .. })
    }

    /// Age relative to now.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.resolved_at)
    }

    /// Whether the rate has outlived `ttl`. Fixed rates never expire.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        !self.is_fixed() && self.age() > ttl
    }
}
