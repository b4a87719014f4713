//! FX rate caching with TTL support.

use std::collections::HashSet;
use std::sync::Arc;

use cambio_common::time::constants::{DEFAULT_RATE_TTL_SECS, MAX_RATE_TTL_SECS};
use cambio_common::CurrencyPair;
use chrono::Duration;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rate::{ExchangeRate, Tier};

/// Cache key: canonical pair plus whether the rate was derived through an anchor.
///
/// Cross rates live beside direct quotes instead of overwriting them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    pair: CurrencyPair,
    derived: bool,
}

impl CacheKey {
    fn of(pair: &CurrencyPair, derived: bool) -> Self {
        Self {
            pair: pair.canonical(),
            derived,
        }
    }
}

/// Configuration for rate cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateCacheConfig {
    /// Freshness window for non-fixed rates, in seconds.
    pub default_ttl_secs: u64,
    /// Stricter freshness window for critical pairs, in seconds.
    pub critical_ttl_secs: Option<u64>,
    /// Maximum number of entries.
    pub max_entries: usize,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: DEFAULT_RATE_TTL_SECS,
            critical_ttl_secs: None,
            max_entries: 10_000,
        }
    }
}

impl RateCacheConfig {
    /// Default TTL, capped at `MAX_RATE_TTL_SECS`.
    pub fn default_ttl(&self) -> Duration {
        ttl_from_secs(self.default_ttl_secs)
    }

    pub fn critical_ttl(&self) -> Option<Duration> {
        self.critical_ttl_secs.map(ttl_from_secs)
    }
}

fn ttl_from_secs(secs: u64) -> Duration {
    i64::try_from(secs.min(MAX_RATE_TTL_SECS))
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Within TTL (or fixed).
    Fresh(ExchangeRate),
    /// Past TTL but kept as a degraded fallback.
    Stale(ExchangeRate),
    Miss,
}

impl CacheLookup {
    pub fn fresh(self) -> Option<ExchangeRate> {
        match self {
            CacheLookup::Fresh(rate) => Some(rate),
            _ => None,
        }
    }

    /// Any entry, fresh or stale.
    pub fn any(self) -> Option<ExchangeRate> {
        match self {
            CacheLookup::Fresh(rate) | CacheLookup::Stale(rate) => Some(rate),
            CacheLookup::Miss => None,
        }
    }
}

/// Thread-safe rate cache with TTL.
///
/// One canonical direction is stored per pair; reads in the other direction
/// are answered by reciprocal. Expired entries are kept and reported as
/// stale rather than dropped.
pub struct RateCache {
    cache: DashMap<CacheKey, ExchangeRate>,
    critical: HashSet<CurrencyPair>,
    config: RateCacheConfig,
}

impl RateCache {
    /// Create a new rate cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(RateCacheConfig::default())
    }

    /// Create a new rate cache with custom configuration.
    pub fn with_config(config: RateCacheConfig) -> Self {
        Self::with_critical_pairs(config, Vec::new())
    }

    /// Create a cache where `critical` pairs use the stricter critical TTL.
    pub fn with_critical_pairs(config: RateCacheConfig, critical: Vec<CurrencyPair>) -> Self {
        Self {
            cache: DashMap::new(),
            critical: critical.iter().map(CurrencyPair::canonical).collect(),
            config,
        }
    }

    /// Get a rate for `pair` in the requested direction.
    ///
    /// Direct quotes win over derived cross rates when both are fresh; a
    /// fresh entry of either kind wins over a stale one.
    pub fn get(&self, pair: &CurrencyPair) -> CacheLookup {
        let direct = self.lookup(pair, false);
        let derived = self.lookup(pair, true);

        let lookup = match (direct, derived) {
            (CacheLookup::Fresh(rate), _) | (_, CacheLookup::Fresh(rate)) => CacheLookup::Fresh(rate),
            (CacheLookup::Stale(rate), _) | (_, CacheLookup::Stale(rate)) => CacheLookup::Stale(rate),
            _ => CacheLookup::Miss,
        };

        match &lookup {
            CacheLookup::Fresh(_) => debug!(pair = %pair, "Cache hit"),
            CacheLookup::Stale(_) => debug!(pair = %pair, "Cache entry stale"),
            CacheLookup::Miss => debug!(pair = %pair, "Cache miss"),
        }
        lookup
    }

    fn lookup(&self, pair: &CurrencyPair, derived: bool) -> CacheLookup {
        let key = CacheKey::of(pair, derived);
        let Some(entry) = self.cache.get(&key).map(|e| e.value().clone()) else {
            return CacheLookup::Miss;
        };
        let ttl = self.ttl_for(pair);
        let Some(rate) = entry.oriented(pair) else {
            return CacheLookup::Miss;
        };

        if rate.is_expired(ttl) {
            CacheLookup::Stale(rate.with_tier(Tier::StaleCache))
        } else {
            CacheLookup::Fresh(rate.with_tier(Tier::Cache))
        }
    }

    /// Insert a rate. Last write wins for a given pair and derivation kind.
    pub fn put(&self, rate: ExchangeRate) {
        if rate.pair.is_identity() {
            return;
        }
        let key = CacheKey::of(&rate.pair, rate.is_derived());
        let Some(stored) = rate.oriented(&key.pair) else {
            return;
        };

        if self.cache.len() >= self.config.max_entries && !self.cache.contains_key(&key) {
            self.evict_oldest();
        }

        debug!(pair = %key.pair, derived = key.derived, "Cache put");
        self.cache.insert(key, stored);
    }

    /// Remove both the direct and derived entries for a pair.
    pub fn invalidate(&self, pair: &CurrencyPair) {
        self.cache.remove(&CacheKey::of(pair, false));
        self.cache.remove(&CacheKey::of(pair, true));
    }

    /// Clear all cached rates.
    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    /// Get the number of entries in cache.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Canonical pairs with at least one entry, non-fixed only.
    pub fn cached_pairs(&self) -> Vec<CurrencyPair> {
        let mut pairs: Vec<CurrencyPair> = self
            .cache
            .iter()
            .filter(|e| !e.value().is_fixed())
            .map(|e| e.key().pair.clone())
            .collect();
        pairs.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        pairs.dedup();
        pairs
    }

    /// TTL applying to `pair`.
    pub fn ttl_for(&self, pair: &CurrencyPair) -> Duration {
        match self.config.critical_ttl() {
            Some(ttl) if self.critical.contains(&pair.canonical()) => ttl,
            _ => self.config.default_ttl(),
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let total = self.cache.len();
        let fresh = self
            .cache
            .iter()
            .filter(|e| !e.value().is_expired(self.ttl_for(&e.key().pair)))
            .count();

        CacheStats {
            total_entries: total,
            fresh_entries: fresh,
            stale_entries: total - fresh,
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .cache
            .iter()
            .filter(|e| !e.value().is_fixed())
            .min_by_key(|e| e.value().resolved_at)
            .map(|e| e.key().clone());

        if let Some(key) = oldest {
            debug!(pair = %key.pair, "Evicting oldest cache entry");
            self.cache.remove(&key);
        }
    }
}

impl Default for RateCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
}

/// Shared rate cache.
pub type SharedRateCache = Arc<RateCache>;
