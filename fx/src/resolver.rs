//! Tiered exchange-rate resolution.
//!
//! Order, first success wins:
//! 1. identity (`base == quote`)
//! 2. fixed-rate table
//! 3. fresh cache entry
//! 4. provider chain, shared between concurrent callers of the same pair
//! 5. stale cache entry
//! 6. durable store, most recent on or before the as-of date
//!
//! Requests dated before today skip the cache and live providers and go
//! straight from the fixed table to the durable store.

use std::sync::Arc;
use std::time::Duration;

use cambio_common::{today, CurrencyPair, Deadline};
use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheLookup, SharedRateCache};
use crate::error::{FxError, FxResult};
use crate::fixed::FixedRateTable;
use crate::metrics::SharedMetrics;
use crate::provider::{ChainFailure, ProviderChain};
use crate::rate::{ExchangeRate, RateSource, Tier};
use crate::singleflight::SingleFlight;
use crate::store::RateStore;
use crate::writer::{BackgroundWriter, WriteOp};

/// Per-call resolution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateRequest {
    /// Market date; `None` means today.
    pub as_of: Option<NaiveDate>,
    /// Once exceeded, remaining provider attempts are skipped and the
    /// resolver falls through to the stale cache and the durable store.
    pub deadline: Option<Deadline>,
    /// Skip the fresh-cache tier. Never skips the fixed table.
    pub force_refresh: bool,
}

impl RateRequest {
    pub fn as_of(date: NaiveDate) -> Self {
        Self {
            as_of: Some(date),
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Default::default()
        }
    }
}

/// Outcome of a bulk provider refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Pairs re-resolved from a live provider.
    pub refreshed: Vec<CurrencyPair>,
    /// Pairs no provider could answer.
    pub failed: Vec<CurrencyPair>,
    /// Pairs answered by the fixed table, never sent to providers.
    pub skipped_fixed: Vec<CurrencyPair>,
}

type FlightResult = Result<ExchangeRate, ChainFailure>;

/// The rate façade used by the conversion engine.
pub struct RateResolver {
    fixed: FixedRateTable,
    cache: SharedRateCache,
    chain: Arc<ProviderChain>,
    store: Arc<dyn RateStore>,
    writer: Arc<BackgroundWriter>,
    flights: SingleFlight<CurrencyPair, FlightResult>,
    store_timeout: Duration,
    metrics: SharedMetrics,
}

impl RateResolver {
    pub fn new(
        fixed: FixedRateTable,
        cache: SharedRateCache,
        chain: Arc<ProviderChain>,
        store: Arc<dyn RateStore>,
        writer: Arc<BackgroundWriter>,
        store_timeout: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            fixed,
            cache,
            chain,
            store,
            writer,
            flights: SingleFlight::new(),
            store_timeout,
            metrics,
        }
    }

    pub fn fixed(&self) -> &FixedRateTable {
        &self.fixed
    }

    pub fn cache(&self) -> &SharedRateCache {
        &self.cache
    }

    /// Resolve a rate for `pair`, walking the tiers in order.
    #[instrument(skip(self, request), fields(pair = %pair))]
    pub async fn resolve(&self, pair: &CurrencyPair, request: RateRequest) -> FxResult<ExchangeRate> {
        let today = today();
        let as_of = request.as_of.unwrap_or(today);

        if pair.is_identity() {
            return Ok(ExchangeRate::identity(pair.base.clone()).with_as_of(as_of));
        }

        if let Some(rate) = self.fixed.lookup(pair) {
            debug!(source = %rate.source, "Fixed rate");
            return Ok(rate.with_as_of(as_of));
        }

        if as_of < today {
            return self.from_store(pair, as_of).await.ok_or_else(|| self.unavailable(pair));
        }

        if !request.force_refresh {
            if let CacheLookup::Fresh(rate) = self.cache.get(pair) {
                self.metrics.cache_hit();
                return Ok(rate);
            }
        }
        self.metrics.cache_miss();

        if !self.chain.is_empty() {
            match self.from_providers(pair, request).await {
                Some(Ok(rate)) => return Ok(rate),
                Some(Err(failure)) => {
                    warn!(
                        attempts = failure.attempts.len(),
                        deadline_exceeded = failure.deadline_exceeded,
                        "Provider chain exhausted"
                    );
                }
                None => warn!("Deadline exceeded waiting for providers"),
            }
        }

        if let Some(rate) = self.cache.get(pair).any() {
            warn!(tier = %rate.tier, resolved_at = %rate.resolved_at, "Serving cached rate as fallback");
            self.metrics.stale_fallback();
            return Ok(rate);
        }

        self.from_store(pair, as_of).await.ok_or_else(|| self.unavailable(pair))
    }

    /// Force provider re-resolution for each pair, bypassing the fresh cache.
    pub async fn refresh(&self, pairs: Vec<CurrencyPair>) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let mut live = Vec::new();

        for pair in pairs {
            if pair.is_identity() || self.fixed.lookup(&pair).is_some() {
                summary.skipped_fixed.push(pair);
            } else {
                live.push(pair);
            }
        }

        let results = join_all(live.iter().map(|pair| self.resolve(pair, RateRequest::refresh()))).await;
        for (pair, result) in live.into_iter().zip(results) {
            match result {
                Ok(rate) if rate.tier == Tier::Provider => summary.refreshed.push(pair),
                _ => summary.failed.push(pair),
            }
        }

        info!(
            refreshed = summary.refreshed.len(),
            failed = summary.failed.len(),
            skipped_fixed = summary.skipped_fixed.len(),
            "Rate refresh complete"
        );
        summary
    }

    /// `None` when the caller's deadline expired before the flight finished.
    async fn from_providers(&self, pair: &CurrencyPair, request: RateRequest) -> Option<FlightResult> {
        let cache = Arc::clone(&self.cache);
        let chain = Arc::clone(&self.chain);
        let writer = Arc::clone(&self.writer);
        let flight_pair = pair.clone();

        let flight = self.flights.run(pair.canonical(), move || async move {
            if !request.force_refresh {
                if let CacheLookup::Fresh(rate) = cache.get(&flight_pair) {
                    return Ok(rate);
                }
            }
            let rate = match chain.resolve(&flight_pair, request.deadline).await {
                Ok(rate) => rate,
                Err(failure) => return Err(failure),
            };
            cache.put(rate.clone());
            writer.submit(WriteOp::Rate(rate.clone()));
            Ok(rate)
        });

        let outcome = match request.deadline {
            Some(deadline) => tokio::time::timeout(deadline.remaining_std(), flight).await.ok()?,
            None => flight.await,
        };

        if !outcome.leader {
            self.metrics.singleflight_join();
        }

        match outcome.value {
            Some(Ok(rate)) => Some(rate.oriented(pair).ok_or_else(ChainFailure::default)),
            Some(Err(failure)) => Some(Err(failure)),
            None => Some(Err(ChainFailure::default())),
        }
    }

    /// Most recent stored rate for the pair, or the reciprocal of its inverse.
    async fn from_store(&self, pair: &CurrencyPair, as_of: NaiveDate) -> Option<ExchangeRate> {
        let stored = match self.read_store(pair, as_of).await {
            Some(rate) => Some(rate),
            None => self
                .read_store(&pair.inverse(), as_of)
                .await
                .and_then(|rate| rate.oriented(pair)),
        }?;

        debug!(as_of = %stored.as_of, "Serving rate from durable store");
        self.metrics.store_fallback();
        Some(stored.with_tier(Tier::Store))
    }

    async fn read_store(&self, pair: &CurrencyPair, as_of: NaiveDate) -> Option<ExchangeRate> {
        match tokio::time::timeout(self.store_timeout, self.store.get_latest_rate(pair, as_of)).await {
            Ok(Ok(rate)) => rate.map(|r| ExchangeRate {
                source: RateSource::Historical,
                ..r
            }),
            Ok(Err(e)) => {
                warn!(pair = %pair, error = %e, "Durable store read failed");
                None
            }
            Err(_) => {
                warn!(pair = %pair, timeout = ?self.store_timeout, "Durable store read timed out");
                None
            }
        }
    }

    fn unavailable(&self, pair: &CurrencyPair) -> FxError {
        self.metrics.rate_unavailable();
        FxError::RateUnavailable(pair.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RateCache;
    use crate::metrics::FxMetrics;
    use crate::provider::{MockFailure, MockRateProvider, RateProvider};
    use crate::store::MemoryRateStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Harness {
        resolver: Arc<RateResolver>,
        provider: Arc<MockRateProvider>,
        store: Arc<MemoryRateStore>,
        writer: Arc<BackgroundWriter>,
        metrics: SharedMetrics,
    }

    fn harness() -> Harness {
        let provider = Arc::new(MockRateProvider::new("p1"));
        let store = Arc::new(MemoryRateStore::new());
        let metrics: SharedMetrics = Arc::new(FxMetrics::new());
        let providers: Vec<Arc<dyn RateProvider>> = vec![provider.clone()];
        let chain = Arc::new(ProviderChain::new(providers, None, metrics.clone()));
        let writer = Arc::new(BackgroundWriter::new(store.clone(), metrics.clone()));
        let resolver = Arc::new(RateResolver::new(
            FixedRateTable::builtin(),
            Arc::new(RateCache::new()),
            chain,
            store.clone(),
            writer.clone(),
            Duration::from_secs(1),
            metrics.clone(),
        ));
        Harness {
            resolver,
            provider,
            store,
            writer,
            metrics,
        }
    }

    fn eur_usd() -> CurrencyPair {
        CurrencyPair::new("EUR", "USD")
    }

    #[tokio::test]
    async fn test_identity_and_fixed_need_no_io() {
        let h = harness();
        h.provider.set_failure(Some(MockFailure::Http(500)));
        h.store.set_offline(true);

        let identity = h.resolver.resolve(&CurrencyPair::new("USD", "USD"), RateRequest::default()).await.unwrap();
        assert_eq!(identity.rate, Decimal::ONE);
        assert_eq!(identity.tier, Tier::Identity);

        let fixed = h.resolver.resolve(&CurrencyPair::new("XOF", "EUR"), RateRequest::refresh()).await.unwrap();
        assert_eq!(fixed.tier, Tier::Fixed);
        assert_eq!(h.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_fail_resolution() {
        let h = harness();
        h.provider.set_rate("EUR", "USD", dec!(1.10));
        h.store.set_offline(true);

        let rate = h.resolver.resolve(&eur_usd(), RateRequest::default()).await.unwrap();
        assert_eq!(rate.tier, Tier::Provider);
        assert_eq!(rate.rate, dec!(1.10));

        h.writer.flush().await;
        assert_eq!(h.metrics.snapshot().persistence_failures, 1);

        h.store.set_offline(false);
        assert_eq!(h.store.rate_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_result_is_cached_and_persisted() {
        let h = harness();
        h.provider.set_rate("EUR", "USD", dec!(1.10));

        let first = h.resolver.resolve(&eur_usd(), RateRequest::default()).await.unwrap();
        assert_eq!(first.tier, Tier::Provider);

        let second = h.resolver.resolve(&eur_usd(), RateRequest::default()).await.unwrap();
        assert_eq!(second.tier, Tier::Cache);
        assert_eq!(second.rate, first.rate);

        let inverse = h.resolver.resolve(&eur_usd().inverse(), RateRequest::default()).await.unwrap();
        assert_eq!(inverse.tier, Tier::Cache);
        assert_eq!(h.provider.calls(), 1);

        h.resolver.writer.flush().await;
        assert_eq!(h.store.rate_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_served_when_providers_fail() {
        let h = harness();
        h.provider.set_failure(Some(MockFailure::Malformed));
        let old = ExchangeRate::new(eur_usd(), dec!(1.05), RateSource::Provider("p1".into()), Tier::Provider)
            .with_resolved_at(Utc::now() - ChronoDuration::hours(3));
        h.resolver.cache().put(old);

        let rate = h.resolver.resolve(&eur_usd(), RateRequest::default()).await.unwrap();
        assert_eq!(rate.rate, dec!(1.05));
        assert!(rate.is_stale());
        assert_eq!(h.metrics.snapshot().stale_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_store_fallback_derives_reciprocal() {
        let h = harness();
        h.provider.set_failure(Some(MockFailure::Http(502)));
        let stored = ExchangeRate::new(
            CurrencyPair::new("USD", "EUR"),
            dec!(0.8),
            RateSource::Provider("p1".into()),
            Tier::Provider,
        )
        .with_as_of(today() - ChronoDuration::days(2));
        h.store.upsert_rate(&stored).await.unwrap();

        let rate = h.resolver.resolve(&eur_usd(), RateRequest::default()).await.unwrap();
        assert_eq!(rate.rate, dec!(1.25));
        assert_eq!(rate.tier, Tier::Store);
        assert_eq!(rate.source, RateSource::Historical);
    }

    #[tokio::test]
    async fn test_historical_request_skips_providers() {
        let h = harness();
        h.provider.set_rate("EUR", "USD", dec!(1.10));
        let day = today() - ChronoDuration::days(30);
        let stored = ExchangeRate::new(eur_usd(), dec!(1.07), RateSource::Provider("p1".into()), Tier::Provider)
            .with_as_of(day);
        h.store.upsert_rate(&stored).await.unwrap();

        let rate = h.resolver.resolve(&eur_usd(), RateRequest::as_of(day)).await.unwrap();
        assert_eq!(rate.rate, dec!(1.07));
        assert_eq!(h.provider.calls(), 0);

        let err = h
            .resolver
            .resolve(&eur_usd(), RateRequest::as_of(day - ChronoDuration::days(1)))
            .await
            .unwrap_err();
        assert_eq!(err, FxError::RateUnavailable(eur_usd()));
    }

    #[tokio::test]
    async fn test_all_tiers_exhausted() {
        let h = harness();
        h.store.set_offline(true);

        let err = h.resolver.resolve(&eur_usd(), RateRequest::default()).await.unwrap_err();
        assert_eq!(err, FxError::RateUnavailable(eur_usd()));
        assert_eq!(h.metrics.snapshot().rates_unavailable, 1);
    }

    #[tokio::test]
    async fn test_deadline_falls_through_to_stale() {
        let h = harness();
        h.provider.set_rate("EUR", "USD", dec!(1.10));
        h.provider.set_delay(Some(Duration::from_millis(150)));
        let old = ExchangeRate::new(eur_usd(), dec!(1.02), RateSource::Provider("p1".into()), Tier::Provider)
            .with_resolved_at(Utc::now() - ChronoDuration::hours(3));
        h.resolver.cache().put(old);

        let request = RateRequest::default().with_deadline(Deadline::after(ChronoDuration::milliseconds(20)));
        let rate = h.resolver.resolve(&eur_usd(), request).await.unwrap();
        assert_eq!(rate.rate, dec!(1.02));
        assert!(rate.is_stale());
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_provider_call() {
        let h = harness();
        h.provider.set_rate("EUR", "USD", dec!(1.10));
        h.provider.set_delay(Some(Duration::from_millis(50)));

        let tasks = (0..50).map(|i| {
            let resolver = Arc::clone(&h.resolver);
            let pair = if i % 2 == 0 { eur_usd() } else { eur_usd().inverse() };
            tokio::spawn(async move { resolver.resolve(&pair, RateRequest::default()).await })
        });
        let results = join_all(tasks).await;

        assert_eq!(h.provider.calls(), 1);
        for (i, result) in results.into_iter().enumerate() {
            let rate = result.unwrap().unwrap();
            let expected = if i % 2 == 0 { dec!(1.10) } else { Decimal::ONE / dec!(1.10) };
            assert_eq!(rate.rate, expected);
        }
    }

    #[tokio::test]
    async fn test_refresh_summary() {
        let h = harness();
        h.provider.set_rate("EUR", "USD", dec!(1.10));

        let summary = h
            .resolver
            .refresh(vec![eur_usd(), CurrencyPair::new("EUR", "XOF"), CurrencyPair::new("EUR", "GBP")])
            .await;

        assert_eq!(summary.refreshed, vec![eur_usd()]);
        assert_eq!(summary.failed, vec![CurrencyPair::new("EUR", "GBP")]);
        assert_eq!(summary.skipped_fixed, vec![CurrencyPair::new("EUR", "XOF")]);
    }
}
