//! Main FX engine implementation.

use std::sync::{Arc, Weak};

use cambio_common::{
    CompanyId, ConversionId, CurrencyCatalog, CurrencyCode, CurrencyPair, FiscalCalendar, Timestamp,
};
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::accountant::ConversionAccountant;
use crate::cache::{CacheLookup, RateCache, SharedRateCache};
use crate::config::FxEngineConfig;
use crate::conversion::{ConversionEngine, ConversionItem, ConversionResult};
use crate::error::{FxError, FxResult};
use crate::fixed::FixedRateTable;
use crate::metrics::{FxMetrics, SharedMetrics};
use crate::provider::{HttpRateProvider, ProviderChain, RateProvider};
use crate::rate::ExchangeRate;
use crate::resolver::{RateRequest, RateResolver, RefreshSummary};
use crate::store::{ConversionRecord, GainLossSnapshot, HistoryFilter, RateStore};
use crate::writer::BackgroundWriter;

#[derive(Default)]
struct EngineState {
    last_refresh: Option<Timestamp>,
    refresher: Option<JoinHandle<()>>,
    closed: bool,
}

/// The main FX engine.
///
/// Owns the currency catalog, the fixed-rate table and the rate cache.
/// Providers and the durable store are injected at construction.
pub struct FxEngine {
    catalog: Arc<CurrencyCatalog>,
    resolver: Arc<RateResolver>,
    converter: ConversionEngine,
    accountant: ConversionAccountant,
    writer: Arc<BackgroundWriter>,
    metrics: SharedMetrics,
    config: FxEngineConfig,
    state: RwLock<EngineState>,
}

impl FxEngine {
    /// Create a new FX engine with the built-in catalog and fixed-rate table.
    pub fn new(
        providers: Vec<Arc<dyn RateProvider>>,
        store: Arc<dyn RateStore>,
        config: FxEngineConfig,
    ) -> FxResult<Self> {
        Self::with_tables(
            providers,
            store,
            config,
            CurrencyCatalog::builtin(),
            FixedRateTable::builtin(),
        )
    }

    /// Create an engine with HTTP providers built from `config.providers`.
    pub fn from_config(config: FxEngineConfig, store: Arc<dyn RateStore>) -> FxResult<Self> {
        let providers = config
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| HttpRateProvider::new(p.clone()).map(|p| Arc::new(p) as Arc<dyn RateProvider>))
            .collect::<FxResult<Vec<_>>>()?;
        Self::new(providers, store, config)
    }

    /// Create an engine with a custom catalog and fixed-rate table.
    pub fn with_tables(
        providers: Vec<Arc<dyn RateProvider>>,
        store: Arc<dyn RateStore>,
        config: FxEngineConfig,
        catalog: CurrencyCatalog,
        fixed: FixedRateTable,
    ) -> FxResult<Self> {
        config.validate().map_err(FxError::Config)?;
        let calendar = FiscalCalendar::new(config.fiscal_year_start_month)?;

        if let Some(pair) = config.critical_pairs.iter().find(|p| !in_catalog(&catalog, p)) {
            return Err(FxError::Config(format!("Critical pair {} uses an unknown currency", pair)));
        }
        if let Some(anchor) = &config.anchor_currency {
            if !catalog.contains(anchor) {
                return Err(FxError::Config(format!("Anchor currency {} is not in the catalog", anchor)));
            }
        }

        let metrics: SharedMetrics = Arc::new(FxMetrics::new());
        let catalog = Arc::new(catalog);
        let cache: SharedRateCache = Arc::new(RateCache::with_critical_pairs(
            config.cache.clone(),
            config.critical_pairs.clone(),
        ));
        let chain = Arc::new(ProviderChain::new(
            providers,
            config.anchor_currency.clone(),
            Arc::clone(&metrics),
        ));
        let writer = Arc::new(
            BackgroundWriter::new(Arc::clone(&store), Arc::clone(&metrics)).with_timeout(config.store_timeout()),
        );
        let resolver = Arc::new(RateResolver::new(
            fixed,
            cache,
            Arc::clone(&chain),
            Arc::clone(&store),
            Arc::clone(&writer),
            config.store_timeout(),
            Arc::clone(&metrics),
        ));
        let converter = ConversionEngine::new(Arc::clone(&catalog), Arc::clone(&resolver), Arc::clone(&metrics));
        let accountant = ConversionAccountant::new(store, Arc::clone(&writer), calendar, Arc::clone(&metrics));

        info!(
            providers = ?chain.names(),
            currencies = catalog.len(),
            fixed_pairs = resolver.fixed().len(),
            "FX engine initialized"
        );

        Ok(Self {
            catalog,
            resolver,
            converter,
            accountant,
            writer,
            metrics,
            config,
            state: RwLock::new(EngineState::default()),
        })
    }

    /// Get the rate for `base → quote`, optionally as of a past date.
    pub async fn get_rate(
        &self,
        base: &CurrencyCode,
        quote: &CurrencyCode,
        as_of: Option<NaiveDate>,
    ) -> FxResult<ExchangeRate> {
        let request = RateRequest {
            as_of,
            ..Default::default()
        };
        self.get_rate_with(base, quote, request).await
    }

    /// Get a rate with full control over date, deadline and refresh.
    #[instrument(skip(self, request), fields(base = %base, quote = %quote))]
    pub async fn get_rate_with(
        &self,
        base: &CurrencyCode,
        quote: &CurrencyCode,
        request: RateRequest,
    ) -> FxResult<ExchangeRate> {
        self.catalog.lookup(base)?;
        self.catalog.lookup(quote)?;
        let pair = CurrencyPair::new(base.clone(), quote.clone());
        self.resolver.resolve(&pair, request).await
    }

    /// Convert an amount to another currency.
    #[instrument(skip(self), fields(from = %from, to = %to, amount = %amount))]
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
        as_of: Option<NaiveDate>,
    ) -> FxResult<ConversionResult> {
        let request = RateRequest {
            as_of,
            ..Default::default()
        };
        self.converter.convert(amount, from, to, request).await
    }

    /// Convert several amounts; one item's failure never aborts the others.
    pub async fn convert_batch(&self, items: &[ConversionItem]) -> Vec<FxResult<ConversionResult>> {
        self.converter.convert_batch(items).await
    }

    /// Queue an audit record of `result` for `company`. Never fails.
    pub fn record_conversion(
        &self,
        company: &CompanyId,
        result: &ConversionResult,
        reference: Option<String>,
    ) -> ConversionId {
        self.accountant.record(company, result, reference)
    }

    pub async fn get_conversion_history(
        &self,
        company: &CompanyId,
        filter: &HistoryFilter,
    ) -> FxResult<Vec<ConversionRecord>> {
        self.accountant.history(company, filter).await
    }

    pub async fn compute_gain_loss(&self, company: &CompanyId, fiscal_year: i32) -> FxResult<Vec<GainLossSnapshot>> {
        self.accountant.compute_gain_loss(company, fiscal_year).await
    }

    /// Force provider re-resolution of `pairs`, or of every critical and
    /// cached pair when `None`. Fixed pairs are never sent to providers, and
    /// pairs with a currency outside the catalog are reported as failed.
    pub async fn refresh_rates(&self, pairs: Option<Vec<CurrencyPair>>) -> RefreshSummary {
        let pairs = pairs.unwrap_or_else(|| self.refresh_targets());
        let (known, unknown): (Vec<_>, Vec<_>) = pairs.into_iter().partition(|p| in_catalog(&self.catalog, p));
        if !unknown.is_empty() {
            warn!(pairs = ?unknown, "Skipping refresh of pairs with unknown currencies");
        }

        let mut summary = self.resolver.refresh(known).await;
        summary.failed.extend(unknown);

        if summary.failed.is_empty() {
            self.state.write().last_refresh = Some(Utc::now());
        }
        summary
    }

    fn refresh_targets(&self) -> Vec<CurrencyPair> {
        let mut targets: Vec<CurrencyPair> = Vec::new();
        let cached = self.resolver.cache().cached_pairs();
        for pair in self.config.critical_pairs.iter().cloned().chain(cached) {
            if !targets.iter().any(|t| t.canonical() == pair.canonical()) {
                targets.push(pair);
            }
        }
        targets
    }

    pub fn invalidate(&self, pair: &CurrencyPair) {
        self.resolver.cache().invalidate(pair);
    }

    pub fn invalidate_all(&self) {
        self.resolver.cache().invalidate_all();
    }

    pub fn catalog(&self) -> &CurrencyCatalog {
        &self.catalog
    }

    /// Render `amount` in `code`'s display conventions.
    pub fn format_amount(&self, amount: Decimal, code: &CurrencyCode) -> FxResult<String> {
        Ok(self.catalog.lookup(code)?.format_amount(amount))
    }

    /// Whether an amount in `from` has to be converted to be expressed in `to`.
    pub fn needs_conversion(&self, from: &CurrencyCode, to: &CurrencyCode) -> bool {
        from != to
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &FxEngineConfig {
        &self.config
    }

    /// Current cache and refresh state.
    pub fn health(&self) -> EngineHealth {
        let cache = self.resolver.cache();
        let stats = cache.stats();
        let is_healthy = self.config.critical_pairs.iter().all(|pair| {
            self.resolver.fixed().lookup(pair).is_some() || matches!(cache.get(pair), CacheLookup::Fresh(_))
        });

        EngineHealth {
            cached_pairs: cache.cached_pairs().len(),
            fresh_entries: stats.fresh_entries,
            stale_entries: stats.stale_entries,
            fixed_pairs: self.resolver.fixed().len(),
            last_refresh: self.state.read().last_refresh,
            is_healthy,
        }
    }

    /// Start refreshing critical and cached pairs every `refresh_interval_secs`.
    ///
    /// The task holds only a weak reference and stops once the engine is
    /// dropped or closed. Calling this again replaces the running task.
    pub fn spawn_refresher(self: &Arc<Self>) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let period = self.config.refresh_interval();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let summary = engine.refresh_rates(None).await;
                if !summary.failed.is_empty() {
                    warn!(failed = ?summary.failed, "Some pairs could not be refreshed");
                }
            }
        });

        let mut state = self.state.write();
        if state.closed {
            handle.abort();
            return;
        }
        if let Some(previous) = state.refresher.replace(handle) {
            previous.abort();
        }
    }

    /// Wait for every queued background write to finish.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Stop the refresher and drain outstanding writes. Later writes are dropped.
    pub async fn close(&self) {
        let refresher = {
            let mut state = self.state.write();
            state.closed = true;
            state.refresher.take()
        };
        if let Some(handle) = refresher {
            handle.abort();
        }
        self.writer.close().await;
        info!("FX engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}

fn in_catalog(catalog: &CurrencyCatalog, pair: &CurrencyPair) -> bool {
    catalog.contains(&pair.base) && catalog.contains(&pair.quote)
}

/// Engine health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineHealth {
    pub cached_pairs: usize,
    pub fresh_entries: usize,
    pub stale_entries: usize,
    pub fixed_pairs: usize,
    pub last_refresh: Option<Timestamp>,
    /// Every critical pair is answerable from the fixed table or a fresh cache entry.
    pub is_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::Peg;
    use crate::provider::{MockFailure, MockRateProvider};
    use crate::rate::{RateSource, Tier};
    use crate::store::MemoryRateStore;
    use cambio_common::{Currency, SymbolPosition};
    use chrono::Duration as ChronoDuration;
    use futures::future::join_all;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn code(s: &str) -> CurrencyCode {
        CurrencyCode::new(s)
    }

    fn setup_engine(providers: Vec<Arc<MockRateProvider>>) -> (Arc<FxEngine>, Arc<MemoryRateStore>) {
        let store = Arc::new(MemoryRateStore::new());
        let providers: Vec<Arc<dyn RateProvider>> = providers
            .into_iter()
            .map(|p| p as Arc<dyn RateProvider>)
            .collect();
        let engine = FxEngine::new(providers, store.clone(), FxEngineConfig::default()).unwrap();
        (Arc::new(engine), store)
    }

    fn two_digit(code_str: &str) -> Currency {
        Currency {
            code: code(code_str),
            name: code_str.to_string(),
            minor_unit_digits: 2,
            symbol: code_str.to_string(),
            symbol_position: SymbolPosition::After,
            grouping_separator: ",".to_string(),
            decimal_separator: ".".to_string(),
            countries: Vec::new(),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_fixed_pair_rounds_half_even() {
        let fixed = FixedRateTable::new().with_peg(Peg {
            anchor: code("XXA"),
            pegged: code("XXB"),
            rate: dec!(655.957),
            authority: "TEST".to_string(),
        });
        let catalog = CurrencyCatalog::new([two_digit("XXA"), two_digit("XXB")]);
        let config = FxEngineConfig {
            anchor_currency: Some(code("XXA")),
            critical_pairs: Vec::new(),
            ..Default::default()
        };
        let engine = FxEngine::with_tables(Vec::new(), Arc::new(MemoryRateStore::new()), config, catalog, fixed).unwrap();

        let forward = engine.convert(dec!(1), &code("XXA"), &code("XXB"), None).await.unwrap();
        assert_eq!(forward.output_amount.to_string(), "655.96");

        let back = engine.convert(dec!(655.957), &code("XXB"), &code("XXA"), None).await.unwrap();
        assert_eq!(back.output_amount.to_string(), "1.00");
    }

    #[tokio::test]
    async fn test_fallback_to_second_provider_then_cache() {
        let p1 = Arc::new(MockRateProvider::new("p1").with_priority(1).with_timeout(Duration::from_millis(20)));
        let p2 = Arc::new(MockRateProvider::new("p2").with_priority(2));
        p1.set_failure(Some(MockFailure::Hang));
        p2.set_rate("EUR", "USD", dec!(1.10));
        let (engine, _store) = setup_engine(vec![p1.clone(), p2.clone()]);

        let rate = engine.get_rate(&code("EUR"), &code("USD"), None).await.unwrap();
        assert_eq!(rate.source, RateSource::Provider("p2".into()));
        assert_eq!(rate.rate, dec!(1.10));

        let calls = p1.calls() + p2.calls();
        let again = engine.get_rate(&code("EUR"), &code("USD"), None).await.unwrap();
        assert_eq!(again.rate, dec!(1.10));
        assert_eq!(again.tier, Tier::Cache);
        assert_eq!(p1.calls() + p2.calls(), calls);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fifty_concurrent_callers_one_provider_call() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("GBP", "USD", dec!(1.27));
        provider.set_delay(Some(Duration::from_millis(50)));
        let (engine, _store) = setup_engine(vec![provider.clone()]);

        let tasks = (0..50).map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.get_rate(&code("GBP"), &code("USD"), None).await })
        });
        let results: Vec<ExchangeRate> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();

        assert_eq!(provider.calls(), 1);
        assert_eq!(results.len(), 50);
        assert!(results.iter().all(|r| r.rate == dec!(1.27) && r.resolved_at == results[0].resolved_at));
    }

    #[tokio::test]
    async fn test_batch_shares_resolutions() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("EUR", "USD", dec!(1.10));
        provider.set_rate("GBP", "CHF", dec!(1.12));
        provider.set_delay(Some(Duration::from_millis(20)));
        let (engine, _store) = setup_engine(vec![provider.clone()]);

        let results = engine
            .convert_batch(&[
                ConversionItem::new(dec!(100), "EUR", "USD"),
                ConversionItem::new(dec!(200), "EUR", "USD"),
                ConversionItem::new(dec!(50), "GBP", "CHF"),
            ])
            .await;

        assert_eq!(provider.calls(), 2);
        let outputs: Vec<Decimal> = results.into_iter().map(|r| r.unwrap().output_amount).collect();
        assert_eq!(outputs, vec![dec!(110.00), dec!(220.00), dec!(56.00)]);
    }

    #[tokio::test]
    async fn test_record_then_history_returns_one_record() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("EUR", "USD", dec!(1.10));
        let (engine, _store) = setup_engine(vec![provider]);
        let acme = CompanyId::new("acme");

        let result = engine.convert(dec!(250), &code("EUR"), &code("USD"), None).await.unwrap();
        let id = engine.record_conversion(&acme, &result, Some("INV-7".to_string()));
        engine.flush().await;

        let history = engine.get_conversion_history(&acme, &HistoryFilter::new()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].from_amount, dec!(250));
        assert_eq!(history[0].to_amount, dec!(275.00));
        assert_eq!(history[0].rate_applied, dec!(1.10));
        assert_eq!(engine.metrics().snapshot().records_written, 1);

        let other = engine
            .get_conversion_history(&CompanyId::new("globex"), &HistoryFilter::new())
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_fixed_rate_survives_total_outage() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_failure(Some(MockFailure::Http(503)));
        let (engine, store) = setup_engine(vec![provider.clone()]);
        store.set_offline(true);

        let rate = engine.get_rate(&code("EUR"), &code("XAF"), None).await.unwrap();
        assert_eq!(rate.rate, dec!(655.957));
        assert_eq!(rate.source, RateSource::Fixed("BEAC".into()));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_rate_served_when_providers_fail() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("EUR", "USD", dec!(1.10));
        let (engine, store) = setup_engine(vec![provider.clone()]);

        engine.get_rate(&code("EUR"), &code("USD"), None).await.unwrap();
        let aged = ExchangeRate::new(
            CurrencyPair::new("EUR", "USD"),
            dec!(1.10),
            RateSource::Provider("p1".into()),
            Tier::Provider,
        )
        .with_resolved_at(Utc::now() - ChronoDuration::hours(2));
        engine.resolver.cache().put(aged);

        provider.set_failure(Some(MockFailure::Malformed));
        store.set_offline(true);

        let rate = engine.get_rate(&code("EUR"), &code("USD"), None).await.unwrap();
        assert_eq!(rate.rate, dec!(1.10));
        assert!(rate.is_stale());
        assert_eq!(engine.metrics().snapshot().stale_fallbacks, 1);
    }

    #[tokio::test]
    async fn test_unknown_currency() {
        let (engine, _store) = setup_engine(Vec::new());
        let err = engine.get_rate(&code("EUR"), &code("ABC"), None).await.unwrap_err();
        assert_eq!(err, FxError::UnknownCurrency(code("ABC")));
        assert_eq!(err.error_code(), "UNKNOWN_CURRENCY");
    }

    #[tokio::test]
    async fn test_refresh_rates_and_health() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("EUR", "USD", dec!(1.10));
        provider.set_rate("USD", "XOF", dec!(603.5));
        provider.set_rate("USD", "XAF", dec!(603.5));
        let (engine, _store) = setup_engine(vec![provider.clone()]);

        assert!(!engine.health().is_healthy);

        let summary = engine.refresh_rates(None).await;
        assert_eq!(summary.skipped_fixed.len(), 2);
        assert_eq!(summary.refreshed.len(), 3);
        assert!(summary.failed.is_empty());

        let health = engine.health();
        assert!(health.is_healthy);
        assert_eq!(health.fixed_pairs, 2);
        assert_eq!(health.cached_pairs, 3);
        assert!(health.last_refresh.is_some());

        let before = provider.calls();
        engine.refresh_rates(Some(vec![CurrencyPair::new("EUR", "USD")])).await;
        assert_eq!(provider.calls(), before + 1);
    }

    #[tokio::test]
    async fn test_refresh_skips_unknown_currency() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("EUR", "ZZZ", dec!(2));
        provider.set_rate("EUR", "USD", dec!(1.10));
        let (engine, _store) = setup_engine(vec![provider.clone()]);

        let summary = engine
            .refresh_rates(Some(vec![CurrencyPair::new("EUR", "ZZZ"), CurrencyPair::new("EUR", "USD")]))
            .await;

        assert_eq!(summary.refreshed, vec![CurrencyPair::new("EUR", "USD")]);
        assert_eq!(summary.failed, vec![CurrencyPair::new("EUR", "ZZZ")]);
        assert_eq!(provider.calls(), 1);
        assert_eq!(engine.resolver.cache().cached_pairs(), vec![CurrencyPair::new("EUR", "USD")]);
        assert!(engine.health().last_refresh.is_none());
    }

    #[test]
    fn test_tables_reject_currencies_outside_catalog() {
        let catalog = || CurrencyCatalog::new([two_digit("XXA"), two_digit("XXB")]);

        let config = FxEngineConfig {
            anchor_currency: None,
            ..Default::default()
        };
        let err = FxEngine::with_tables(
            Vec::new(),
            Arc::new(MemoryRateStore::new()),
            config,
            catalog(),
            FixedRateTable::new(),
        )
        .err();
        assert!(matches!(err, Some(FxError::Config(msg)) if msg.contains("EUR/USD")));

        let config = FxEngineConfig {
            critical_pairs: vec![CurrencyPair::new("XXA", "XXB")],
            ..Default::default()
        };
        let err = FxEngine::with_tables(
            Vec::new(),
            Arc::new(MemoryRateStore::new()),
            config,
            catalog(),
            FixedRateTable::new(),
        )
        .err();
        assert!(matches!(err, Some(FxError::Config(msg)) if msg.contains("EUR")));
    }

    #[tokio::test]
    async fn test_invalidate_forces_provider_call() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("EUR", "USD", dec!(1.10));
        let (engine, _store) = setup_engine(vec![provider.clone()]);

        engine.get_rate(&code("EUR"), &code("USD"), None).await.unwrap();
        engine.invalidate(&CurrencyPair::new("USD", "EUR"));
        engine.get_rate(&code("EUR"), &code("USD"), None).await.unwrap();
        assert_eq!(provider.calls(), 2);

        engine.invalidate_all();
        assert_eq!(engine.health().cached_pairs, 0);
    }

    #[tokio::test]
    async fn test_close_drops_later_records() {
        let provider = Arc::new(MockRateProvider::new("p1"));
        provider.set_rate("EUR", "USD", dec!(1.10));
        let (engine, store) = setup_engine(vec![provider]);
        engine.spawn_refresher();

        let result = engine.convert(dec!(10), &code("EUR"), &code("USD"), None).await.unwrap();
        engine.close().await;
        assert!(engine.is_closed());

        engine.record_conversion(&CompanyId::new("acme"), &result, None);
        engine.flush().await;
        assert_eq!(store.record_count(), 0);
        assert!(engine.metrics().snapshot().persistence_failures >= 1);
    }

    #[test]
    fn test_helpers() {
        let (engine, _store) = setup_engine(Vec::new());
        assert!(engine.needs_conversion(&code("EUR"), &code("USD")));
        assert!(!engine.needs_conversion(&code("XOF"), &code("XOF")));
        assert_eq!(engine.format_amount(dec!(1234567.891), &code("USD")).unwrap(), "$1,234,567.89");
        assert!(engine.format_amount(dec!(1), &code("ZZZ")).is_err());
        assert_eq!(engine.catalog().len(), 11);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FxEngineConfig {
            fiscal_year_start_month: 0,
            ..Default::default()
        };
        let err = FxEngine::new(Vec::new(), Arc::new(MemoryRateStore::new()), config).err();
        assert!(matches!(err, Some(FxError::Config(_))));

        let mut config = FxEngineConfig::default();
        config.cache.default_ttl_secs = 10_000_000_000_000_000;
        let err = FxEngine::new(Vec::new(), Arc::new(MemoryRateStore::new()), config).err();
        assert!(matches!(err, Some(FxError::Config(_))));
    }

    proptest! {
        #[test]
        fn prop_rate_times_inverse_is_one(raw in 1u64..100_000_000u64) {
            let rate = Decimal::new(raw as i64, 4);
            let provider = Arc::new(MockRateProvider::new("p1"));
            provider.set_rate("GBP", "CAD", rate);
            let (engine, _store) = setup_engine(vec![provider]);

            let (forward, backward) = tokio_test::block_on(async {
                let f = engine.get_rate(&code("GBP"), &code("CAD"), None).await.unwrap();
                let b = engine.get_rate(&code("CAD"), &code("GBP"), None).await.unwrap();
                (f, b)
            });

            let product = forward.rate * backward.rate;
            prop_assert!((product - Decimal::ONE).abs() < dec!(0.000000001));
        }

        #[test]
        fn prop_identity_conversion(units in 0u64..1_000_000_000u64, scale in 0u32..8) {
            let (engine, _store) = setup_engine(Vec::new());
            let amount = Decimal::new(units as i64, scale);

            let result = tokio_test::block_on(engine.convert(amount, &code("CHF"), &code("CHF"), None)).unwrap();
            prop_assert_eq!(result.output_amount, amount);
        }
    }
}
