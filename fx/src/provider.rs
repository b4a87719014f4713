//! Rate provider traits, the provider chain and implementations.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cambio_common::time::constants::PROVIDER_TIMEOUT_MS;
use cambio_common::{CurrencyCode, CurrencyPair, Deadline};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FxError, FxResult, ProviderError};
use crate::metrics::SharedMetrics;
use crate::rate::{Derivation, ExchangeRate, RateSource, Tier};

/// Trait for FX rate providers.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Lower values are tried first.
    fn priority(&self) -> u32 {
        100
    }

    /// Upper bound on a single `fetch_rate` call.
    fn timeout(&self) -> Duration {
        Duration::from_millis(PROVIDER_TIMEOUT_MS)
    }

    /// Units of `quote` per one unit of `base`.
    async fn fetch_rate(&self, base: &CurrencyCode, quote: &CurrencyCode) -> Result<Decimal, ProviderError>;
}

/// Configuration for one external rate source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_ms() -> u64 {
    PROVIDER_TIMEOUT_MS
}

fn default_priority() -> u32 {
    100
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
            priority: default_priority(),
            api_key: None,
            enabled: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Every provider failed to produce a rate.
#[derive(Debug, Clone, Default)]
pub struct ChainFailure {
    /// One entry per failed call, in the order they were made.
    pub attempts: Vec<ProviderError>,
    /// The caller's deadline cut the chain short.
    pub deadline_exceeded: bool,
}

/// Ordered list of providers tried strictly by priority.
///
/// Each call is bounded by its provider's timeout. A failure of any kind
/// moves on to the next provider without retrying. When a provider simply
/// does not quote the pair, the chain asks the same provider for the
/// opposite direction, then for both legs through the anchor currency.
pub struct ProviderChain {
    providers: Vec<Arc<dyn RateProvider>>,
    anchor: Option<CurrencyCode>,
    metrics: SharedMetrics,
}

impl ProviderChain {
    /// Create a chain; providers are sorted by priority, ties keep their order.
    pub fn new(mut providers: Vec<Arc<dyn RateProvider>>, anchor: Option<CurrencyCode>, metrics: SharedMetrics) -> Self {
        providers.sort_by_key(|p| p.priority());
        Self {
            providers,
            anchor,
            metrics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Provider names in the order they are tried.
    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Resolve `pair` from the first provider that answers.
    pub async fn resolve(&self, pair: &CurrencyPair, deadline: Option<Deadline>) -> Result<ExchangeRate, ChainFailure> {
        let mut failure = ChainFailure::default();

        for provider in &self.providers {
            if deadline.map_or(false, |d| d.is_exceeded()) {
                debug!(pair = %pair, "Deadline exceeded, skipping remaining providers");
                failure.deadline_exceeded = true;
                break;
            }

            match self.try_provider(provider.as_ref(), pair, deadline).await {
                Ok(rate) => {
                    info!(
                        provider = provider.name(),
                        pair = %pair,
                        rate = %rate.rate,
                        derived = rate.is_derived(),
                        "Resolved rate from provider"
                    );
                    return Ok(rate);
                }
                Err(errors) => {
                    for error in &errors {
                        warn!(
                            provider = provider.name(),
                            pair = %pair,
                            error = %error,
                            "Provider failed to return rate"
                        );
                    }
                    failure.attempts.extend(errors);
                }
            }
        }

        Err(failure)
    }

    async fn try_provider(
        &self,
        provider: &dyn RateProvider,
        pair: &CurrencyPair,
        deadline: Option<Deadline>,
    ) -> Result<ExchangeRate, Vec<ProviderError>> {
        let source = RateSource::Provider(provider.name().to_string());

        let direct = match self.call(provider, &pair.base, &pair.quote, deadline).await {
            Ok(rate) => return Ok(ExchangeRate::new(pair.clone(), rate, source, Tier::Provider)),
            Err(e) if e.is_missing_pair() => e,
            Err(e) => return Err(vec![e]),
        };

        // Only the opposite direction may be quoted.
        let inverse = match self.call(provider, &pair.quote, &pair.base, deadline).await {
            Ok(rate) => {
                let quoted = ExchangeRate::new(pair.inverse(), rate, source, Tier::Provider);
                return quoted.inverse().ok_or_else(|| vec![direct]);
            }
            Err(e) if e.is_missing_pair() => e,
            Err(e) => return Err(vec![direct, e]),
        };

        match self.try_cross(provider, pair, deadline).await {
            Some(Ok(rate)) => Ok(rate),
            Some(Err(leg)) => Err(vec![direct, inverse, leg]),
            None => Err(vec![direct, inverse]),
        }
    }

    /// `base→quote = rate(base, anchor) / rate(quote, anchor)`; `None` when no
    /// anchor applies to this pair.
    async fn try_cross(
        &self,
        provider: &dyn RateProvider,
        pair: &CurrencyPair,
        deadline: Option<Deadline>,
    ) -> Option<Result<ExchangeRate, ProviderError>> {
        let anchor = self.anchor.as_ref()?;
        if *anchor == pair.base || *anchor == pair.quote {
            return None;
        }

        debug!(provider = provider.name(), pair = %pair, anchor = %anchor, "Trying cross rate");
        let legs = futures::future::try_join(
            self.call(provider, &pair.base, anchor, deadline),
            self.call(provider, &pair.quote, anchor, deadline),
        )
        .await;

        Some(legs.and_then(|(base_leg, quote_leg)| {
            let rate = base_leg
                .checked_div(quote_leg)
                .filter(|r| *r > Decimal::ZERO)
                .ok_or_else(|| ProviderError::InvalidRate {
                    provider: provider.name().to_string(),
                    pair: pair.clone(),
                    rate: Decimal::ZERO,
                })?;
            Ok(ExchangeRate::new(
                pair.clone(),
                rate,
                RateSource::Provider(provider.name().to_string()),
                Tier::Provider,
            )
            .with_derivation(Derivation::Cross { anchor: anchor.clone() }))
        }))
    }

    async fn call(
        &self,
        provider: &dyn RateProvider,
        base: &CurrencyCode,
        quote: &CurrencyCode,
        deadline: Option<Deadline>,
    ) -> Result<Decimal, ProviderError> {
        let limit = match deadline {
            Some(d) => provider.timeout().min(d.remaining_std()),
            None => provider.timeout(),
        };

        self.metrics.provider_call();
        let result = match tokio::time::timeout(limit, provider.fetch_rate(base, quote)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: provider.name().to_string(),
                after: limit,
            }),
        }
        .and_then(|rate| {
            if rate > Decimal::ZERO {
                Ok(rate)
            } else {
                Err(ProviderError::InvalidRate {
                    provider: provider.name().to_string(),
                    pair: CurrencyPair::new(base.clone(), quote.clone()),
                    rate,
                })
            }
        });

        if result.is_err() {
            self.metrics.provider_failure();
        }
        result
    }
}

/// Provider speaking the common `/latest?base=X&symbols=Y` JSON dialect.
///
/// Expects a body of the form `{"rates": {"USD": 1.0842}}`. A 404 or a body
/// without the requested symbol is reported as a missing pair.
pub struct HttpRateProvider {
    config: ProviderConfig,
    client: Client,
}

#[derive(Deserialize)]
struct LatestResponse {
    rates: HashMap<String, serde_json::Number>,
}

impl HttpRateProvider {
    pub fn new(config: ProviderConfig) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| FxError::Config(format!("provider {}: cannot build HTTP client: {}", config.name, e)))?;
        Ok(Self { config, client })
    }

    fn parse_rate(&self, number: &serde_json::Number) -> Result<Decimal, ProviderError> {
        let text = number.to_string();
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|e| ProviderError::Malformed {
                provider: self.config.name.clone(),
                message: format!("unparseable rate {text}: {e}"),
            })
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn priority(&self) -> u32 {
        self.config.priority
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    async fn fetch_rate(&self, base: &CurrencyCode, quote: &CurrencyCode) -> Result<Decimal, ProviderError> {
        let url = format!("{}/latest", self.config.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .get(&url)
            .query(&[("base", base.as_str()), ("symbols", quote.as_str())]);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    provider: self.config.name.clone(),
                    after: self.config.timeout(),
                }
            } else {
                ProviderError::Transport {
                    provider: self.config.name.clone(),
                    message: e.to_string(),
                }
            }
        })?;

        let missing = || ProviderError::MissingPair {
            provider: self.config.name.clone(),
            pair: CurrencyPair::new(base.clone(), quote.clone()),
        };

        match response.status() {
            StatusCode::NOT_FOUND => return Err(missing()),
            status if !status.is_success() => {
                return Err(ProviderError::Http {
                    provider: self.config.name.clone(),
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let body: LatestResponse = response.json().await.map_err(|e| ProviderError::Malformed {
            provider: self.config.name.clone(),
            message: e.to_string(),
        })?;

        let number = body.rates.get(quote.as_str()).ok_or_else(missing)?;
        self.parse_rate(number)
    }
}

/// How a [`MockRateProvider`] should misbehave.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Never answer; the chain's timeout fires.
    Hang,
    /// Answer with the given HTTP status.
    Http(u16),
    /// Answer with an unparseable payload.
    Malformed,
}

/// Mock rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateProvider {
    name: String,
    priority: u32,
    timeout: Duration,
    rates: dashmap::DashMap<CurrencyPair, Decimal>,
    calls: std::sync::atomic::AtomicUsize,
    delay: parking_lot::Mutex<Option<Duration>>,
    failure: parking_lot::Mutex<Option<MockFailure>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateProvider {
    /// Create a new mock provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 100,
            timeout: Duration::from_millis(200),
            rates: dashmap::DashMap::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
            delay: parking_lot::Mutex::new(None),
            failure: parking_lot::Mutex::new(None),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Quote `rate` units of `quote` per `base`. Only this direction is quoted.
    pub fn set_rate(&self, base: &str, quote: &str, rate: Decimal) {
        self.rates.insert(CurrencyPair::new(base, quote), rate);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn set_failure(&self, failure: Option<MockFailure>) {
        *self.failure.lock() = failure;
    }

    /// Number of `fetch_rate` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for MockRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch_rate(&self, base: &CurrencyCode, quote: &CurrencyCode) -> Result<Decimal, ProviderError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.failure.lock();
        match failure {
            Some(MockFailure::Hang) => futures::future::pending().await,
            Some(MockFailure::Http(status)) => Err(ProviderError::Http {
                provider: self.name.clone(),
                status,
            }),
            Some(MockFailure::Malformed) => Err(ProviderError::Malformed {
                provider: self.name.clone(),
                message: "mock payload".to_string(),
            }),
            None => {
                let pair = CurrencyPair::new(base.clone(), quote.clone());
                self.rates
                    .get(&pair)
                    .map(|r| *r.value())
                    .ok_or(ProviderError::MissingPair {
                        provider: self.name.clone(),
                        pair,
                    })
            }
        }
    }
}
