//! Cambio FX Engine
//!
//! Multi-source exchange-rate resolution and currency conversion.
//!
//! # Features
//!
//! - Pegged rates (e.g. the CFA francs to the euro) that never expire
//! - Rate caching with TTL, stale fallback and single-flight resolution
//! - Prioritised provider chain with per-provider timeouts and cross rates
//! - Durable-store fallback for historical and degraded lookups
//! - Banker's rounding to each currency's minor unit
//! - Audited conversions and per-fiscal-year gain/loss
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cambio_fx::{FxEngine, FxEngineConfig, MemoryRateStore};
//! use cambio_common::CurrencyCode;
//! use rust_decimal_macros::dec;
//!
//! let engine = FxEngine::from_config(FxEngineConfig::from_env(), Arc::new(MemoryRateStore::new()))?;
//!
//! // Get current rate
//! let rate = engine.get_rate(&CurrencyCode::eur(), &CurrencyCode::xof(), None).await?;
//!
//! // Convert amount
//! let result = engine.convert(dec!(1000), &CurrencyCode::eur(), &CurrencyCode::xof(), None).await?;
//! ```

pub mod accountant;
pub mod cache;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod error;
pub mod fixed;
pub mod metrics;
pub mod provider;
pub mod rate;
pub mod resolver;
pub mod singleflight;
pub mod store;
pub mod writer;

pub use accountant::ConversionAccountant;
pub use cache::{CacheLookup, RateCache, RateCacheConfig};
pub use config::FxEngineConfig;
pub use conversion::{ConversionEngine, ConversionItem, ConversionResult};
pub use engine::{EngineHealth, FxEngine};
pub use error::{FxError, FxResult, ProviderError, StoreError};
pub use fixed::{FixedRateTable, Peg};
pub use metrics::{FxMetrics, FxMetricsSnapshot, SharedMetrics};
pub use provider::{HttpRateProvider, ProviderChain, ProviderConfig, RateProvider};
pub use rate::{Derivation, ExchangeRate, RateSource, Tier};
pub use resolver::{RateRequest, RateResolver, RefreshSummary};
pub use store::{ConversionRecord, GainLossSnapshot, HistoryFilter, MemoryRateStore, RateStore};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::{MockFailure, MockRateProvider};
