//! FX engine configuration.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use cambio_common::time::constants::{
    CRITICAL_REFRESH_INTERVAL_SECS, MAX_RATE_TTL_SECS, STORE_TIMEOUT_MS,
};
use cambio_common::{CurrencyCode, CurrencyPair};
use serde::{Deserialize, Serialize};

use crate::cache::RateCacheConfig;
use crate::error::{FxError, FxResult};
use crate::provider::ProviderConfig;

/// Main engine configuration. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FxEngineConfig {
    /// Cache configuration.
    pub cache: RateCacheConfig,
    /// External rate sources.
    pub providers: Vec<ProviderConfig>,
    /// Currency used to derive cross rates inside a provider.
    pub anchor_currency: Option<CurrencyCode>,
    /// Pairs kept warm by the refresher and subject to the critical TTL.
    pub critical_pairs: Vec<CurrencyPair>,
    /// Interval between background refreshes, in seconds.
    pub refresh_interval_secs: u64,
    /// First month (1-12) of the fiscal year.
    pub fiscal_year_start_month: u32,
    /// Upper bound on a durable-store read, in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for FxEngineConfig {
    fn default() -> Self {
        Self {
            cache: RateCacheConfig::default(),
            providers: Vec::new(),
            anchor_currency: Some(CurrencyCode::eur()),
            critical_pairs: vec![
                CurrencyPair::new("EUR", "USD"),
                CurrencyPair::new("EUR", "XOF"),
                CurrencyPair::new("EUR", "XAF"),
                CurrencyPair::new("USD", "XOF"),
                CurrencyPair::new("USD", "XAF"),
            ],
            refresh_interval_secs: CRITICAL_REFRESH_INTERVAL_SECS,
            fiscal_year_start_month: 1,
            store_timeout_ms: STORE_TIMEOUT_MS,
        }
    }
}

impl FxEngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> FxResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FxError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw).map_err(|e| FxError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `CAMBIO_*` environment overrides. Unparseable values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(ttl) = std::env::var("CAMBIO_CACHE_TTL_SECS") {
            if let Ok(ttl) = ttl.parse() {
                self.cache.default_ttl_secs = ttl;
            }
        }

        if let Ok(anchor) = std::env::var("CAMBIO_ANCHOR_CURRENCY") {
            if let Ok(anchor) = anchor.parse() {
                self.anchor_currency = Some(anchor);
            }
        }

        if let Ok(interval) = std::env::var("CAMBIO_REFRESH_INTERVAL_SECS") {
            if let Ok(interval) = interval.parse() {
                self.refresh_interval_secs = interval;
            }
        }

        if let Ok(month) = std::env::var("CAMBIO_FISCAL_YEAR_START_MONTH") {
            if let Ok(month) = month.parse() {
                self.fiscal_year_start_month = month;
            }
        }

        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache.default_ttl_secs == 0 {
            return Err("Cache TTL cannot be 0".to_string());
        }

        if self.cache.default_ttl_secs > MAX_RATE_TTL_SECS {
            return Err(format!(
                "Cache TTL cannot exceed {} seconds, got {}",
                MAX_RATE_TTL_SECS, self.cache.default_ttl_secs
            ));
        }

        if let Some(critical) = self.cache.critical_ttl_secs {
            if critical == 0 || critical > self.cache.default_ttl_secs {
                return Err("Critical TTL must be between 1 and the default TTL".to_string());
            }
        }

        if self.cache.max_entries == 0 {
            return Err("Cache capacity cannot be 0".to_string());
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err("Provider name cannot be empty".to_string());
            }
            if !names.insert(provider.name.as_str()) {
                return Err(format!("Duplicate provider name: {}", provider.name));
            }
            if provider.timeout_ms == 0 {
                return Err(format!("Provider {} has a zero timeout", provider.name));
            }
        }

        if self.critical_pairs.iter().any(CurrencyPair::is_identity) {
            return Err("Critical pairs must have distinct currencies".to_string());
        }

        if self.refresh_interval_secs == 0 {
            return Err("Refresh interval cannot be 0".to_string());
        }

        if !(1..=12).contains(&self.fiscal_year_start_month) {
            return Err(format!(
                "Fiscal year start month must be 1-12, got {}",
                self.fiscal_year_start_month
            ));
        }

        if self.store_timeout_ms == 0 {
            return Err("Store timeout cannot be 0".to_string());
        }

        Ok(())
    }
}
