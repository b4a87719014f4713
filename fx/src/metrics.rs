//! Metrics collection for FX engine monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// FX engine metrics.
pub struct FxMetrics {
    /// Total calls made to live providers (cross-rate legs included).
    pub provider_calls: AtomicU64,
    /// Provider calls that failed or timed out.
    pub provider_failures: AtomicU64,
    /// Fresh cache hits.
    pub cache_hits: AtomicU64,
    /// Cache misses (including stale entries).
    pub cache_misses: AtomicU64,
    /// Callers that joined an in-flight resolution instead of starting one.
    pub singleflight_joins: AtomicU64,
    /// Stale cache entries served as a degraded fallback.
    pub stale_fallbacks: AtomicU64,
    /// Rates served from the durable store.
    pub store_fallbacks: AtomicU64,
    /// Resolutions that exhausted every tier.
    pub rates_unavailable: AtomicU64,
    /// Best-effort writes that failed.
    pub persistence_failures: AtomicU64,
    /// Conversions performed.
    pub conversions: AtomicU64,
    /// Conversion records written.
    pub records_written: AtomicU64,
}

impl FxMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            provider_calls: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            singleflight_joins: AtomicU64::new(0),
            stale_fallbacks: AtomicU64::new(0),
            store_fallbacks: AtomicU64::new(0),
            rates_unavailable: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            conversions: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
        }
    }

    pub fn provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn singleflight_join(&self) {
        self.singleflight_joins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_fallback(&self) {
        self.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_fallback(&self) {
        self.store_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_unavailable(&self) {
        self.rates_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversion(&self) {
        self.conversions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self) {
        self.records_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> FxMetricsSnapshot {
        FxMetricsSnapshot {
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            singleflight_joins: self.singleflight_joins.load(Ordering::Relaxed),
            stale_fallbacks: self.stale_fallbacks.load(Ordering::Relaxed),
            store_fallbacks: self.store_fallbacks.load(Ordering::Relaxed),
            rates_unavailable: self.rates_unavailable.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            conversions: self.conversions.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let counters = [
            ("provider_calls_total", "Total provider calls", snapshot.provider_calls),
            ("provider_failures_total", "Total failed provider calls", snapshot.provider_failures),
            ("cache_hits_total", "Total fresh cache hits", snapshot.cache_hits),
            ("cache_misses_total", "Total cache misses", snapshot.cache_misses),
            (
                "singleflight_joins_total",
                "Total callers that joined an in-flight resolution",
                snapshot.singleflight_joins,
            ),
            ("stale_fallbacks_total", "Total stale rates served", snapshot.stale_fallbacks),
            ("store_fallbacks_total", "Total rates served from the durable store", snapshot.store_fallbacks),
            ("rates_unavailable_total", "Total resolutions with no rate", snapshot.rates_unavailable),
            (
                "persistence_failures_total",
                "Total failed best-effort writes",
                snapshot.persistence_failures,
            ),
            ("conversions_total", "Total conversions", snapshot.conversions),
            ("records_written_total", "Total conversion records written", snapshot.records_written),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP cambio_{name} {help}\n# TYPE cambio_{name} counter\ncambio_{name} {value}\n\n"
            ));
        }
        output
    }
}

impl Default for FxMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FxMetricsSnapshot {
    pub provider_calls: u64,
    pub provider_failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub singleflight_joins: u64,
    pub stale_fallbacks: u64,
    pub store_fallbacks: u64,
    pub rates_unavailable: u64,
    pub persistence_failures: u64,
    pub conversions: u64,
    pub records_written: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<FxMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = FxMetrics::new();

        metrics.provider_call();
        metrics.provider_call();
        metrics.provider_failure();
        metrics.cache_hit();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.provider_calls, 2);
        assert_eq!(snapshot.provider_failures, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = FxMetrics::new();
        metrics.persistence_failure();

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE cambio_persistence_failures_total counter"));
        assert!(output.contains("cambio_persistence_failures_total 1"));
        assert!(output.contains("cambio_provider_calls_total 0"));
    }
}
