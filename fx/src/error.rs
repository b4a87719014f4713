//! FX engine error types.

use std::time::Duration;

use cambio_common::{CommonError, CurrencyCode, CurrencyPair};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the FX engine to its callers.
///
/// Conversion paths only ever return `UnknownCurrency`, `InvalidAmount` or
/// `RateUnavailable`; provider and best-effort persistence failures are
/// absorbed by fallback tiers and reported through logs and metrics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FxError {
    /// Currency code absent from the catalog.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(CurrencyCode),

    /// Negative amount passed to a conversion.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Every resolution tier was exhausted.
    #[error("Rate not available for {0}")]
    RateUnavailable(CurrencyPair),

    /// A durable-store read backing a query failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Engine configuration rejected.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FxError {
    /// Get error code for API payloads and logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            FxError::InvalidAmount(_) => "INVALID_AMOUNT",
            FxError::RateUnavailable(_) => "RATE_UNAVAILABLE",
            FxError::Storage(_) => "STORAGE_ERROR",
            FxError::Config(_) => "CONFIGURATION_ERROR",
        }
    }
}

impl From<CommonError> for FxError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::UnknownCurrency(code) => FxError::UnknownCurrency(code),
            other => FxError::Config(other.to_string()),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;

/// Failure of a single provider call. Never leaves the provider chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("{provider} timed out after {after:?}")]
    Timeout { provider: String, after: Duration },

    #[error("{provider} returned HTTP {status}")]
    Http { provider: String, status: u16 },

    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    #[error("{provider} returned a malformed payload: {message}")]
    Malformed { provider: String, message: String },

    #[error("{provider} does not quote {pair}")]
    MissingPair { provider: String, pair: CurrencyPair },

    #[error("{provider} returned a non-positive rate {rate} for {pair}")]
    InvalidRate {
        provider: String,
        pair: CurrencyPair,
        rate: Decimal,
    },
}

impl ProviderError {
    /// Name of the provider that failed.
    pub fn provider(&self) -> &str {
        match self {
            ProviderError::Timeout { provider, .. }
            | ProviderError::Http { provider, .. }
            | ProviderError::Transport { provider, .. }
            | ProviderError::Malformed { provider, .. }
            | ProviderError::MissingPair { provider, .. }
            | ProviderError::InvalidRate { provider, .. } => provider,
        }
    }

    /// Whether the provider answered but simply has no quote for the pair.
    ///
    /// Only this kind of failure is worth a cross-rate attempt on the same
    /// provider; a timeout or transport error moves straight to the next one.
    pub fn is_missing_pair(&self) -> bool {
        matches!(self, ProviderError::MissingPair { .. })
    }
}

/// Failure of a durable-store operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store rejected record: {0}")]
    Rejected(String),
}
