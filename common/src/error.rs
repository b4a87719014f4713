//! Error types shared across Cambio crates.

use crate::monetary::CurrencyCode;
use thiserror::Error;

/// Errors raised by the shared currency and time types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// Currency code is not in the catalog.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(CurrencyCode),

    /// String is not a well-formed currency code.
    #[error("Invalid currency code: {0:?}")]
    InvalidCurrencyCode(String),

    /// String is not a well-formed currency pair.
    #[error("Invalid currency pair: {0:?}")]
    InvalidCurrencyPair(String),

    /// Fiscal year start month outside 1..=12.
    #[error("Invalid fiscal year start month: {0}")]
    InvalidFiscalMonth(u32),
}

impl CommonError {
    /// Get a stable error code for logs and API payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            CommonError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            CommonError::InvalidCurrencyCode(_) => "INVALID_CURRENCY_CODE",
            CommonError::InvalidCurrencyPair(_) => "INVALID_CURRENCY_PAIR",
            CommonError::InvalidFiscalMonth(_) => "INVALID_FISCAL_MONTH",
        }
    }
}

/// Result type alias for shared operations.
pub type Result<T> = std::result::Result<T, CommonError>;
