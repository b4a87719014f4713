//! Currency conversion types and operations.

use std::sync::Arc;

use cambio_common::{
    round_half_even, CurrencyCatalog, CurrencyCode, CurrencyPair, Timestamp,
};
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FxError, FxResult};
use crate::metrics::SharedMetrics;
use crate::rate::ExchangeRate;
use crate::resolver::{RateRequest, RateResolver};

/// Represents a completed currency conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub input_amount: Decimal,
    /// Rounded half-to-even to the target currency's minor unit.
    pub output_amount: Decimal,
    /// `None` for zero amounts, which never consult the resolver.
    pub rate: Option<ExchangeRate>,
    pub computed_at: Timestamp,
}

impl ConversionResult {
    /// The rate applied, or zero when no rate was needed.
    pub fn rate_applied(&self) -> Decimal {
        self.rate.as_ref().map_or(Decimal::ZERO, |r| r.rate)
    }

    pub fn pair(&self) -> CurrencyPair {
        CurrencyPair::new(self.from.clone(), self.to.clone())
    }

    /// Whether the applied rate was a degraded stale-cache fallback.
    pub fn is_stale(&self) -> bool {
        self.rate.as_ref().map_or(false, ExchangeRate::is_stale)
    }
}

/// One entry of a batch conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionItem {
    pub amount: Decimal,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

impl ConversionItem {
    pub fn new(amount: Decimal, from: impl Into<CurrencyCode>, to: impl Into<CurrencyCode>) -> Self {
        Self {
            amount,
            from: from.into(),
            to: to.into(),
            as_of: None,
        }
    }

    pub fn with_as_of(mut self, as_of: NaiveDate) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

/// Applies resolved rates to amounts.
pub struct ConversionEngine {
    catalog: Arc<CurrencyCatalog>,
    resolver: Arc<RateResolver>,
    metrics: SharedMetrics,
}

impl ConversionEngine {
    pub fn new(catalog: Arc<CurrencyCatalog>, resolver: Arc<RateResolver>, metrics: SharedMetrics) -> Self {
        Self {
            catalog,
            resolver,
            metrics,
        }
    }

    /// Convert `amount` of `from` into `to`.
    ///
    /// Both codes are validated against the catalog first, even for zero
    /// amounts. Same-currency conversions return the amount unchanged.
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &CurrencyCode,
        to: &CurrencyCode,
        request: RateRequest,
    ) -> FxResult<ConversionResult> {
        self.catalog.lookup(from)?;
        let digits = self.catalog.lookup(to)?.minor_unit_digits;

        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(FxError::InvalidAmount(amount));
        }

        let (output_amount, rate) = if amount.is_zero() {
            (round_half_even(Decimal::ZERO, digits), None)
        } else if from == to {
            let output = if amount.scale() <= digits {
                round_half_even(amount, digits)
            } else {
                amount
            };
            let as_of = request.as_of.unwrap_or_else(|| Utc::now().date_naive());
            (output, Some(ExchangeRate::identity(from.clone()).with_as_of(as_of)))
        } else {
            let pair = CurrencyPair::new(from.clone(), to.clone());
            let rate = self.resolver.resolve(&pair, request).await?;
            let raw = amount.checked_mul(rate.rate).ok_or(FxError::InvalidAmount(amount))?;
            (round_half_even(raw, digits), Some(rate))
        };

        self.metrics.conversion();
        debug!(
            from = %from,
            to = %to,
            amount = %amount,
            output = %output_amount,
            "Converted"
        );

        Ok(ConversionResult {
            from: from.clone(),
            to: to.clone(),
            input_amount: amount,
            output_amount,
            rate,
            computed_at: Utc::now(),
        })
    }

    /// Convert every item independently; results keep the input order.
    ///
    /// Items run concurrently, so repeated pairs share one upstream
    /// resolution through the resolver's single-flight and cache.
    pub async fn convert_batch(&self, items: &[ConversionItem]) -> Vec<FxResult<ConversionResult>> {
        join_all(items.iter().map(|item| {
            let request = RateRequest {
                as_of: item.as_of,
                ..Default::default()
            };
            self.convert(item.amount, &item.from, &item.to, request)
        }))
        .await
    }
}
