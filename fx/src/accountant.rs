//! Audit trail of conversions and period-end currency gain/loss.

use std::collections::BTreeMap;
use std::sync::Arc;

use cambio_common::{today, CompanyId, ConversionId, CurrencyCode, FiscalCalendar};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::conversion::ConversionResult;
use crate::error::{FxError, FxResult};
use crate::metrics::SharedMetrics;
use crate::store::{ConversionRecord, GainLossSnapshot, HistoryFilter, RateStore};
use crate::writer::{BackgroundWriter, WriteOp};

/// Records audited conversions and derives gain/loss from them.
pub struct ConversionAccountant {
    store: Arc<dyn RateStore>,
    writer: Arc<BackgroundWriter>,
    calendar: FiscalCalendar,
    metrics: SharedMetrics,
}

impl ConversionAccountant {
    pub fn new(
        store: Arc<dyn RateStore>,
        writer: Arc<BackgroundWriter>,
        calendar: FiscalCalendar,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            store,
            writer,
            calendar,
            metrics,
        }
    }

    pub fn calendar(&self) -> FiscalCalendar {
        self.calendar
    }

    /// Queue an audit record for `result`. Persistence is best-effort and
    /// never reports failure to the caller.
    pub fn record(&self, company: &CompanyId, result: &ConversionResult, reference: Option<String>) -> ConversionId {
        let id = ConversionId::new();

        if !company.is_valid() {
            warn!(company = %company, "Invalid company id, conversion not recorded");
            self.metrics.persistence_failure();
            return id;
        }

        let record = ConversionRecord {
            id,
            company_id: company.clone(),
            from: result.from.clone(),
            to: result.to.clone(),
            from_amount: result.input_amount,
            to_amount: result.output_amount,
            rate_applied: result.rate_applied(),
            date: result.rate.as_ref().map_or_else(today, |r| r.as_of),
            reference,
            recorded_at: Utc::now(),
        };

        self.writer.submit(WriteOp::Record(record));
        id
    }

    /// Conversion records for `company`, oldest first.
    pub async fn history(&self, company: &CompanyId, filter: &HistoryFilter) -> FxResult<Vec<ConversionRecord>> {
        self.store
            .list_conversion_records(company, filter)
            .await
            .map_err(|e| FxError::Storage(e.to_string()))
    }

    /// Recompute and upsert one gain/loss snapshot per target currency
    /// converted into during `fiscal_year`.
    ///
    /// Realized gain sums `to_amount - from_amount * rate_applied` over the
    /// year's records. Unrealized gain is always zero: there is no
    /// open-position ledger to mark to market.
    #[instrument(skip(self), fields(company = %company))]
    pub async fn compute_gain_loss(&self, company: &CompanyId, fiscal_year: i32) -> FxResult<Vec<GainLossSnapshot>> {
        let (start, end) = self
            .calendar
            .bounds(fiscal_year)
            .ok_or_else(|| FxError::Config(format!("fiscal year {fiscal_year} out of range")))?;

        let records = self.history(company, &HistoryFilter::new().between(start, end)).await?;

        let mut realized: BTreeMap<CurrencyCode, Decimal> = BTreeMap::new();
        for record in &records {
            let expected = record.from_amount * record.rate_applied;
            *realized.entry(record.to.clone()).or_default() += record.to_amount - expected;
        }

        let computed_at = Utc::now();
        let snapshots: Vec<GainLossSnapshot> = realized
            .into_iter()
            .map(|(currency, realized_gain)| GainLossSnapshot {
                company_id: company.clone(),
                currency,
                fiscal_year,
                realized_gain,
                unrealized_gain: Decimal::ZERO,
                computed_at,
            })
            .collect();

        for snapshot in &snapshots {
            if let Err(e) = self.store.upsert_gain_loss_snapshot(snapshot).await {
                warn!(currency = %snapshot.currency, error = %e, "Failed to persist gain/loss snapshot");
                self.metrics.persistence_failure();
            }
        }

        info!(
            fiscal_year,
            records = records.len(),
            currencies = snapshots.len(),
            "Computed gain/loss"
        );
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::FxMetrics;
    use crate::rate::{ExchangeRate, RateSource, Tier};
    use crate::store::MemoryRateStore;
    use cambio_common::CurrencyPair;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn setup() -> (ConversionAccountant, Arc<MemoryRateStore>, Arc<BackgroundWriter>) {
        let store = Arc::new(MemoryRateStore::new());
        let metrics = Arc::new(FxMetrics::new());
        let writer = Arc::new(BackgroundWriter::new(store.clone(), metrics.clone()));
        let accountant = ConversionAccountant::new(store.clone(), writer.clone(), FiscalCalendar::default(), metrics);
        (accountant, store, writer)
    }

    fn result(from: &str, to: &str, input: Decimal, output: Decimal, rate: Decimal, day: NaiveDate) -> ConversionResult {
        ConversionResult {
            from: CurrencyCode::new(from),
            to: CurrencyCode::new(to),
            input_amount: input,
            output_amount: output,
            rate: Some(
                ExchangeRate::new(
                    CurrencyPair::new(from, to),
                    rate,
                    RateSource::Provider("p1".into()),
                    Tier::Provider,
                )
                .with_as_of(day),
            ),
            computed_at: Utc::now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_record_then_history() {
        let (accountant, _store, writer) = setup();
        let acme = CompanyId::new("acme");
        let conversion = result("EUR", "USD", dec!(100), dec!(110.00), dec!(1.1), date(2024, 5, 2));

        let id = accountant.record(&acme, &conversion, Some("INV-42".to_string()));
        writer.flush().await;

        let history = accountant.history(&acme, &HistoryFilter::new()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].from_amount, dec!(100));
        assert_eq!(history[0].to_amount, dec!(110.00));
        assert_eq!(history[0].rate_applied, dec!(1.1));
        assert_eq!(history[0].date, date(2024, 5, 2));
        assert_eq!(history[0].reference.as_deref(), Some("INV-42"));
    }

    #[tokio::test]
    async fn test_record_never_fails_when_store_down() {
        let (accountant, store, writer) = setup();
        store.set_offline(true);
        let conversion = result("EUR", "USD", dec!(100), dec!(110.00), dec!(1.1), date(2024, 5, 2));

        accountant.record(&CompanyId::new("acme"), &conversion, None);
        writer.flush().await;

        store.set_offline(false);
        assert_eq!(store.record_count(), 0);

        store.set_offline(true);
        let err = accountant.history(&CompanyId::new("acme"), &HistoryFilter::new()).await.unwrap_err();
        assert!(matches!(err, FxError::Storage(_)));
    }

    #[tokio::test]
    async fn test_gain_loss_per_currency() {
        let (accountant, store, writer) = setup();
        let acme = CompanyId::new("acme");

        // 100 * 1.0845 = 108.45 exactly; 10 * 1.08456 = 10.8456 rounded to 10.85.
        accountant.record(&acme, &result("EUR", "USD", dec!(100), dec!(108.45), dec!(1.0845), date(2024, 3, 1)), None);
        accountant.record(&acme, &result("EUR", "USD", dec!(10), dec!(10.85), dec!(1.08456), date(2024, 6, 1)), None);
        accountant.record(&acme, &result("USD", "XOF", dec!(1), dec!(605), dec!(604.6), date(2024, 7, 1)), None);
        accountant.record(&acme, &result("EUR", "USD", dec!(1), dec!(2), dec!(1), date(2023, 12, 31)), None);
        writer.flush().await;

        let snapshots = accountant.compute_gain_loss(&acme, 2024).await.unwrap();
        assert_eq!(snapshots.len(), 2);

        let usd = &snapshots[0];
        assert_eq!(usd.currency, CurrencyCode::usd());
        assert_eq!(usd.realized_gain, dec!(0.0044));
        assert_eq!(usd.unrealized_gain, Decimal::ZERO);

        let xof = &snapshots[1];
        assert_eq!(xof.currency, CurrencyCode::xof());
        assert_eq!(xof.realized_gain, dec!(0.4));

        let stored = store.snapshot(&acme, &CurrencyCode::usd(), 2024).unwrap();
        assert_eq!(stored.realized_gain, dec!(0.0044));
    }

    #[tokio::test]
    async fn test_gain_loss_empty_year() {
        let (accountant, _store, _writer) = setup();
        let snapshots = accountant.compute_gain_loss(&CompanyId::new("acme"), 2020).await.unwrap();
        assert!(snapshots.is_empty());
    }

    #[test]
    fn test_invalid_company_not_recorded() {
        let (accountant, store, _writer) = setup();
        let conversion = result("EUR", "USD", dec!(1), dec!(1.10), dec!(1.1), date(2024, 1, 1));
        accountant.record(&CompanyId::new("bad id"), &conversion, None);
        assert_eq!(store.record_count(), 0);
    }
}
