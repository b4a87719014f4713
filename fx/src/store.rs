//! Durable rate store interface and an in-memory implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cambio_common::{CompanyId, ConversionId, CurrencyCode, CurrencyPair, Timestamp};
use chrono::NaiveDate;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::rate::{ExchangeRate, RateSource};

/// An audited conversion. Append-only: never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub id: ConversionId,
    pub company_id: CompanyId,
    pub from: CurrencyCode,
    pub to: CurrencyCode,
    pub from_amount: Decimal,
    pub to_amount: Decimal,
    pub rate_applied: Decimal,
    /// Market date of the rate applied.
    pub date: NaiveDate,
    pub reference: Option<String>,
    pub recorded_at: Timestamp,
}

/// Realized and unrealized currency gain for one company, currency and fiscal year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainLossSnapshot {
    pub company_id: CompanyId,
    pub currency: CurrencyCode,
    pub fiscal_year: i32,
    pub realized_gain: Decimal,
    pub unrealized_gain: Decimal,
    pub computed_at: Timestamp,
}

/// Filters for conversion history queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub from: Option<CurrencyCode>,
    pub to: Option<CurrencyCode>,
    /// Inclusive on both ends.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_currency(mut self, code: impl Into<CurrencyCode>) -> Self {
        self.from = Some(code.into());
        self
    }

    pub fn to_currency(mut self, code: impl Into<CurrencyCode>) -> Self {
        self.to = Some(code.into());
        self
    }

    pub fn between(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.date_range = Some((start, end));
        self
    }

    pub fn matches(&self, record: &ConversionRecord) -> bool {
        self.from.as_ref().map_or(true, |c| *c == record.from)
            && self.to.as_ref().map_or(true, |c| *c == record.to)
            && self
                .date_range
                .map_or(true, |(start, end)| record.date >= start && record.date <= end)
    }
}

/// Persistence collaborator for rates, conversion records and gain/loss snapshots.
///
/// Writes must be idempotent: rates upsert by `(base, quote, date, source)`,
/// records by id, snapshots by `(company, currency, fiscal year)`.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Most recent rate for exactly `pair` dated on or before `as_of`.
    async fn get_latest_rate(&self, pair: &CurrencyPair, as_of: NaiveDate) -> Result<Option<ExchangeRate>, StoreError>;

    async fn upsert_rate(&self, rate: &ExchangeRate) -> Result<(), StoreError>;

    async fn append_conversion_record(&self, record: &ConversionRecord) -> Result<(), StoreError>;

    /// Records for `company` matching `filter`, oldest first.
    async fn list_conversion_records(
        &self,
        company: &CompanyId,
        filter: &HistoryFilter,
    ) -> Result<Vec<ConversionRecord>, StoreError>;

    async fn upsert_gain_loss_snapshot(&self, snapshot: &GainLossSnapshot) -> Result<(), StoreError>;
}

type RateKey = (CurrencyPair, NaiveDate, RateSource);
type SnapshotKey = (CompanyId, CurrencyCode, i32);

/// In-memory [`RateStore`], used by the binary and by tests.
///
/// Can be switched offline to simulate an unreachable database.
#[derive(Default)]
pub struct MemoryRateStore {
    rates: RwLock<HashMap<RateKey, ExchangeRate>>,
    records: RwLock<Vec<ConversionRecord>>,
    snapshots: RwLock<HashMap<SnapshotKey, GainLossSnapshot>>,
    offline: AtomicBool,
}

impl MemoryRateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `StoreError::Unavailable` until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn rate_count(&self) -> usize {
        self.rates.read().len()
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    pub fn snapshot(&self, company: &CompanyId, currency: &CurrencyCode, fiscal_year: i32) -> Option<GainLossSnapshot> {
        self.snapshots
            .read()
            .get(&(company.clone(), currency.clone(), fiscal_year))
            .cloned()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn get_latest_rate(&self, pair: &CurrencyPair, as_of: NaiveDate) -> Result<Option<ExchangeRate>, StoreError> {
        self.check_online()?;
        let rates = self.rates.read();
        Ok(rates
            .values()
            .filter(|r| r.pair == *pair && r.as_of <= as_of)
            .max_by_key(|r| (r.as_of, r.resolved_at))
            .cloned())
    }

    async fn upsert_rate(&self, rate: &ExchangeRate) -> Result<(), StoreError> {
        self.check_online()?;
        if rate.rate <= Decimal::ZERO || rate.pair.is_identity() {
            return Err(StoreError::Rejected(format!("invalid rate {} for {}", rate.rate, rate.pair)));
        }
        debug!(pair = %rate.pair, as_of = %rate.as_of, "Upserting rate");
        let key = (rate.pair.clone(), rate.as_of, rate.source.clone());
        self.rates.write().insert(key, rate.clone());
        Ok(())
    }

    async fn append_conversion_record(&self, record: &ConversionRecord) -> Result<(), StoreError> {
        self.check_online()?;
        let mut records = self.records.write();
        if records.iter().any(|r| r.id == record.id) {
            return Ok(());
        }
        records.push(record.clone());
        Ok(())
    }

    async fn list_conversion_records(
        &self,
        company: &CompanyId,
        filter: &HistoryFilter,
    ) -> Result<Vec<ConversionRecord>, StoreError> {
        self.check_online()?;
        let mut matching: Vec<ConversionRecord> = self
            .records
            .read()
            .iter()
            .filter(|r| r.company_id == *company && filter.matches(r))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.date, r.recorded_at, r.id));
        Ok(matching)
    }

    async fn upsert_gain_loss_snapshot(&self, snapshot: &GainLossSnapshot) -> Result<(), StoreError> {
        self.check_online()?;
        let key = (snapshot.company_id.clone(), snapshot.currency.clone(), snapshot.fiscal_year);
        self.snapshots.write().insert(key, snapshot.clone());
        Ok(())
    }
}
