//! Best-effort background persistence.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cambio_common::time::constants::STORE_TIMEOUT_MS;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::metrics::SharedMetrics;
use crate::rate::ExchangeRate;
use crate::store::{ConversionRecord, RateStore};

/// A single deferred write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Rate(ExchangeRate),
    Record(ConversionRecord),
}

impl WriteOp {
    fn kind(&self) -> &'static str {
        match self {
            WriteOp::Rate(_) => "rate",
            WriteOp::Record(_) => "conversion_record",
        }
    }
}

/// Fire-and-forget writer in front of the durable store.
///
/// Each submitted write runs on its own task. Failures are logged and
/// counted, never returned. Each write is bounded by the store timeout, so
/// `flush` waits at most that long for every write submitted so far.
pub struct BackgroundWriter {
    store: Arc<dyn RateStore>,
    metrics: SharedMetrics,
    timeout: Duration,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    closed: AtomicBool,
}

impl BackgroundWriter {
    pub fn new(store: Arc<dyn RateStore>, metrics: SharedMetrics) -> Self {
        Self {
            store,
            metrics,
            timeout: Duration::from_millis(STORE_TIMEOUT_MS),
            pending: Arc::new(AtomicUsize::new(0)),
            drained: Arc::new(Notify::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Bound every write by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Queue a write. Never blocks and never fails from the caller's side.
    pub fn submit(&self, op: WriteOp) {
        if self.closed.load(Ordering::SeqCst) {
            warn!(kind = op.kind(), "Writer closed, dropping write");
            self.metrics.persistence_failure();
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!(kind = op.kind(), "No async runtime, dropping write");
            self.metrics.persistence_failure();
            return;
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        let store = Arc::clone(&self.store);
        let metrics = Arc::clone(&self.metrics);
        let pending = Arc::clone(&self.pending);
        let drained = Arc::clone(&self.drained);
        let timeout = self.timeout;

        handle.spawn(async move {
            let kind = op.kind();
            let write = async {
                match &op {
                    WriteOp::Rate(rate) => store.upsert_rate(rate).await,
                    WriteOp::Record(record) => store.append_conversion_record(record).await,
                }
            };
            let result = match tokio::time::timeout(timeout, write).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(timeout)),
            };

            match result {
                Ok(()) => {
                    debug!(kind, "Background write complete");
                    if matches!(op, WriteOp::Record(_)) {
                        metrics.record_written();
                    }
                }
                Err(e) => {
                    warn!(kind, error = %e, "Background write failed");
                    metrics.persistence_failure();
                }
            }

            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                drained.notify_waiters();
            }
        });
    }

    /// Number of writes still running.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until no write is pending.
    pub async fn flush(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Reject further writes and drain the ones already submitted.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.flush().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
