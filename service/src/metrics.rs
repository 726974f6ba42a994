//! Metrics collection for transfer service monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use simplebank_common::ErrorKind;

/// Transfer service metrics.
#[derive(Default)]
pub struct Metrics {
    /// Transfer requests accepted.
    pub transfers_total: AtomicU64,
    /// Transfers committed.
    pub transfers_committed: AtomicU64,
    /// Transfers in progress.
    pub transfers_active: AtomicU64,
    /// Requests refused because the service was not running.
    pub transfers_rejected: AtomicU64,
    /// Transfers cancelled by the caller or their deadline.
    pub transfers_cancelled: AtomicU64,
    /// Failures by kind.
    pub failed_not_found: AtomicU64,
    pub failed_conflict: AtomicU64,
    pub failed_storage: AtomicU64,
    pub failed_validation: AtomicU64,
    /// Units of work re-run after a conflict.
    pub conflict_retries: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer request entering the service.
    pub fn transfer_started(&self) {
        self.transfers_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transfer accepted for execution.
    pub fn transfer_accepted(&self) {
        self.transfers_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transfer leaving execution, whatever its outcome.
    pub fn transfer_finished(&self) {
        self.transfers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a committed transfer.
    pub fn transfer_committed(&self) {
        self.transfers_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed transfer.
    pub fn transfer_failed(&self, kind: ErrorKind) {
        let counter = match kind {
            ErrorKind::NotFound => &self.failed_not_found,
            ErrorKind::Conflict => &self.failed_conflict,
            ErrorKind::Storage => &self.failed_storage,
            ErrorKind::Validation => &self.failed_validation,
            ErrorKind::Cancelled => &self.transfers_cancelled,
            ErrorKind::Unavailable => &self.transfers_rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request refused before execution.
    pub fn transfer_rejected(&self) {
        self.transfers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a conflict retry.
    pub fn conflict_retry(&self) {
        self.conflict_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of transfers in progress.
    pub fn active(&self) -> u64 {
        self.transfers_active.load(Ordering::Relaxed)
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_total: self.transfers_total.load(Ordering::Relaxed),
            transfers_committed: self.transfers_committed.load(Ordering::Relaxed),
            transfers_active: self.transfers_active.load(Ordering::Relaxed),
            transfers_rejected: self.transfers_rejected.load(Ordering::Relaxed),
            transfers_cancelled: self.transfers_cancelled.load(Ordering::Relaxed),
            failed_not_found: self.failed_not_found.load(Ordering::Relaxed),
            failed_conflict: self.failed_conflict.load(Ordering::Relaxed),
            failed_storage: self.failed_storage.load(Ordering::Relaxed),
            failed_validation: self.failed_validation.load(Ordering::Relaxed),
            conflict_retries: self.conflict_retries.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            r#"# HELP simplebank_transfers_total Total transfer requests accepted
# TYPE simplebank_transfers_total counter
simplebank_transfers_total {}

# HELP simplebank_transfers_committed Total transfers committed
# TYPE simplebank_transfers_committed counter
simplebank_transfers_committed {}

# HELP simplebank_transfers_active Transfers in progress
# TYPE simplebank_transfers_active gauge
simplebank_transfers_active {}

# HELP simplebank_transfers_rejected Requests refused while not running
# TYPE simplebank_transfers_rejected counter
simplebank_transfers_rejected {}

# HELP simplebank_transfers_cancelled Transfers cancelled or timed out
# TYPE simplebank_transfers_cancelled counter
simplebank_transfers_cancelled {}

# HELP simplebank_transfers_failed Failed transfers by error kind
# TYPE simplebank_transfers_failed counter
simplebank_transfers_failed{{kind="not_found"}} {}
simplebank_transfers_failed{{kind="conflict"}} {}
simplebank_transfers_failed{{kind="storage"}} {}
simplebank_transfers_failed{{kind="validation"}} {}

# HELP simplebank_conflict_retries Units of work re-run after a conflict
# TYPE simplebank_conflict_retries counter
simplebank_conflict_retries {}
"#,
            s.transfers_total,
            s.transfers_committed,
            s.transfers_active,
            s.transfers_rejected,
            s.transfers_cancelled,
            s.failed_not_found,
            s.failed_conflict,
            s.failed_storage,
            s.failed_validation,
            s.conflict_retries,
        )
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transfers_total: u64,
    pub transfers_committed: u64,
    pub transfers_active: u64,
    pub transfers_rejected: u64,
    pub transfers_cancelled: u64,
    pub failed_not_found: u64,
    pub failed_conflict: u64,
    pub failed_storage: u64,
    pub failed_validation: u64,
    pub conflict_retries: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = Metrics::new();

        metrics.transfer_started();
        metrics.transfer_accepted();
        metrics.transfer_started();
        metrics.transfer_accepted();
        metrics.transfer_committed();
        metrics.transfer_finished();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.transfers_total, 2);
        assert_eq!(snapshot.transfers_committed, 1);
        assert_eq!(snapshot.transfers_active, 1);
    }

    #[test]
    fn test_failures_by_kind() {
        let metrics = Metrics::new();
        metrics.transfer_failed(ErrorKind::Conflict);
        metrics.transfer_failed(ErrorKind::Cancelled);
        metrics.transfer_failed(ErrorKind::NotFound);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_conflict, 1);
        assert_eq!(snapshot.transfers_cancelled, 1);
        assert_eq!(snapshot.failed_not_found, 1);
        assert_eq!(snapshot.failed_storage, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.transfer_accepted();
        metrics.transfer_failed(ErrorKind::Storage);

        let output = metrics.to_prometheus();
        assert!(output.contains("simplebank_transfers_total 1"));
        assert!(output.contains("simplebank_transfers_failed{kind=\"storage\"} 1"));
    }
}
