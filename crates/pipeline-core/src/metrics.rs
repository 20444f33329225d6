//! Process-local failure counters.
//!
//! The corpus carries no metrics crate, so "bump a per-stage failure metric" (the worker
//! runtime's outcome handling) is realized as atomic counters a binary can log periodically,
//! rather than introducing a dependency none of the example repos use.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct StageMetrics {
    pub messages_succeeded: AtomicU64,
    pub messages_business_failed: AtomicU64,
    pub messages_transient_retried: AtomicU64,
    pub messages_transient_exhausted: AtomicU64,
    pub messages_quarantined: AtomicU64,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self) {
        self.messages_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_business_failure(&self) {
        self.messages_business_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transient_retry(&self) {
        self.messages_transient_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transient_exhausted(&self) {
        self.messages_transient_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quarantine(&self) {
        self.messages_quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StageMetricsSnapshot {
        StageMetricsSnapshot {
            messages_succeeded: self.messages_succeeded.load(Ordering::Relaxed),
            messages_business_failed: self.messages_business_failed.load(Ordering::Relaxed),
            messages_transient_retried: self.messages_transient_retried.load(Ordering::Relaxed),
            messages_transient_exhausted: self.messages_transient_exhausted.load(Ordering::Relaxed),
            messages_quarantined: self.messages_quarantined.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StageMetricsSnapshot {
    pub messages_succeeded: u64,
    pub messages_business_failed: u64,
    pub messages_transient_retried: u64,
    pub messages_transient_exhausted: u64,
    pub messages_quarantined: u64,
}

impl std::fmt::Display for StageMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "succeeded={} business_failed={} transient_retried={} transient_exhausted={} quarantined={}",
            self.messages_succeeded,
            self.messages_business_failed,
            self.messages_transient_retried,
            self.messages_transient_exhausted,
            self.messages_quarantined
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let metrics = StageMetrics::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_transient_exhausted();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_succeeded, 2);
        assert_eq!(snapshot.messages_transient_exhausted, 1);
        assert_eq!(snapshot.messages_business_failed, 0);
    }
}
