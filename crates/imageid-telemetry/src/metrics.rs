//! Metrics collection and reporting

use imageid_core::Error;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Metric names emitted through the `metrics` facade
pub mod names {
    pub const SELECTIONS_TOTAL: &str = "imageid_selections_total";
    pub const CLASSIFICATIONS_TOTAL: &str = "imageid_classifications_total";
    pub const FAILURES_TOTAL: &str = "imageid_failures_total";
    pub const INFERENCE_LATENCY_US: &str = "imageid_inference_latency_us";
}

/// Metrics collector for pipeline activity
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    selections: AtomicU64,
    classifications: AtomicU64,
    decode_failures: AtomicU64,
    preprocess_failures: AtomicU64,
    inference_failures: AtomicU64,
    other_failures: AtomicU64,
    total_latency_us: AtomicU64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                selections: AtomicU64::new(0),
                classifications: AtomicU64::new(0),
                decode_failures: AtomicU64::new(0),
                preprocess_failures: AtomicU64::new(0),
                inference_failures: AtomicU64::new(0),
                other_failures: AtomicU64::new(0),
                total_latency_us: AtomicU64::new(0),
            }),
        }
    }

    /// Describe the facade metrics to any installed recorder
    pub fn describe() {
        ::metrics::describe_counter!(
            names::SELECTIONS_TOTAL,
            "Total number of new image selections"
        );
        ::metrics::describe_counter!(
            names::CLASSIFICATIONS_TOTAL,
            "Total number of successful classifications"
        );
        ::metrics::describe_counter!(
            names::FAILURES_TOTAL,
            "Total number of failed classifications by stage"
        );
        ::metrics::describe_histogram!(
            names::INFERENCE_LATENCY_US,
            ::metrics::Unit::Microseconds,
            "End-to-end classification latency in microseconds"
        );
    }

    /// Record a new image selection
    pub fn record_selection(&self) {
        self.inner.selections.fetch_add(1, Ordering::Relaxed);
        ::metrics::counter!(names::SELECTIONS_TOTAL).increment(1);
    }

    /// Record a successful classification and its latency
    pub fn record_classification(&self, latency_us: u64) {
        self.inner.classifications.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        ::metrics::counter!(names::CLASSIFICATIONS_TOTAL).increment(1);
        ::metrics::histogram!(names::INFERENCE_LATENCY_US).record(latency_us as f64);
    }

    /// Record a failed classification, bucketed by the failing stage
    pub fn record_failure(&self, error: &Error) {
        let counter = match error {
            Error::Decode(_) => &self.inner.decode_failures,
            Error::Preprocess(_) => &self.inner.preprocess_failures,
            Error::Inference(_) => &self.inner.inference_failures,
            _ => &self.inner.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(stage = error.stage(), "Recorded classification failure");
        ::metrics::counter!(names::FAILURES_TOTAL, "stage" => error.stage()).increment(1);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            selections: self.inner.selections.load(Ordering::Relaxed),
            classifications: self.inner.classifications.load(Ordering::Relaxed),
            decode_failures: self.inner.decode_failures.load(Ordering::Relaxed),
            preprocess_failures: self.inner.preprocess_failures.load(Ordering::Relaxed),
            inference_failures: self.inner.inference_failures.load(Ordering::Relaxed),
            other_failures: self.inner.other_failures.load(Ordering::Relaxed),
            total_latency_us: self.inner.total_latency_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub selections: u64,
    pub classifications: u64,
    pub decode_failures: u64,
    pub preprocess_failures: u64,
    pub inference_failures: u64,
    pub other_failures: u64,
    pub total_latency_us: u64,
}

impl MetricsSnapshot {
    /// Total failed classifications across stages
    pub fn failures(&self) -> u64 {
        self.decode_failures + self.preprocess_failures + self.inference_failures + self.other_failures
    }

    /// Calculate average latency per successful classification
    pub fn avg_latency_us(&self) -> u64 {
        if self.classifications == 0 {
            0
        } else {
            self.total_latency_us / self.classifications
        }
    }

    /// Fraction of classification attempts that failed
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.classifications + self.failures();
        if attempts == 0 {
            0.0
        } else {
            self.failures() as f64 / attempts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collection() {
        let metrics = MetricsCollector::new();

        metrics.record_selection();
        metrics.record_classification(4000);
        metrics.record_classification(6000);
        metrics.record_failure(&Error::decode("404 Not Found"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.selections, 1);
        assert_eq!(snapshot.classifications, 2);
        assert_eq!(snapshot.decode_failures, 1);
        assert_eq!(snapshot.avg_latency_us(), 5000);
        assert!((snapshot.failure_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_bucketed_by_stage() {
        let metrics = MetricsCollector::new();

        metrics.record_failure(&Error::preprocess("zero-area image"));
        metrics.record_failure(&Error::inference("shape mismatch"));
        metrics.record_failure(&Error::not_ready("loading"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.preprocess_failures, 1);
        assert_eq!(snapshot.inference_failures, 1);
        assert_eq!(snapshot.other_failures, 1);
        assert_eq!(snapshot.failures(), 3);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = MetricsCollector::default().snapshot();
        assert_eq!(snapshot.avg_latency_us(), 0);
        assert_eq!(snapshot.failure_rate(), 0.0);
    }
}
