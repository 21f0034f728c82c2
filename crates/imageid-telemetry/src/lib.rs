//! ImageID Telemetry
//!
//! Metrics for the ImageID inference pipeline.
//!
//! Provides:
//! - In-process counters with snapshot/averaging for front ends
//! - `metrics` facade emission so any installed recorder (Prometheus) sees the same events

pub mod metrics;

pub use crate::metrics::{MetricsCollector, MetricsSnapshot};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::metrics::{MetricsCollector, MetricsSnapshot};
}
