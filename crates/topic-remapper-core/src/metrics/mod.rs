//! Metrics collection for remapping runs.
//!
//! Provides Prometheus-compatible counters for run outcomes, per-broker
//! apply results and plan sizes.

pub mod prometheus;

pub use prometheus::RemapMetrics;
