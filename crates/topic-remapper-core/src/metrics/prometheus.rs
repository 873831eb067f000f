//! Prometheus metrics for remapping runs.
//!
//! The remapper is a one-shot process, so metrics are exported as a text
//! exposition at the end of the run rather than scraped.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Remapper metrics collection.
pub struct RemapMetrics {
    /// The Prometheus registry.
    pub registry: Registry,

    /// Runs by outcome: `success`, `partial`, `noop`, `failed`.
    pub runs_total: IntCounterVec,

    /// Apply requests by result: `ok`, `timeout`, `rejected`, `transport`.
    pub apply_requests_total: IntCounterVec,

    /// Latency of individual apply requests.
    pub apply_duration_seconds: Histogram,

    /// Logical queues moved by produced plans.
    pub queues_moved_total: IntCounter,

    /// Epoch of the last plan produced or loaded, by topic.
    pub plan_epoch: IntGaugeVec,
}

impl RemapMetrics {
    /// Create a new metrics collection.
    ///
    /// # Panics
    ///
    /// Panics if metric registration fails (should not happen with unique names).
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new("topic_remapper_runs_total", "Remapping runs by outcome"),
            &["outcome"],
        )
        .expect("metric creation should succeed");

        let apply_requests_total = IntCounterVec::new(
            Opts::new(
                "topic_remapper_apply_requests_total",
                "Per-broker apply requests by result",
            ),
            &["result"],
        )
        .expect("metric creation should succeed");

        let apply_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "topic_remapper_apply_duration_seconds",
                "Per-broker apply request latency in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .expect("metric creation should succeed");

        let queues_moved_total = IntCounter::new(
            "topic_remapper_queues_moved_total",
            "Logical queues moved by produced plans",
        )
        .expect("metric creation should succeed");

        let plan_epoch = IntGaugeVec::new(
            Opts::new("topic_remapper_plan_epoch", "Epoch of the last plan by topic"),
            &["topic"],
        )
        .expect("metric creation should succeed");

        registry
            .register(Box::new(runs_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(apply_requests_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(apply_duration_seconds.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(queues_moved_total.clone()))
            .expect("metric registration should succeed");
        registry
            .register(Box::new(plan_epoch.clone()))
            .expect("metric registration should succeed");

        Self {
            registry,
            runs_total,
            apply_requests_total,
            apply_duration_seconds,
            queues_moved_total,
            plan_epoch,
        }
    }

    /// Record the outcome of a run.
    pub fn record_run(&self, outcome: &str) {
        self.runs_total.with_label_values(&[outcome]).inc();
    }

    /// Record one apply request and its latency.
    pub fn record_apply(&self, result: &str, duration_seconds: f64) {
        self.apply_requests_total.with_label_values(&[result]).inc();
        self.apply_duration_seconds.observe(duration_seconds);
    }

    /// Record a produced or loaded plan.
    pub fn record_plan(&self, topic: &str, epoch: u64, queues_moved: usize) {
        self.plan_epoch
            .with_label_values(&[topic])
            .set(i64::try_from(epoch).unwrap_or(i64::MAX));
        self.queues_moved_total.inc_by(queues_moved as u64);
    }

    /// Encode metrics in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = String::new();
        encoder.encode_utf8(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for RemapMetrics {
    fn default() -> Self {
        Self::new()
    }
}
