//! Pushing a plan to the cluster.
//!
//! Each broker in a plan receives its complete new view in one request. All
//! requests run concurrently, each bounded by the same timeout, and every
//! one of them is awaited. Failures are collected per broker; nothing is
//! retried or rolled back.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{info, warn};

use crate::cluster::{BrokerAdmin, MappingSlice};
use crate::error::{ApplyError, RpcError};
use crate::mapping::MappingSnapshot;
use crate::metrics::RemapMetrics;

/// Result of pushing one slice.
#[derive(Debug)]
pub struct BrokerOutcome {
    pub broker: String,
    pub address: String,
    pub result: Result<(), ApplyError>,
    pub elapsed: Duration,
}

impl BrokerOutcome {
    /// Metric label for this outcome.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match &self.result {
            Ok(()) => "ok",
            Err(ApplyError::Timeout { .. }) => "timeout",
            Err(ApplyError::Rejected { .. }) => "rejected",
            Err(ApplyError::Transport(_)) => "transport",
        }
    }
}

/// Outcome of applying one plan, one entry per broker sorted by name.
#[derive(Debug)]
pub struct ApplyReport {
    pub topic: String,
    pub epoch: u64,
    pub outcomes: Vec<BrokerOutcome>,
}

impl ApplyReport {
    /// Brokers that accepted their slice.
    pub fn succeeded(&self) -> impl Iterator<Item = &BrokerOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_ok())
    }

    /// Brokers that did not.
    pub fn failed(&self) -> impl Iterator<Item = &BrokerOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Whether every broker accepted its slice.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    /// One-line human readable summary, naming each failed broker.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = format!(
            "topic '{}' epoch {}: {}/{} brokers applied",
            self.topic,
            self.epoch,
            self.succeeded().count(),
            self.outcomes.len()
        );
        for outcome in self.failed() {
            if let Err(e) = &outcome.result {
                let _ = write!(out, "; {} ({}): {e}", outcome.broker, outcome.address);
            }
        }
        out
    }
}

/// Fans a plan out to its brokers.
pub struct Applicator<A> {
    admin: Arc<A>,
    metrics: Option<Arc<RemapMetrics>>,
}

impl<A: BrokerAdmin> Applicator<A> {
    #[must_use]
    pub fn new(admin: Arc<A>) -> Self {
        Self {
            admin,
            metrics: None,
        }
    }

    /// Record per-broker results in `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RemapMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Push every broker's slice of `plan` and wait for all of them.
    ///
    /// `addresses` maps broker names to master addresses; a broker missing
    /// from it is reported as a transport failure without being contacted.
    pub async fn apply(
        &self,
        plan: &MappingSnapshot,
        addresses: &BTreeMap<String, String>,
        timeout: Duration,
        force: bool,
    ) -> ApplyReport {
        let slices = MappingSlice::from_plan(plan, force);
        info!(
            topic = %plan.topic,
            epoch = plan.epoch,
            brokers = slices.len(),
            force,
            "applying mapping"
        );

        let requests = slices.iter().map(|slice| {
            let address = addresses.get(&slice.broker).cloned();
            self.push(slice, address, timeout)
        });
        let outcomes = join_all(requests).await;

        let report = ApplyReport {
            topic: plan.topic.clone(),
            epoch: plan.epoch,
            outcomes,
        };
        if report.is_success() {
            info!(topic = %report.topic, epoch = report.epoch, "mapping applied on all brokers");
        } else {
            warn!(summary = %report.summary(), "mapping only partially applied");
        }
        report
    }

    async fn push(&self, slice: &MappingSlice, address: Option<String>, timeout: Duration) -> BrokerOutcome {
        let started = Instant::now();
        let Some(address) = address else {
            return self.finish(
                slice,
                String::new(),
                Err(ApplyError::Transport(RpcError::TopologyUnavailable {
                    message: format!("no address for broker '{}'", slice.broker),
                })),
                started,
            );
        };

        let result = match tokio::time::timeout(timeout, self.admin.apply_mapping(&address, slice, timeout)).await {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => Err(ApplyError::from(e)),
            Err(_) => Err(ApplyError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        self.finish(slice, address, result, started)
    }

    fn finish(
        &self,
        slice: &MappingSlice,
        address: String,
        result: Result<(), ApplyError>,
        started: Instant,
    ) -> BrokerOutcome {
        let outcome = BrokerOutcome {
            broker: slice.broker.clone(),
            address,
            result,
            elapsed: started.elapsed(),
        };

        match &outcome.result {
            Ok(()) => info!(
                broker = %outcome.broker,
                address = %outcome.address,
                epoch = slice.view.epoch,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "broker accepted mapping"
            ),
            Err(e) => warn!(
                broker = %outcome.broker,
                address = %outcome.address,
                error = %e,
                "broker did not apply mapping"
            ),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_apply(outcome.label(), outcome.elapsed.as_secs_f64());
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cluster::ApplyAck;
    use crate::error::RpcResult;
    use crate::mapping::{BrokerTopicView, SnapshotKind};

    /// Admin double answering per address from a fixed script.
    #[derive(Default)]
    struct ScriptedAdmin {
        delays: BTreeMap<String, Duration>,
        rejects: Vec<String>,
        seen: Mutex<Vec<MappingSlice>>,
    }

    #[async_trait]
    impl BrokerAdmin for ScriptedAdmin {
        async fn fetch_topic_view(&self, _address: &str, _topic: &str) -> RpcResult<Option<BrokerTopicView>> {
            Ok(None)
        }

        async fn apply_mapping(&self, address: &str, slice: &MappingSlice, _timeout: Duration) -> RpcResult<ApplyAck> {
            self.seen.lock().unwrap().push(slice.clone());
            if let Some(delay) = self.delays.get(address) {
                tokio::time::sleep(*delay).await;
            }
            if self.rejects.iter().any(|a| a == address) {
                return Err(RpcError::Rejected {
                    reason: "epoch mismatch".to_string(),
                });
            }
            Ok(ApplyAck {
                broker: slice.broker.clone(),
                epoch: slice.view.epoch,
            })
        }

        async fn shutdown(&self) {}
    }

    fn plan(brokers: &[&str]) -> MappingSnapshot {
        let views = brokers
            .iter()
            .map(|b| ((*b).to_string(), BrokerTopicView::new(*b, "orders", 4, 3)))
            .collect();
        let mut plan = MappingSnapshot::current("orders", 4, views);
        plan.kind = SnapshotKind::Remapping;
        plan
    }

    fn addresses(brokers: &[&str]) -> BTreeMap<String, String> {
        brokers
            .iter()
            .map(|b| ((*b).to_string(), format!("{b}:10911")))
            .collect()
    }

    #[tokio::test]
    async fn test_all_brokers_succeed() {
        let admin = Arc::new(ScriptedAdmin::default());
        let metrics = Arc::new(RemapMetrics::new());
        let applicator = Applicator::new(Arc::clone(&admin)).with_metrics(Arc::clone(&metrics));

        let names = ["a", "b", "c"];
        let report = applicator
            .apply(&plan(&names), &addresses(&names), Duration::from_secs(1), false)
            .await;

        assert!(report.is_success());
        assert_eq!(report.succeeded().count(), 3);
        let seen = admin.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|s| s.expected_epoch == 3 && !s.force));
        assert!(metrics
            .encode()
            .unwrap()
            .contains("topic_remapper_apply_requests_total{result=\"ok\"} 3"));
    }

    #[tokio::test]
    async fn test_one_slow_broker_times_out_others_succeed() {
        let mut admin = ScriptedAdmin::default();
        admin
            .delays
            .insert("c:10911".to_string(), Duration::from_secs(5));
        let applicator = Applicator::new(Arc::new(admin));

        let names = ["a", "b", "c"];
        let report = applicator
            .apply(&plan(&names), &addresses(&names), Duration::from_millis(100), false)
            .await;

        assert!(!report.is_success());
        assert_eq!(report.succeeded().count(), 2);
        let failed: Vec<&BrokerOutcome> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].broker, "c");
        assert!(matches!(failed[0].result, Err(ApplyError::Timeout { timeout_ms: 100 })));
        assert!(report.summary().contains("2/3"));
    }

    #[tokio::test]
    async fn test_rejection_is_reported() {
        let admin = ScriptedAdmin {
            rejects: vec!["b:10911".to_string()],
            ..ScriptedAdmin::default()
        };
        let applicator = Applicator::new(Arc::new(admin));

        let names = ["a", "b"];
        let report = applicator
            .apply(&plan(&names), &addresses(&names), Duration::from_secs(1), false)
            .await;

        let failed: Vec<&BrokerOutcome> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].label(), "rejected");
    }

    #[tokio::test]
    async fn test_missing_address_is_not_contacted() {
        let admin = Arc::new(ScriptedAdmin::default());
        let applicator = Applicator::new(Arc::clone(&admin));

        let report = applicator
            .apply(&plan(&["a", "b"]), &addresses(&["a"]), Duration::from_secs(1), false)
            .await;

        assert_eq!(admin.seen.lock().unwrap().len(), 1);
        let failed: Vec<&BrokerOutcome> = report.failed().collect();
        assert_eq!(failed[0].broker, "b");
        assert_eq!(failed[0].label(), "transport");
    }

    #[tokio::test]
    async fn test_outcomes_sorted_by_broker() {
        let applicator = Applicator::new(Arc::new(ScriptedAdmin::default()));
        let names = ["c", "a", "b"];
        let report = applicator
            .apply(&plan(&names), &addresses(&names), Duration::from_secs(1), true)
            .await;

        let order: Vec<&str> = report.outcomes.iter().map(|o| o.broker.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
