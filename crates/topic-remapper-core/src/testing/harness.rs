//! A cluster of mock brokers for end-to-end tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cluster::{BrokerClient, StaticTopology};
use crate::config::RemapperConfig;
use crate::mapping::{BrokerTopicView, MappingItem, MappingSnapshot};
use crate::orchestrator::Orchestrator;

use super::mock_broker::MockBroker;

/// Running mock brokers plus a topology that points at them.
pub struct MockCluster {
    brokers: BTreeMap<String, MockBroker>,
    topology: StaticTopology,
}

impl MockCluster {
    /// Start one mock broker per name, all in cluster `cluster`.
    ///
    /// # Panics
    ///
    /// Panics if a broker cannot bind a local port.
    pub async fn start(cluster: &str, names: &[&str]) -> Self {
        Self::start_clusters(&[(cluster, names)]).await
    }

    /// Start mock brokers grouped into several clusters.
    ///
    /// # Panics
    ///
    /// Panics if a broker cannot bind a local port.
    pub async fn start_clusters(layout: &[(&str, &[&str])]) -> Self {
        let mut brokers = BTreeMap::new();
        let mut topology = StaticTopology::new();
        for (cluster, names) in layout {
            for name in *names {
                let mut broker = MockBroker::new(*name);
                let address = broker
                    .start()
                    .await
                    .expect("Failed to start mock broker");
                topology = topology.with_broker(*cluster, *name, address);
                brokers.insert((*name).to_string(), broker);
            }
        }
        Self { brokers, topology }
    }

    /// Topology listing every started broker.
    #[must_use]
    pub fn topology(&self) -> StaticTopology {
        self.topology.clone()
    }

    /// Add a broker name to the topology without starting it.
    pub fn register_unreachable(&mut self, cluster: &str, name: &str, address: &str) {
        self.topology = self.topology.clone().with_broker(cluster, name, address);
    }

    /// A mock broker by name.
    ///
    /// # Panics
    ///
    /// Panics if no broker of that name was started.
    #[must_use]
    pub fn broker(&self, name: &str) -> &MockBroker {
        self.brokers
            .get(name)
            .unwrap_or_else(|| panic!("no mock broker named '{name}'"))
    }

    /// Install every view of `snapshot` on its broker.
    pub async fn seed(&self, snapshot: &MappingSnapshot) {
        for view in snapshot.brokers.values() {
            if let Some(broker) = self.brokers.get(&view.broker) {
                broker.set_view(view.clone()).await;
            }
        }
    }

    /// Current views of `topic` held by the mock brokers.
    pub async fn views(&self, topic: &str) -> BTreeMap<String, BrokerTopicView> {
        let mut views = BTreeMap::new();
        for (name, broker) in &self.brokers {
            if let Some(view) = broker.view(topic).await {
                views.insert(name.clone(), view);
            }
        }
        views
    }

    /// Total apply requests received across all brokers.
    pub async fn apply_call_count(&self) -> usize {
        let mut count = 0;
        for broker in self.brokers.values() {
            count += broker.apply_calls().await.len();
        }
        count
    }

    /// An orchestrator wired to this cluster over real TCP.
    #[must_use]
    pub fn orchestrator(&self, config: &RemapperConfig) -> Orchestrator<StaticTopology, BrokerClient> {
        Orchestrator::new(
            Arc::new(self.topology()),
            Arc::new(BrokerClient::new(&config.admin)),
            config,
        )
    }

    /// Stop every broker.
    pub async fn stop(&mut self) {
        for broker in self.brokers.values_mut() {
            broker.stop().await;
        }
    }
}

/// Snapshot of `topic` at `epoch` where logical queue `q` is led by
/// `leaders[q]` on that broker's next free physical queue, and each physical
/// queue has `writes` messages written.
#[must_use]
pub fn static_topic(topic: &str, epoch: u64, leaders: &[&str], writes: i64) -> MappingSnapshot {
    let total = u32::try_from(leaders.len()).unwrap_or(u32::MAX);
    let mut brokers: BTreeMap<String, BrokerTopicView> = BTreeMap::new();
    for (queue, leader) in (0u32..).zip(leaders) {
        let view = brokers
            .entry((*leader).to_string())
            .or_insert_with(|| BrokerTopicView::new(*leader, topic, epoch, total));
        let queue_id = view.config.write_queue_nums;
        view.config.read_queue_nums += 1;
        view.config.write_queue_nums += 1;
        view.hosted_queues
            .insert(queue, vec![MappingItem::active(epoch, *leader, queue_id, 0, 0)]);
        view.max_offsets.insert(queue_id, writes);
    }
    MappingSnapshot::current(topic, epoch, brokers)
}
