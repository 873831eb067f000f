//! Cluster membership lookup.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::config::ClusterConfig;
use crate::error::{RpcError, RpcResult};

/// Source of cluster membership and broker addresses.
#[async_trait]
pub trait ClusterTopology: Send + Sync {
    /// Cluster name to the broker names in it.
    async fn cluster_address_table(&self) -> RpcResult<BTreeMap<String, BTreeSet<String>>>;

    /// Master address of a broker, if known.
    async fn resolve_master_address(&self, broker: &str) -> Option<String>;

    /// Brokers that may hold a view of `topic`.
    ///
    /// Defaults to every broker in every cluster; brokers without the topic
    /// simply report no view.
    async fn topic_brokers(&self, _topic: &str) -> RpcResult<BTreeSet<String>> {
        let table = self.cluster_address_table().await?;
        Ok(table.into_values().flatten().collect())
    }
}

/// Topology fixed at startup from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    clusters: BTreeMap<String, BTreeSet<String>>,
    addresses: BTreeMap<String, String>,
}

impl StaticTopology {
    /// Create an empty topology.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `cluster` config section.
    #[must_use]
    pub fn from_config(config: &ClusterConfig) -> Self {
        let mut topology = Self::new();
        for (cluster, brokers) in &config.clusters {
            for (broker, address) in brokers {
                topology = topology.with_broker(cluster, broker, address);
            }
        }
        topology
    }

    /// Add a broker to a cluster.
    #[must_use]
    pub fn with_broker(
        mut self,
        cluster: impl Into<String>,
        broker: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        let broker = broker.into();
        self.clusters
            .entry(cluster.into())
            .or_default()
            .insert(broker.clone());
        self.addresses.insert(broker, address.into());
        self
    }

    /// Number of known brokers.
    #[must_use]
    pub fn broker_count(&self) -> usize {
        self.addresses.len()
    }
}

#[async_trait]
impl ClusterTopology for StaticTopology {
    async fn cluster_address_table(&self) -> RpcResult<BTreeMap<String, BTreeSet<String>>> {
        if self.clusters.is_empty() {
            return Err(RpcError::TopologyUnavailable {
                message: "no clusters configured".to_string(),
            });
        }
        Ok(self.clusters.clone())
    }

    async fn resolve_master_address(&self, broker: &str) -> Option<String> {
        self.addresses.get(broker).cloned()
    }
}
