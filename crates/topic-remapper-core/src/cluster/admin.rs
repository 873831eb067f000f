//! Broker admin protocol.
//!
//! Two calls are needed to remap a static topic: read a broker's view of the
//! topic, and push a new view to it. Requests and responses travel as JSON
//! bodies inside [`AdminFrame`](super::codec::AdminFrame)s.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RpcResult;
use crate::mapping::{BrokerTopicView, MappingSnapshot};

/// The portion of a plan pushed to one broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSlice {
    pub topic: String,
    pub broker: String,
    /// Epoch the broker must hold locally to accept, unless `force` is set.
    pub expected_epoch: u64,
    /// Replace whatever epoch the broker holds.
    pub force: bool,
    /// The broker's complete new view.
    pub view: BrokerTopicView,
}

impl MappingSlice {
    /// One slice per broker in `plan`, ordered by broker name.
    #[must_use]
    pub fn from_plan(plan: &MappingSnapshot, force: bool) -> Vec<Self> {
        let expected_epoch = plan.predecessor_epoch();
        plan.brokers
            .values()
            .map(|view| Self {
                topic: plan.topic.clone(),
                broker: view.broker.clone(),
                expected_epoch,
                force,
                view: view.clone(),
            })
            .collect()
    }
}

/// Broker confirmation of an applied slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyAck {
    pub broker: String,
    /// Epoch the broker now holds.
    pub epoch: u64,
}

/// Admin request body.
///
/// Externally tagged: views carry integer-keyed maps, which an internally
/// tagged enum cannot decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRequest {
    /// Read the broker's view of a topic.
    GetTopicView { topic: String },
    /// Install a new view of a topic.
    ApplyMapping { slice: MappingSlice },
}

/// Admin response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminResponse {
    /// `None` when the broker does not host the topic.
    TopicView { view: Option<BrokerTopicView> },
    Applied(ApplyAck),
    /// The broker refused a slice, typically on an epoch mismatch.
    Rejected { reason: String },
    Error { message: String },
}

/// Administrative access to brokers.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    /// Fetch a broker's view of `topic`; `Ok(None)` if it does not host it.
    async fn fetch_topic_view(&self, address: &str, topic: &str) -> RpcResult<Option<BrokerTopicView>>;

    /// Push a slice to the broker at `address`.
    ///
    /// A refusal by the broker surfaces as
    /// [`RpcError::Rejected`](crate::error::RpcError::Rejected).
    async fn apply_mapping(&self, address: &str, slice: &MappingSlice, timeout: Duration) -> RpcResult<ApplyAck>;

    /// Release connections. Called once at the end of every run.
    async fn shutdown(&self);
}
