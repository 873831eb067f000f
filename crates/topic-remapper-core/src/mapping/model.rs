//! Mapping snapshot data model.
//!
//! A static topic has a fixed number of logical queues. Each logical queue
//! carries an append-only history of [`MappingItem`]s, one per physical queue
//! it has lived on. The last item is the active tail; every earlier item is
//! sealed with a concrete end offset.
//!
//! # Offsets
//!
//! `start_offset`/`end_offset` are physical offsets on the hosting broker.
//! `logic_offset` is where the item begins in the logical queue's own offset
//! space, so a sealed item covers logical offsets
//! `[logic_offset, logic_offset + end_offset - start_offset)`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Read and write permission bits for a topic config.
pub const PERM_READ_WRITE: u32 = 0b110;

/// One entry in a logical queue's assignment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingItem {
    /// Epoch at which this item became active.
    pub epoch: u64,
    /// Broker hosting the physical queue.
    pub broker: String,
    /// Physical queue index on that broker.
    pub queue_id: u32,
    /// Logical offset at which this item starts.
    pub logic_offset: i64,
    /// First physical offset (inclusive).
    pub start_offset: i64,
    /// Last physical offset (exclusive); `None` while the item is the tail.
    #[serde(default)]
    pub end_offset: Option<i64>,
}

impl MappingItem {
    /// Create an unbounded tail item.
    #[must_use]
    pub fn active(
        epoch: u64,
        broker: impl Into<String>,
        queue_id: u32,
        logic_offset: i64,
        start_offset: i64,
    ) -> Self {
        Self {
            epoch,
            broker: broker.into(),
            queue_id,
            logic_offset,
            start_offset,
            end_offset: None,
        }
    }

    /// Whether the item has a concrete end offset.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.end_offset.is_some()
    }

    /// Logical offset one past the last message of a sealed item.
    ///
    /// Returns `None` for the unbounded tail, or when the end does not fit
    /// in an `i64`.
    #[must_use]
    pub fn logic_end(&self) -> Option<i64> {
        let end = self.end_offset?;
        self.logic_offset.checked_add(end.checked_sub(self.start_offset)?)
    }

    /// Return a copy sealed at `end_offset`.
    #[must_use]
    pub fn sealed_at(&self, end_offset: i64) -> Self {
        Self {
            end_offset: Some(end_offset),
            ..self.clone()
        }
    }
}

/// Standard topic configuration on one broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub topic: String,
    pub read_queue_nums: u32,
    pub write_queue_nums: u32,
    #[serde(default = "default_perm")]
    pub perm: u32,
}

fn default_perm() -> u32 {
    PERM_READ_WRITE
}

impl TopicConfig {
    /// A config with no queues yet, readable and writable.
    #[must_use]
    pub fn empty(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            read_queue_nums: 0,
            write_queue_nums: 0,
            perm: PERM_READ_WRITE,
        }
    }
}

/// A broker's local belief about a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerTopicView {
    /// Name of the broker this view came from.
    pub broker: String,
    /// Queue counts and permissions.
    pub config: TopicConfig,
    /// Mapping epoch the broker last observed.
    pub epoch: u64,
    /// Number of logical queues of the topic.
    pub total_queues: u32,
    /// Logical queue id to the history slice this broker holds.
    #[serde(default)]
    pub hosted_queues: BTreeMap<u32, Vec<MappingItem>>,
    /// Physical queue id to the last known write offset.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub max_offsets: BTreeMap<u32, i64>,
}

impl BrokerTopicView {
    /// Create a view with no hosted queues.
    #[must_use]
    pub fn new(broker: impl Into<String>, topic: impl Into<String>, epoch: u64, total_queues: u32) -> Self {
        Self {
            broker: broker.into(),
            config: TopicConfig::empty(topic),
            epoch,
            total_queues,
            hosted_queues: BTreeMap::new(),
            max_offsets: BTreeMap::new(),
        }
    }

    /// Topic name from the embedded config.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Logical queues whose active tail lives on this broker.
    pub fn leader_queues(&self) -> impl Iterator<Item = (u32, &Vec<MappingItem>)> + '_ {
        self.hosted_queues
            .iter()
            .filter(|(_, items)| items.last().is_some_and(|tail| tail.broker == self.broker))
            .map(|(queue, items)| (*queue, items))
    }

    /// Whether this broker leads at least one logical queue.
    #[must_use]
    pub fn is_hosting(&self) -> bool {
        self.leader_queues().next().is_some()
    }
}

/// Type tag carried by a snapshot and its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotKind {
    /// A state as read from the cluster, or to be asserted as-is.
    CreateOrUpdate,
    /// A state computed by the planner from its predecessor epoch.
    Remapping,
}

/// The complete, versioned picture of a topic's mapping at one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    pub topic: String,
    pub kind: SnapshotKind,
    pub epoch: u64,
    /// Broker name to that broker's view.
    pub brokers: BTreeMap<String, BrokerTopicView>,
    /// Brokers newly receiving queues.
    #[serde(default)]
    pub map_in: BTreeSet<String>,
    /// Brokers giving up queues.
    #[serde(default)]
    pub map_out: BTreeSet<String>,
}

impl MappingSnapshot {
    /// Wrap fetched views as a `CREATE_OR_UPDATE` snapshot.
    #[must_use]
    pub fn current(topic: impl Into<String>, epoch: u64, brokers: BTreeMap<String, BrokerTopicView>) -> Self {
        Self {
            topic: topic.into(),
            kind: SnapshotKind::CreateOrUpdate,
            epoch,
            brokers,
            map_in: BTreeSet::new(),
            map_out: BTreeSet::new(),
        }
    }

    /// Brokers that lead at least one logical queue.
    #[must_use]
    pub fn hosting_brokers(&self) -> BTreeSet<String> {
        self.brokers
            .values()
            .filter(|view| view.is_hosting())
            .map(|view| view.broker.clone())
            .collect()
    }

    /// Epoch a broker must currently be at to accept this snapshot.
    ///
    /// A remapping plan replaces the epoch before it; a `CREATE_OR_UPDATE`
    /// snapshot re-asserts its own epoch.
    #[must_use]
    pub fn predecessor_epoch(&self) -> u64 {
        match self.kind {
            SnapshotKind::Remapping => self.epoch.saturating_sub(1),
            SnapshotKind::CreateOrUpdate => self.epoch,
        }
    }
}
