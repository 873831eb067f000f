//! Static topic mapping: data model, consistency checks and planning.
//!
//! Both [`checker`] and [`planner`] are pure functions over already-fetched
//! views. Fetching views and applying plans live in
//! [`orchestrator`](crate::orchestrator) and [`apply`](crate::apply).

pub mod checker;
pub mod model;
pub mod planner;

pub use checker::{build_assignments, check, check_history, QueueAssignment};
pub use model::{BrokerTopicView, MappingItem, MappingSnapshot, SnapshotKind, TopicConfig};
pub use planner::{allocate, round_up_to_block, Planner, QueueMove, DEFAULT_BLOCK_SEQ_SIZE};
