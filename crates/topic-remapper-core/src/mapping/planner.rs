//! Remapping planner.
//!
//! Given a consistent snapshot at epoch `E` and a target broker set, computes
//! the snapshot at epoch `E+1` that moves logical queues onto the targets.
//!
//! # Balancing
//!
//! With `n` logical queues and `k` targets every target gets a quota of
//! `n / k`. The `n % k` extra slots go to the targets that currently lead the
//! most queues, ties broken by broker name, which keeps the number of moves
//! low. Queues are then visited in ascending id: a queue stays where it is
//! while its leader has quota left, otherwise it waits. Waiting queues are
//! handed out to targets in broker name order.
//!
//! A broker therefore either gives queues away or receives them, never both,
//! and planning the same input twice yields the same output.
//!
//! `map_out` is the hosting set minus the targets and `map_in` the targets
//! minus the hosting set. A target that keeps leading queues while handing
//! some to a newcomer is in neither; [`allocate`] lists every single move.
//!
//! # Sealing
//!
//! The tail of a moved queue is sealed at the giving broker's last known
//! write offset for that physical queue. The new tail starts at physical
//! offset 0 on a fresh physical queue of the receiving broker; its logical
//! offset is the sealed logical end rounded up to the next block boundary.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{ConsistencyError, PlanError, PlanResult};

use super::checker::{self, QueueAssignment};
use super::model::{BrokerTopicView, MappingItem, MappingSnapshot, SnapshotKind};

/// Default block size for rounding logical offsets of new tails.
pub const DEFAULT_BLOCK_SEQ_SIZE: i64 = 10_000;

/// A logical queue changing its leader broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMove {
    pub queue: u32,
    pub from: String,
    pub to: String,
}

/// Computes remapping plans.
#[derive(Debug, Clone)]
pub struct Planner {
    block_seq_size: i64,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SEQ_SIZE)
    }
}

impl Planner {
    /// Create a planner rounding new logical offsets to `block_seq_size`.
    ///
    /// The block size should already be validated via
    /// [`RemapConfig::validate`](crate::config::RemapConfig::validate).
    #[must_use]
    pub fn new(block_seq_size: i64) -> Self {
        Self {
            block_seq_size: block_seq_size.max(1),
        }
    }

    /// Reject requests that cannot produce a plan, without planning.
    ///
    /// # Errors
    ///
    /// [`PlanError::EmptyTarget`] for an empty target set,
    /// [`PlanError::NoOp`] when the targets already equal the hosting set or
    /// the balanced assignment would move no queue, and
    /// [`PlanError::Inconsistent`] when the leaders cannot be determined.
    pub fn check_request(snapshot: &MappingSnapshot, targets: &BTreeSet<String>) -> PlanResult<()> {
        if targets.is_empty() {
            return Err(PlanError::EmptyTarget);
        }
        let assignments = checker::build_assignments(&snapshot.brokers)?;
        if leaders(&assignments) == *targets || allocate(&assignments, targets).is_empty() {
            return Err(PlanError::NoOp {
                topic: snapshot.topic.clone(),
            });
        }
        Ok(())
    }

    /// Compute the snapshot that moves `topic` onto `targets`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::EmptyTarget`], [`PlanError::NoOp`] when nothing
    /// would move, [`PlanError::MissingWriteOffset`] when a tail cannot be
    /// sealed, or [`PlanError::Inconsistent`] when the input snapshot (or,
    /// defensively, the result) fails the consistency check.
    pub fn plan(
        &self,
        topic: &str,
        snapshot: &MappingSnapshot,
        targets: &BTreeSet<String>,
    ) -> PlanResult<MappingSnapshot> {
        if targets.is_empty() {
            return Err(PlanError::EmptyTarget);
        }

        let (epoch, total) = checker::check(topic, &snapshot.brokers)?;
        let assignments = checker::build_assignments(&snapshot.brokers)?;

        let hosting = leaders(&assignments);
        let moves = allocate(&assignments, targets);
        if hosting == *targets || moves.is_empty() {
            return Err(PlanError::NoOp {
                topic: topic.to_string(),
            });
        }

        let new_epoch = epoch.checked_add(1).ok_or_else(|| PlanError::EpochOverflow {
            topic: topic.to_string(),
            epoch,
        })?;
        let mut brokers = snapshot.brokers.clone();

        for mv in &moves {
            let assignment = &assignments[&mv.queue];
            let history = self.relocate(topic, &mut brokers, assignment, mv, new_epoch, total)?;

            for broker in [&mv.from, &mv.to] {
                if let Some(view) = brokers.get_mut(broker) {
                    view.hosted_queues.insert(mv.queue, history.clone());
                }
            }
        }

        for view in brokers.values_mut() {
            view.epoch = new_epoch;
            view.total_queues = total;
        }

        let plan = MappingSnapshot {
            topic: topic.to_string(),
            kind: SnapshotKind::Remapping,
            epoch: new_epoch,
            brokers,
            map_in: targets.difference(&hosting).cloned().collect(),
            map_out: hosting.difference(targets).cloned().collect(),
        };
        checker::check(topic, &plan.brokers)?;
        Ok(plan)
    }

    /// Seal the moved queue's tail and append its new tail on `mv.to`.
    ///
    /// Allocates the physical queue on the receiving broker and returns the
    /// queue's new history.
    fn relocate(
        &self,
        topic: &str,
        brokers: &mut BTreeMap<String, BrokerTopicView>,
        assignment: &QueueAssignment,
        mv: &QueueMove,
        new_epoch: u64,
        total: u32,
    ) -> PlanResult<Vec<MappingItem>> {
        let Some(tail) = assignment.items.last() else {
            return Err(ConsistencyError::EmptyHistory {
                broker: mv.from.clone(),
                queue: mv.queue,
            }
            .into());
        };

        let end = brokers
            .get(&mv.from)
            .and_then(|view| view.max_offsets.get(&tail.queue_id))
            .copied()
            .ok_or_else(|| PlanError::MissingWriteOffset {
                broker: mv.from.clone(),
                queue: mv.queue,
                queue_id: tail.queue_id,
            })?;
        if end < tail.start_offset {
            return Err(ConsistencyError::InvalidHistory {
                broker: mv.from.clone(),
                queue: mv.queue,
                reason: format!(
                    "write offset {end} is below the tail's start offset {}",
                    tail.start_offset
                ),
            }
            .into());
        }

        let sealed = tail.sealed_at(end);
        let overflow = || ConsistencyError::InvalidHistory {
            broker: mv.from.clone(),
            queue: mv.queue,
            reason: format!("logical offset overflows when sealing at {end}"),
        };
        let logic_end = sealed.logic_end().ok_or_else(overflow)?;
        let logic_start = round_up_to_block(logic_end, self.block_seq_size).ok_or_else(overflow)?;

        let receiver = brokers
            .entry(mv.to.clone())
            .or_insert_with(|| BrokerTopicView::new(mv.to.clone(), topic, new_epoch, total));
        let queue_id = receiver
            .config
            .read_queue_nums
            .max(receiver.config.write_queue_nums);
        receiver.config.read_queue_nums = queue_id + 1;
        receiver.config.write_queue_nums = queue_id + 1;

        let mut history = assignment.items.clone();
        if let Some(last) = history.last_mut() {
            *last = sealed;
        }
        history.push(MappingItem::active(
            new_epoch,
            mv.to.clone(),
            queue_id,
            logic_start,
            0,
        ));
        Ok(history)
    }
}

fn leaders(assignments: &BTreeMap<u32, QueueAssignment>) -> BTreeSet<String> {
    assignments.values().map(|a| a.leader.clone()).collect()
}

/// Decide which logical queues move where.
///
/// Returns moves ordered by logical queue id; empty when the current
/// assignment already fits the target quotas.
#[must_use]
pub fn allocate(assignments: &BTreeMap<u32, QueueAssignment>, targets: &BTreeSet<String>) -> Vec<QueueMove> {
    if targets.is_empty() {
        return Vec::new();
    }

    let mut led: BTreeMap<&str, usize> = targets.iter().map(|b| (b.as_str(), 0)).collect();
    for assignment in assignments.values() {
        if let Some(count) = led.get_mut(assignment.leader.as_str()) {
            *count += 1;
        }
    }

    let mut order: Vec<&str> = led.keys().copied().collect();
    order.sort_by(|a, b| led[b].cmp(&led[a]).then_with(|| a.cmp(b)));

    let base = assignments.len() / targets.len();
    let extra = assignments.len() % targets.len();
    let mut quota: BTreeMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(rank, broker)| (*broker, base + usize::from(rank < extra)))
        .collect();

    let mut waiting: VecDeque<(u32, &str)> = VecDeque::new();
    for (queue, assignment) in assignments {
        match quota.get_mut(assignment.leader.as_str()) {
            Some(remaining) if *remaining > 0 => *remaining -= 1,
            _ => waiting.push_back((*queue, assignment.leader.as_str())),
        }
    }

    let mut moves = Vec::with_capacity(waiting.len());
    for (broker, remaining) in &mut quota {
        while *remaining > 0 {
            let Some((queue, from)) = waiting.pop_front() else {
                break;
            };
            moves.push(QueueMove {
                queue,
                from: from.to_string(),
                to: (*broker).to_string(),
            });
            *remaining -= 1;
        }
    }

    moves.sort_by_key(|mv| mv.queue);
    moves
}

/// Round a logical offset up past the next block boundary.
///
/// Always returns a value strictly greater than `offset`; offsets in the
/// upper half of a block skip one more block so the gap is at least half a
/// block. `None` if the result does not fit in an `i64`.
#[must_use]
pub fn round_up_to_block(offset: i64, block_seq_size: i64) -> Option<i64> {
    let block = block_seq_size.max(1);
    let num = offset / block;
    let left = offset % block;
    let skip = if left < block / 2 { 1 } else { 2 };
    num.checked_add(skip)?.checked_mul(block)
}
