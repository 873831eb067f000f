//! Consistency checks over per-broker topic views.
//!
//! Every check here is pure: it works on views that were already fetched and
//! never talks to a broker. A snapshot is only planned from, or applied, once
//! [`check`] accepts it.

use std::collections::{BTreeMap, HashMap};

use crate::error::{CheckResult, ConsistencyError};

use super::model::{BrokerTopicView, MappingItem};

/// A logical queue together with the broker holding its active tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueAssignment {
    pub queue: u32,
    pub leader: String,
    pub items: Vec<MappingItem>,
}

/// Validate a topic's views and return `(epoch, logical_queue_count)`.
///
/// # Errors
///
/// Returns an error if the map is empty, if views disagree on epoch or
/// logical queue count, if any item history breaks the timeline invariant,
/// or if the led queues do not form a complete, non-overlapping assignment.
pub fn check(topic: &str, views: &BTreeMap<String, BrokerTopicView>) -> CheckResult<(u64, u32)> {
    let (epoch, total) = check_epoch_and_count(topic, views)?;
    let assignments = build_assignments(views)?;
    check_coverage(&assignments, total)?;
    check_physical_reuse(&assignments)?;
    for view in views.values() {
        check_physical_capacity(view)?;
    }
    Ok((epoch, total))
}

/// Check names, topic, epoch and logical queue count agree across views.
///
/// # Errors
///
/// Returns the first disagreement found, visiting brokers in name order.
pub fn check_epoch_and_count(
    topic: &str,
    views: &BTreeMap<String, BrokerTopicView>,
) -> CheckResult<(u64, u32)> {
    let mut expected: Option<(u64, u32)> = None;

    for (key, view) in views {
        if key != &view.broker {
            return Err(ConsistencyError::BrokerNameMismatch {
                key: key.clone(),
                reported: view.broker.clone(),
            });
        }
        if view.topic() != topic {
            return Err(ConsistencyError::TopicMismatch {
                broker: key.clone(),
                expected: topic.to_string(),
                found: view.topic().to_string(),
            });
        }

        match expected {
            None => expected = Some((view.epoch, view.total_queues)),
            Some((epoch, _)) if epoch != view.epoch => {
                return Err(ConsistencyError::EpochMismatch {
                    broker: key.clone(),
                    expected: epoch,
                    found: view.epoch,
                });
            }
            Some((_, total)) if total != view.total_queues => {
                return Err(ConsistencyError::QueueCountMismatch {
                    broker: key.clone(),
                    expected: total,
                    found: view.total_queues,
                });
            }
            Some(_) => {}
        }
    }

    expected.ok_or_else(|| ConsistencyError::EmptyBrokerSet {
        topic: topic.to_string(),
    })
}

/// Validate one logical queue's item sequence.
///
/// Items must be ordered by non-decreasing epoch and strictly increasing
/// logical offset, every item but the tail must be sealed, and consecutive
/// logical ranges must not overlap.
///
/// # Errors
///
/// Returns [`ConsistencyError::EmptyHistory`] or
/// [`ConsistencyError::InvalidHistory`].
pub fn check_history(broker: &str, queue: u32, items: &[MappingItem]) -> CheckResult<()> {
    let invalid = |reason: String| ConsistencyError::InvalidHistory {
        broker: broker.to_string(),
        queue,
        reason,
    };

    if items.is_empty() {
        return Err(ConsistencyError::EmptyHistory {
            broker: broker.to_string(),
            queue,
        });
    }

    let last = items.len() - 1;
    for (idx, item) in items.iter().enumerate() {
        if item.start_offset < 0 || item.logic_offset < 0 {
            return Err(invalid(format!("item {idx} has a negative offset")));
        }
        if let Some(end) = item.end_offset {
            if end < item.start_offset {
                return Err(invalid(format!(
                    "item {idx} ends at {end} before it starts at {}",
                    item.start_offset
                )));
            }
            if item.logic_end().is_none() {
                return Err(invalid(format!("item {idx} has a logical range past the offset limit")));
            }
        } else if idx != last {
            return Err(invalid(format!("item {idx} is unbounded but not the tail")));
        }
    }

    for (idx, pair) in items.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.epoch < prev.epoch {
            return Err(invalid(format!(
                "epoch goes backwards at item {}: {} < {}",
                idx + 1,
                next.epoch,
                prev.epoch
            )));
        }
        if next.logic_offset <= prev.logic_offset {
            return Err(invalid(format!(
                "logic offset does not increase at item {}: {} <= {}",
                idx + 1,
                next.logic_offset,
                prev.logic_offset
            )));
        }
        // prev is sealed: checked above
        if let Some(prev_end) = prev.logic_end() {
            if next.logic_offset < prev_end {
                return Err(invalid(format!(
                    "item {} starts at logic offset {} inside the previous range ending at {prev_end}",
                    idx + 1,
                    next.logic_offset
                )));
            }
        }
    }

    Ok(())
}

/// Collect the leader and history of every logical queue.
///
/// Every hosted history is validated; only a broker holding the tail item of
/// a queue is recorded as its leader. Historical copies on other brokers are
/// checked but otherwise ignored.
///
/// # Errors
///
/// Returns an error if any history is invalid or two brokers lead one queue.
pub fn build_assignments(
    views: &BTreeMap<String, BrokerTopicView>,
) -> CheckResult<BTreeMap<u32, QueueAssignment>> {
    let mut assignments: BTreeMap<u32, QueueAssignment> = BTreeMap::new();

    for view in views.values() {
        for (queue, items) in &view.hosted_queues {
            check_history(&view.broker, *queue, items)?;
        }

        for (queue, items) in view.leader_queues() {
            if let Some(existing) = assignments.get(&queue) {
                return Err(ConsistencyError::DuplicateLeader {
                    queue,
                    first: existing.leader.clone(),
                    second: view.broker.clone(),
                });
            }
            assignments.insert(
                queue,
                QueueAssignment {
                    queue,
                    leader: view.broker.clone(),
                    items: items.clone(),
                },
            );
        }
    }

    Ok(assignments)
}

fn check_coverage(assignments: &BTreeMap<u32, QueueAssignment>, total: u32) -> CheckResult<()> {
    if let Some((&queue, _)) = assignments.range(total..).next() {
        return Err(ConsistencyError::QueueOutOfRange { queue, total });
    }
    for queue in 0..total {
        if !assignments.contains_key(&queue) {
            return Err(ConsistencyError::MissingQueue { queue, total });
        }
    }
    Ok(())
}

fn check_physical_reuse(assignments: &BTreeMap<u32, QueueAssignment>) -> CheckResult<()> {
    let mut owners: HashMap<(&str, u32), u32> = HashMap::new();

    for assignment in assignments.values() {
        for item in &assignment.items {
            let key = (item.broker.as_str(), item.queue_id);
            match owners.get(&key) {
                Some(&other) if other != assignment.queue => {
                    return Err(ConsistencyError::PhysicalQueueReused {
                        broker: item.broker.clone(),
                        queue_id: item.queue_id,
                        first: other,
                        second: assignment.queue,
                    });
                }
                Some(_) => {}
                None => {
                    owners.insert(key, assignment.queue);
                }
            }
        }
    }

    Ok(())
}

fn check_physical_capacity(view: &BrokerTopicView) -> CheckResult<()> {
    let (read, write) = (view.config.read_queue_nums, view.config.write_queue_nums);
    let own_items = view
        .hosted_queues
        .values()
        .flatten()
        .filter(|item| item.broker == view.broker);

    for item in own_items {
        if item.queue_id >= read || item.queue_id >= write {
            return Err(ConsistencyError::PhysicalQueueOutOfRange {
                broker: view.broker.clone(),
                queue_id: item.queue_id,
                read,
                write,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "orders";

    fn view(broker: &str, epoch: u64, total: u32, queues: Vec<(u32, Vec<MappingItem>)>) -> BrokerTopicView {
        let mut view = BrokerTopicView::new(broker, TOPIC, epoch, total);
        let physical = queues
            .iter()
            .flat_map(|(_, items)| items.iter())
            .filter(|item| item.broker == broker)
            .map(|item| item.queue_id + 1)
            .max()
            .unwrap_or(0);
        view.config.read_queue_nums = physical;
        view.config.write_queue_nums = physical;
        view.hosted_queues = queues.into_iter().collect();
        view
    }

    fn two_broker_views() -> BTreeMap<String, BrokerTopicView> {
        let a = view(
            "a",
            3,
            2,
            vec![(0, vec![MappingItem::active(1, "a", 0, 0, 0)])],
        );
        let b = view(
            "b",
            3,
            2,
            vec![(1, vec![MappingItem::active(1, "b", 0, 0, 0)])],
        );
        [("a".to_string(), a), ("b".to_string(), b)].into_iter().collect()
    }

    #[test]
    fn test_accepts_consistent_views() {
        let views = two_broker_views();
        assert_eq!(check(TOPIC, &views), Ok((3, 2)));
    }

    #[test]
    fn test_rejects_empty_broker_set() {
        let views = BTreeMap::new();
        assert!(matches!(
            check(TOPIC, &views),
            Err(ConsistencyError::EmptyBrokerSet { .. })
        ));
    }

    #[test]
    fn test_rejects_epoch_mismatch() {
        let mut views = two_broker_views();
        views.get_mut("b").unwrap().epoch = 4;
        assert_eq!(
            check(TOPIC, &views),
            Err(ConsistencyError::EpochMismatch {
                broker: "b".to_string(),
                expected: 3,
                found: 4,
            })
        );
    }

    #[test]
    fn test_rejects_queue_count_mismatch() {
        let mut views = two_broker_views();
        views.get_mut("b").unwrap().total_queues = 3;
        assert!(matches!(
            check(TOPIC, &views),
            Err(ConsistencyError::QueueCountMismatch { expected: 2, found: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_misfiled_view() {
        let mut views = two_broker_views();
        let b = views.remove("b").unwrap();
        views.insert("c".to_string(), b);
        assert!(matches!(
            check(TOPIC, &views),
            Err(ConsistencyError::BrokerNameMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_other_topic() {
        let views = two_broker_views();
        assert!(matches!(
            check("payments", &views),
            Err(ConsistencyError::TopicMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_missing_queue() {
        let mut views = two_broker_views();
        views.get_mut("b").unwrap().hosted_queues.clear();
        assert_eq!(
            check(TOPIC, &views),
            Err(ConsistencyError::MissingQueue { queue: 1, total: 2 })
        );
    }

    #[test]
    fn test_rejects_duplicate_leader() {
        let mut views = two_broker_views();
        views
            .get_mut("b")
            .unwrap()
            .hosted_queues
            .insert(0, vec![MappingItem::active(1, "b", 0, 0, 0)]);
        assert!(matches!(
            check(TOPIC, &views),
            Err(ConsistencyError::DuplicateLeader { queue: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_reused_physical_queue() {
        let mut views = two_broker_views();
        {
            let b = views.get_mut("b").unwrap();
            b.total_queues = 3;
            b.hosted_queues.insert(2, vec![MappingItem::active(1, "b", 0, 0, 0)]);
        }
        views.get_mut("a").unwrap().total_queues = 3;
        assert!(matches!(
            check(TOPIC, &views),
            Err(ConsistencyError::PhysicalQueueReused { queue_id: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_queue_beyond_config() {
        let mut views = two_broker_views();
        views.get_mut("a").unwrap().config.write_queue_nums = 0;
        assert!(matches!(
            check(TOPIC, &views),
            Err(ConsistencyError::PhysicalQueueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_history_rejects_unbounded_middle_item() {
        let items = vec![
            MappingItem::active(1, "a", 0, 0, 0),
            MappingItem::active(2, "b", 0, 10_000, 0),
        ];
        assert!(matches!(
            check_history("a", 0, &items),
            Err(ConsistencyError::InvalidHistory { .. })
        ));
    }

    #[test]
    fn test_history_rejects_overlapping_ranges() {
        let items = vec![
            MappingItem::active(1, "a", 0, 0, 0).sealed_at(500),
            MappingItem::active(2, "b", 0, 400, 0),
        ];
        let err = check_history("a", 0, &items).unwrap_err();
        assert!(err.to_string().contains("inside the previous range"));
    }

    #[test]
    fn test_history_rejects_decreasing_epoch() {
        let items = vec![
            MappingItem::active(5, "a", 0, 0, 0).sealed_at(10),
            MappingItem::active(4, "b", 0, 10_000, 0),
        ];
        let err = check_history("a", 0, &items).unwrap_err();
        assert!(err.to_string().contains("epoch goes backwards"));
    }

    #[test]
    fn test_history_rejects_end_before_start() {
        let items = vec![MappingItem::active(1, "a", 0, 0, 50).sealed_at(10)];
        assert!(check_history("a", 0, &items).is_err());
    }

    #[test]
    fn test_history_rejects_logical_range_past_offset_limit() {
        let items = vec![
            MappingItem::active(1, "a", 0, 10, 0).sealed_at(i64::MAX),
            MappingItem::active(2, "a", 1, 20, 0),
        ];
        let err = check_history("a", 0, &items).unwrap_err();
        assert!(matches!(err, ConsistencyError::InvalidHistory { .. }));
        assert!(err.to_string().contains("offset limit"));
    }

    #[test]
    fn test_overflowing_history_fails_check() {
        let mut views = two_broker_views();
        views.get_mut("a").unwrap().hosted_queues.insert(
            0,
            vec![
                MappingItem::active(1, "a", 0, 10, 0).sealed_at(i64::MAX),
                MappingItem::active(2, "a", 1, 20, 0),
            ],
        );
        views.get_mut("a").unwrap().config.write_queue_nums = 2;
        views.get_mut("a").unwrap().config.read_queue_nums = 2;
        assert!(matches!(
            check(TOPIC, &views),
            Err(ConsistencyError::InvalidHistory { .. })
        ));
    }

    #[test]
    fn test_history_accepts_relocated_queue() {
        let items = vec![
            MappingItem::active(1, "a", 0, 0, 0).sealed_at(500),
            MappingItem::active(2, "b", 3, 10_000, 0),
        ];
        assert!(check_history("b", 0, &items).is_ok());
    }

    #[test]
    fn test_historical_copy_is_not_a_leader() {
        let history = vec![
            MappingItem::active(1, "a", 0, 0, 0).sealed_at(500),
            MappingItem::active(2, "b", 0, 10_000, 0),
        ];
        let a = view("a", 2, 1, vec![(0, history.clone())]);
        let b = view("b", 2, 1, vec![(0, history)]);
        let views: BTreeMap<_, _> = [("a".to_string(), a), ("b".to_string(), b)].into_iter().collect();

        let assignments = build_assignments(&views).unwrap();
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[&0].leader, "b");
        assert_eq!(check(TOPIC, &views), Ok((2, 1)));
    }
}
