//! Admission planning.
//!
//! Pure function from a snapshot of node records to the set of nodes to
//! admit this pass. Keeping the policy free of I/O lets the reconciler
//! recompute it from scratch every cycle and makes it directly testable.

use std::collections::HashMap;

use rollout_id::{NodeName, PartitionKey};
use rollout_record::{NodeRecord, Phase};

/// Selects which waiting nodes may start draining.
///
/// Per partition, nodes in disruptive phases count against
/// `max_per_partition`; remaining slots go to waiting nodes in FIFO order
/// of `waiting_since`, with node name breaking ties. Errored nodes hold no
/// slot and are never selected.
pub fn plan_admissions(records: &[NodeRecord], max_per_partition: usize) -> Vec<NodeName> {
    let mut in_flight: HashMap<&PartitionKey, usize> = HashMap::new();
    let mut waiting: HashMap<&PartitionKey, Vec<&NodeRecord>> = HashMap::new();

    for record in records {
        if record.phase.is_disruptive() {
            *in_flight.entry(&record.partition).or_default() += 1;
        } else if record.phase == Phase::WaitingForAdmission {
            waiting.entry(&record.partition).or_default().push(record);
        }
    }

    let mut admitted = Vec::new();
    for (partition, mut queue) in waiting {
        let used = in_flight.get(partition).copied().unwrap_or(0);
        let free = max_per_partition.saturating_sub(used);
        if free == 0 {
            continue;
        }

        queue.sort_by(|a, b| {
            // Records without a wait timestamp queue behind everything else.
            match (&a.waiting_since, &b.waiting_since) {
                (Some(x), Some(y)) => x.cmp(y).then_with(|| a.node.cmp(&b.node)),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => a.node.cmp(&b.node),
            }
        });

        admitted.extend(queue.into_iter().take(free).map(|r| r.node.clone()));
    }

    // Deterministic output order across partitions.
    admitted.sort();
    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rollout_id::VersionId;
    use rstest::rstest;

    fn record(name: &str, partition: &str, phase: Phase, waited_at: Option<i64>) -> NodeRecord {
        let node: NodeName = name.parse().unwrap();
        let partition: PartitionKey = partition.parse().unwrap();
        let version: VersionId = "1.0.0".parse().unwrap();
        let mut record = NodeRecord::new(node, partition, version);
        record.phase = phase;
        record.waiting_since = waited_at.map(|s| Utc.timestamp_opt(s, 0).unwrap());
        record
    }

    #[test]
    fn test_fifo_order_within_partition() {
        let records = vec![
            record("worker-b", "default", Phase::WaitingForAdmission, Some(200)),
            record("worker-a", "default", Phase::WaitingForAdmission, Some(100)),
        ];
        let admitted = plan_admissions(&records, 2);
        assert_eq!(
            admitted,
            vec![
                "worker-a".parse::<NodeName>().unwrap(),
                "worker-b".parse::<NodeName>().unwrap()
            ]
        );

        // With one slot, only the longest waiter goes.
        let admitted = plan_admissions(&records, 1);
        assert_eq!(admitted, vec!["worker-a".parse::<NodeName>().unwrap()]);
    }

    #[test]
    fn test_node_name_breaks_timestamp_ties() {
        let records = vec![
            record("worker-b", "default", Phase::WaitingForAdmission, Some(100)),
            record("worker-a", "default", Phase::WaitingForAdmission, Some(100)),
        ];
        let admitted = plan_admissions(&records, 1);
        assert_eq!(admitted, vec!["worker-a".parse::<NodeName>().unwrap()]);
    }

    #[rstest]
    #[case(Phase::Draining)]
    #[case(Phase::Updating)]
    #[case(Phase::Rebooting)]
    #[case(Phase::Verifying)]
    fn test_in_flight_node_consumes_the_slot(#[case] phase: Phase) {
        let records = vec![
            record("worker-a", "default", phase, None),
            record("worker-b", "default", Phase::WaitingForAdmission, Some(100)),
        ];
        assert!(plan_admissions(&records, 1).is_empty());
    }

    #[test]
    fn test_errored_node_holds_no_slot_and_is_never_selected() {
        let records = vec![
            record("worker-a", "default", Phase::Errored, Some(50)),
            record("worker-b", "default", Phase::WaitingForAdmission, Some(100)),
        ];
        let admitted = plan_admissions(&records, 1);
        assert_eq!(admitted, vec!["worker-b".parse::<NodeName>().unwrap()]);
    }

    #[test]
    fn test_partitions_are_independent()  {
        let records = vec![
            record("worker-a", "rack-a", Phase::Updating, None),
            record("worker-b", "rack-a", Phase::WaitingForAdmission, Some(100)),
            record("worker-c", "rack-b", Phase::WaitingForAdmission, Some(200)),
        ];
        let admitted = plan_admissions(&records, 1);
        assert_eq!(admitted, vec!["worker-c".parse::<NodeName>().unwrap()]);
    }

    #[test]
    fn test_idle_and_completed_nodes_are_ignored() {
        let records = vec![
            record("worker-a", "default", Phase::Idle, None),
            record("worker-b", "default", Phase::Completed, None),
            record("worker-c", "default", Phase::WaitingForAdmission, Some(100)),
        ];
        let admitted = plan_admissions(&records, 1);
        assert_eq!(admitted, vec!["worker-c".parse::<NodeName>().unwrap()]);
    }
}
