//! Pure sizing and ordering decisions.
//!
//! Everything here is a function of directory data that every replica
//! sees identically, which is the whole trick: each controller computes
//! the same answers independently, so no lock or election protocol is
//! needed on top.

use hydra_addr::ReplicaIdentity;

/// Replicas a role should have for a given fleet size:
/// `max(fleet * percentage / 100, floor)`.
pub fn desired_count(fleet_size: usize, percentage: usize, floor: usize) -> usize {
    (fleet_size * percentage / 100).max(floor)
}

/// Whether `own` is the leader among `peers` — i.e. no peer strictly
/// precedes it in `(registered_at, host_id, pid)` order.
///
/// `peers` is the directory view and normally includes `own` itself;
/// either way, only *strictly* smaller ranks disqualify.
pub fn is_leader(own: &ReplicaIdentity, peers: &[ReplicaIdentity]) -> bool {
    !peers.iter().any(|peer| peer.rank() < own.rank())
}

/// Position of `own` in the retirement ordering: the number of peers
/// that strictly precede it. Replicas at position `>= desired` exit.
pub fn retirement_position(own: &ReplicaIdentity, peers: &[ReplicaIdentity]) -> usize {
    peers.iter().filter(|peer| peer.rank() < own.rank()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_addr::RoleDescriptor;

    fn replica(ts: u32, host_id: u64, pid: u64) -> ReplicaIdentity {
        ReplicaIdentity {
            role: RoleDescriptor::new(7, 1),
            host_id,
            pid,
            registered_at: ts,
        }
    }

    #[test]
    fn desired_is_percentage_with_floor() {
        assert_eq!(desired_count(20, 20, 3), 4);
        assert_eq!(desired_count(10, 20, 3), 3); // floor wins
        assert_eq!(desired_count(0, 20, 3), 3);
        assert_eq!(desired_count(100, 20, 3), 20);
    }

    #[test]
    fn desired_is_monotonic_in_fleet_size() {
        let mut prev = 0;
        for fleet in 0..500 {
            let desired = desired_count(fleet, 20, 3);
            assert!(desired >= prev, "shrank at fleet={fleet}");
            prev = desired;
        }
    }

    #[test]
    fn oldest_replica_leads() {
        let peers = vec![replica(100, 1, 10), replica(105, 2, 20)];
        assert!(is_leader(&peers[0], &peers));
        assert!(!is_leader(&peers[1], &peers));
    }

    #[test]
    fn ties_break_on_host_then_pid() {
        let peers = vec![
            replica(100, 1, 11),
            replica(100, 1, 10),
            replica(100, 2, 1),
        ];
        assert!(is_leader(&peers[1], &peers));
        assert!(!is_leader(&peers[0], &peers));
        assert!(!is_leader(&peers[2], &peers));
    }

    #[test]
    fn exactly_one_leader_among_distinct_peers() {
        let peers = vec![
            replica(100, 1, 1),
            replica(100, 1, 2),
            replica(100, 2, 1),
            replica(99, 9, 9),
            replica(101, 0, 0),
        ];
        let leaders = peers.iter().filter(|p| is_leader(p, &peers)).count();
        assert_eq!(leaders, 1);
    }

    #[test]
    fn retirement_selects_exactly_the_surplus() {
        let peers: Vec<_> = (0..6).map(|i| replica(100 + i, i as u64, 1)).collect();
        let desired = 4;

        let retiring: Vec<_> = peers
            .iter()
            .filter(|p| retirement_position(p, &peers) >= desired)
            .collect();
        assert_eq!(retiring.len(), peers.len() - desired);

        // The retiring set is exactly the youngest-ranked tail.
        let mut ranked = peers.clone();
        ranked.sort_by_key(ReplicaIdentity::rank);
        for survivor in &ranked[..desired] {
            assert!(retirement_position(survivor, &peers) < desired);
        }
        for retiree in &ranked[desired..] {
            assert!(retirement_position(retiree, &peers) >= desired);
        }
    }

    #[test]
    fn leader_is_position_zero() {
        let peers = vec![replica(100, 1, 10), replica(105, 2, 20)];
        assert_eq!(retirement_position(&peers[0], &peers), 0);
        assert_eq!(retirement_position(&peers[1], &peers), 1);
    }
}
