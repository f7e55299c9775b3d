//! Desirability scoring for placement of new replicas.
//!
//! Lower scores win. The leader's own host scores best (a replica
//! started where the decision was made registers fastest), hosts already
//! running the role are pushed away, and live load from each host's
//! machine monitor breaks the remaining ties. A host whose monitor
//! cannot be reached is penalized, not excluded — when every monitor is
//! flapping, a penalized candidate is still better than none.

use std::net::Ipv6Addr;
use std::time::Duration;

use hydra_addr::{AddressSchema, ReplicaIdentity};

use crate::config::EndpointResolver;
use crate::monitor;

/// Penalty for a candidate that is not the deciding replica's own host.
const FOREIGN_HOST_PENALTY: u64 = 10_000;

/// Penalty for a host already running an instance of the managed role.
const CO_LOCATION_PENALTY: u64 = 1_000;

/// Penalty when the host's monitor is missing, unreachable, or erroring.
const UNREACHABLE_PENALTY: u64 = 200;

/// Penalty per scored key that is missing or unparsable in a response.
const BAD_KEY_PENALTY: u64 = 100;

/// A spawn-capable host, scored for placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHost {
    /// Host the spawn responder runs on.
    pub host_id: u64,
    /// The spawn responder's replica address.
    pub spawn_addr: Ipv6Addr,
    /// Desirability, lower is better.
    pub priority: u64,
}

/// Scores and ranks spawn-capable hosts.
pub struct HostScorer {
    resolver: EndpointResolver,
    monitor_port: u16,
    monitor_timeout: Duration,
}

impl HostScorer {
    /// Create a scorer.
    pub fn new(resolver: EndpointResolver, monitor_port: u16, monitor_timeout: Duration) -> Self {
        Self {
            resolver,
            monitor_port,
            monitor_timeout,
        }
    }

    /// Score every spawn-capable host and sort ascending by priority.
    ///
    /// `role_peers` are the current replicas of the managed role (for the
    /// co-location penalty); `monitor_peers` locate each host's monitor.
    pub async fn rank(
        &self,
        schema: &AddressSchema,
        own_host: u64,
        spawn_peers: &[ReplicaIdentity],
        monitor_peers: &[ReplicaIdentity],
        role_peers: &[ReplicaIdentity],
    ) -> Vec<CandidateHost> {
        let mut candidates = Vec::with_capacity(spawn_peers.len());

        for spawn_peer in spawn_peers {
            let spawn_addr = match spawn_peer.encode(schema) {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::debug!("skipping unencodable spawn peer: {e}");
                    continue;
                }
            };

            let mut priority = base_score(own_host, spawn_peer.host_id, role_peers);
            priority += self
                .load_score(schema, spawn_peer.host_id, monitor_peers)
                .await;

            candidates.push(CandidateHost {
                host_id: spawn_peer.host_id,
                spawn_addr,
                priority,
            });
        }

        candidates.sort_by_key(|c| (c.priority, c.host_id));
        candidates
    }

    async fn load_score(
        &self,
        schema: &AddressSchema,
        host_id: u64,
        monitor_peers: &[ReplicaIdentity],
    ) -> u64 {
        let Some(monitor_peer) = monitor_peers.iter().find(|m| m.host_id == host_id) else {
            return UNREACHABLE_PENALTY;
        };
        let Ok(monitor_addr) = monitor_peer.encode(schema) else {
            return UNREACHABLE_PENALTY;
        };

        let endpoint = (self.resolver)(monitor_addr, self.monitor_port);
        match monitor::probe(endpoint, self.monitor_timeout).await {
            Ok(report) => {
                tracing::debug!(
                    host_id,
                    memory = ?report.memory_pct,
                    cpu = ?report.cpu_pct,
                    "monitor report"
                );
                key_score(report.memory_pct) + key_score(report.cpu_pct)
            }
            Err(e) => {
                tracing::debug!(host_id, "monitor probe failed: {e}");
                UNREACHABLE_PENALTY
            }
        }
    }
}

fn base_score(own_host: u64, candidate_host: u64, role_peers: &[ReplicaIdentity]) -> u64 {
    let mut score = if candidate_host == own_host {
        0
    } else {
        FOREIGN_HOST_PENALTY
    };
    if role_peers.iter().any(|p| p.host_id == candidate_host) {
        score += CO_LOCATION_PENALTY;
    }
    score
}

fn key_score(value: Option<u64>) -> u64 {
    match value {
        Some(pct) => pct,
        None => BAD_KEY_PENALTY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_addr::RoleDescriptor;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::UdpSocket;

    fn replica(role: RoleDescriptor, host_id: u64) -> ReplicaIdentity {
        ReplicaIdentity {
            role,
            host_id,
            pid: 100 + host_id,
            registered_at: 1000,
        }
    }

    fn spawn_role() -> RoleDescriptor {
        RoleDescriptor::new(2, 1)
    }

    fn monitor_role() -> RoleDescriptor {
        RoleDescriptor::new(1, 1)
    }

    fn worker_role() -> RoleDescriptor {
        RoleDescriptor::new(7, 1)
    }

    /// Serve one scripted stat response per request, forever.
    async fn fake_monitor(body: &'static str) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            while let Ok((_, from)) = socket.recv_from(&mut buf).await {
                socket.send_to(body.as_bytes(), from).await.unwrap();
            }
        });
        addr
    }

    fn resolver_from(map: HashMap<u64, SocketAddr>, schema: Arc<AddressSchema>) -> EndpointResolver {
        // Tests route each monitor's fcff address to its loopback fake by
        // decoding the host id back out of the address.
        Arc::new(move |addr, _port| {
            let identity = ReplicaIdentity::from_address(&schema, addr).unwrap();
            map[&identity.host_id]
        })
    }

    #[test]
    fn own_host_beats_foreign_hosts() {
        assert_eq!(base_score(1, 1, &[]), 0);
        assert_eq!(base_score(1, 2, &[]), FOREIGN_HOST_PENALTY);
    }

    #[test]
    fn co_location_adds_on_top() {
        let peers = [replica(worker_role(), 2)];
        assert_eq!(base_score(1, 2, &peers), FOREIGN_HOST_PENALTY + CO_LOCATION_PENALTY);
        assert_eq!(base_score(1, 1, &peers), 0);
    }

    #[tokio::test]
    async fn busy_host_still_beats_unreachable_host() {
        let schema = Arc::new(AddressSchema::canonical());
        // Host 2 has a busy-but-alive monitor; host 3's monitor is gone.
        let busy = fake_monitor("MemoryUsage: 90%\nCPU: 90%\n").await;
        let resolver = resolver_from(HashMap::from([(2, busy)]), Arc::clone(&schema));

        let scorer = HostScorer::new(resolver, 0, Duration::from_millis(200));
        let ranked = scorer
            .rank(
                &schema,
                99, // leader elsewhere: both candidates are foreign
                &[replica(spawn_role(), 2), replica(spawn_role(), 3)],
                &[replica(monitor_role(), 2)],
                &[],
            )
            .await;

        assert_eq!(ranked[0].host_id, 2);
        assert_eq!(ranked[0].priority, FOREIGN_HOST_PENALTY + 180);
        assert_eq!(ranked[1].priority, FOREIGN_HOST_PENALTY + UNREACHABLE_PENALTY);
    }

    #[tokio::test]
    async fn missing_keys_cost_a_fixed_penalty_each() {
        let schema = Arc::new(AddressSchema::canonical());
        let partial = fake_monitor("MemoryUsage: 10%\nLoad: whatever\n").await;
        let resolver = resolver_from(HashMap::from([(2, partial)]), Arc::clone(&schema));

        let scorer = HostScorer::new(resolver, 0, Duration::from_millis(200));
        let ranked = scorer
            .rank(
                &schema,
                99,
                &[replica(spawn_role(), 2)],
                &[replica(monitor_role(), 2)],
                &[],
            )
            .await;

        assert_eq!(ranked[0].priority, FOREIGN_HOST_PENALTY + 10 + BAD_KEY_PENALTY);
    }

    #[tokio::test]
    async fn idle_self_host_ranks_first_overall() {
        let schema = Arc::new(AddressSchema::canonical());
        let idle = fake_monitor("MemoryUsage: 5%\nCPU: 1%\n").await;
        let also_idle = fake_monitor("MemoryUsage: 1%\nCPU: 1%\n").await;
        let resolver = resolver_from(
            HashMap::from([(1, idle), (2, also_idle)]),
            Arc::clone(&schema),
        );

        let scorer = HostScorer::new(resolver, 0, Duration::from_millis(200));
        let ranked = scorer
            .rank(
                &schema,
                1,
                &[replica(spawn_role(), 1), replica(spawn_role(), 2)],
                &[replica(monitor_role(), 1), replica(monitor_role(), 2)],
                &[],
            )
            .await;

        // Host 2 is less loaded, but host 1 is the leader's own.
        assert_eq!(ranked[0].host_id, 1);
    }
}
