//! The replica node: receive loop, voting rounds, shutdown ordering.

use std::net::{Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hydra_addr::{AddressSchema, ReplicaIdentity, RoleDescriptor, RolePrefix};
use hydra_directory::{DirectoryClient, DirectoryError, RouteStore};
use hydra_quorum::{vote_checksum, Ballot, VoteError, VoteRound};
use hydra_redundancy::{stop_fanout, EndpointResolver, RedundancyController};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Notify;

use crate::config::NodeConfig;

/// Fatal node failures, each mapped to a process exit code.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Identity or prefix could not be encoded under the schema
    #[error(transparent)]
    Codec(#[from] hydra_addr::CodecError),

    /// Startup registration failed (timeout, rejection, transport)
    #[error("registration failed: {0}")]
    Registration(DirectoryError),

    /// The input endpoint could not be bound
    #[error("failed to bind input socket: {0}")]
    Bind(std::io::Error),
}

impl NodeError {
    /// Exit code contract: 1 for usage/registration-class failures,
    /// 2 for bind failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::Bind(_) => 2,
            _ => 1,
        }
    }
}

/// Receives each round's reconciled winner.
pub trait ResultSink: Send + Sync {
    /// Called once per decided round.
    fn deliver(&self, winner: &[u8], support: usize, dissent: usize);
}

/// Default sink: log and move on.
pub struct LogSink;

impl ResultSink for LogSink {
    fn deliver(&self, winner: &[u8], support: usize, dissent: usize) {
        tracing::info!(
            bytes = winner.len(),
            support,
            dissent,
            "round decided"
        );
    }
}

/// One replica process: identity, directory presence, redundancy
/// control, and the input/vote receive loop.
pub struct ReplicaNode {
    config: NodeConfig,
    identity: ReplicaIdentity,
    client: Arc<DirectoryClient>,
    controller: Arc<RedundancyController>,
    input_prefix: RolePrefix,
    sink: Arc<dyn ResultSink>,
    shutdown: Notify,
    shutting_down: AtomicBool,
}

impl ReplicaNode {
    /// Assemble a node. Nothing touches the network yet except the
    /// directory client's socket setup.
    pub async fn new(
        config: NodeConfig,
        host_id: u64,
        schema: Arc<AddressSchema>,
        rib: Arc<dyn RouteStore>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Arc<Self>, NodeError> {
        let identity = ReplicaIdentity {
            role: config.role,
            host_id,
            pid: std::process::id() as u64,
            registered_at: centiseconds_now(),
        };

        let client = Arc::new(
            DirectoryClient::connect(config.directory.clone(), Arc::clone(&schema), rib)
                .await
                .map_err(NodeError::Registration)?,
        );
        let controller =
            RedundancyController::new(config.redundancy.clone(), Arc::clone(&client), identity)?;
        let input_prefix = schema.role_prefix(config.input_role)?;

        Ok(Arc::new(Self {
            config,
            identity,
            client,
            controller,
            input_prefix,
            sink,
            shutdown: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }))
    }

    /// This replica's identity.
    pub fn identity(&self) -> &ReplicaIdentity {
        &self.identity
    }

    /// The directory client, for embedders that need their own queries.
    pub fn client(&self) -> &Arc<DirectoryClient> {
        &self.client
    }

    /// The redundancy controller.
    pub fn controller(&self) -> &Arc<RedundancyController> {
        &self.controller
    }

    /// Begin the shutdown ordering. Re-entry is masked: only the first
    /// request does anything, later ones are logged and dropped.
    pub fn request_shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown already in progress");
            return;
        }
        tracing::info!("shutdown requested");
        self.shutdown.notify_one();
    }

    /// Register, serve, and retire.
    ///
    /// Returns after the shutdown ordering has run: unregister first,
    /// then the endpoint is held open through the settle window, then
    /// released as this function drops the socket.
    pub async fn run(self: &Arc<Self>) -> Result<(), NodeError> {
        self.controller
            .start()
            .await
            .map_err(NodeError::Registration)?;
        let own_addr = self.client.own_address().await;

        let bind = (self.config.redundancy.resolver)(own_addr, self.config.input_port);
        let socket = UdpSocket::bind(bind).await.map_err(NodeError::Bind)?;
        tracing::info!(%own_addr, %bind, "replica serving");

        let mut round: VoteRound<Vec<u8>> = VoteRound::new(self.config.round);
        let mut buf = vec![0u8; 65536];

        loop {
            let deadline = round.deadline();
            tokio::select! {
                _ = self.shutdown.notified() => break,
                _ = self.controller.terminated() => {
                    tracing::info!("controller retired this replica");
                    break;
                }
                _ = round_deadline(deadline) => {
                    let ballots = round.take();
                    self.reconcile(ballots);
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => {
                            let ballot = Ballot::new(origin_of(from), buf[..len].to_vec());
                            if let Some(stale) = round.accept(ballot, Instant::now()) {
                                self.reconcile(stale);
                            }
                        }
                        Err(e) => tracing::warn!("input recv failed: {e}"),
                    }
                }
            }
        }

        self.controller.shutdown().await;
        drop(socket);
        Ok(())
    }

    /// Gate and vote one closed round's ballots.
    fn reconcile(&self, ballots: Vec<Ballot<Vec<u8>>>) {
        if ballots.is_empty() {
            return;
        }
        let expected = self.client.count_by_prefix(&self.input_prefix);

        match vote_checksum(&ballots, expected) {
            Ok(result) => {
                tracing::info!(
                    received = ballots.len(),
                    expected,
                    support = result.support,
                    "vote decided"
                );
                self.sink
                    .deliver(result.payload, result.support, result.dissent);
            }
            Err(VoteError::InsufficientInput { received, expected }) => {
                tracing::info!(received, expected, "not enough inputs for a vote, flushing");
            }
            Err(e) => tracing::error!("vote failed: {e}"),
        }
    }
}

/// Send the stop token to every replica of a role.
///
/// The operator half of the control channel: query the role's prefix,
/// resolve each replica's control endpoint, fan the token out.
pub async fn stop_role(
    client: &DirectoryClient,
    role: RoleDescriptor,
    control_port: u16,
    token: &str,
    resolver: &EndpointResolver,
) -> usize {
    let prefix = match client.schema().role_prefix(role) {
        Ok(prefix) => prefix,
        Err(e) => {
            tracing::warn!("cannot build prefix for role {role}: {e}");
            return 0;
        }
    };
    let targets: Vec<SocketAddr> = client
        .query_by_prefix(&prefix)
        .into_iter()
        .map(|addr| resolver(addr, control_port))
        .collect();
    if targets.is_empty() {
        tracing::info!(%role, "no replicas found to stop");
        return 0;
    }
    stop_fanout(&targets, token).await
}

async fn round_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

fn origin_of(from: SocketAddr) -> Ipv6Addr {
    match from {
        SocketAddr::V6(v6) => *v6.ip(),
        SocketAddr::V4(v4) => v4.ip().to_ipv6_mapped(),
    }
}

fn centiseconds_now() -> u32 {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (since_epoch.as_millis() / 10) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_directory::{wire, DirectoryConfig, StaticRib};
    use hydra_redundancy::RedundancyConfig;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const WORKER: RoleDescriptor = RoleDescriptor::new(7, 1);
    const UPSTREAM: RoleDescriptor = RoleDescriptor::new(6, 1);

    struct RecordingSink {
        delivered: Mutex<Vec<(Vec<u8>, usize, usize)>>,
    }

    impl ResultSink for RecordingSink {
        fn deliver(&self, winner: &[u8], support: usize, dissent: usize) {
            self.delivered
                .lock()
                .unwrap()
                .push((winner.to_vec(), support, dissent));
        }
    }

    async fn spawn_agent() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                if let Ok(msg) = wire::Message::decode(&buf[..len]) {
                    let ack = wire::Message::Ack {
                        request_id: msg.request_id(),
                    };
                    let _ = socket.send_to(&ack.encode(), from).await;
                }
            }
        });
        addr
    }

    async fn free_loopback_port() -> SocketAddr {
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);
        addr
    }

    fn upstream_peer(host_id: u64) -> ReplicaIdentity {
        ReplicaIdentity {
            role: UPSTREAM,
            host_id,
            pid: 1,
            registered_at: 10,
        }
    }

    #[tokio::test]
    async fn gathers_a_round_and_delivers_the_winner() {
        let agent = spawn_agent().await;
        let rib = Arc::new(StaticRib::new());
        let schema = Arc::new(AddressSchema::canonical());

        // Three upstream replicas exist, so expected=3 at vote time.
        for host in 1..=3 {
            rib.add_route(upstream_peer(host).encode(&schema).unwrap());
        }

        let input_endpoint = free_loopback_port().await;
        let endpoints = HashMap::from([(crate::config::INPUT_PORT, input_endpoint)]);
        let resolver: EndpointResolver = Arc::new(move |_addr, port| {
            endpoints
                .get(&port)
                .copied()
                .unwrap_or_else(|| "127.0.0.1:9".parse().unwrap())
        });

        let config = NodeConfig {
            role: WORKER,
            input_role: UPSTREAM,
            directory: DirectoryConfig::default()
                .with_agent(agent)
                .with_ack_timeout(Duration::from_millis(500)),
            redundancy: RedundancyConfig::default()
                .with_settle_window(Duration::from_millis(10))
                .with_resolver(Arc::clone(&resolver)),
            round: hydra_quorum::RoundConfig {
                gather_window: Duration::from_millis(50),
                max_window: Duration::from_secs(1),
            },
            ..NodeConfig::default()
        };

        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
        });
        let node = ReplicaNode::new(
            config,
            1,
            Arc::clone(&schema),
            rib as Arc<dyn RouteStore>,
            Arc::clone(&sink) as Arc<dyn ResultSink>,
        )
        .await
        .unwrap();

        let runner = Arc::clone(&node);
        let run = tokio::spawn(async move { runner.run().await });

        // Let registration and the input bind settle.
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Two of three replicas agree; the third diverges.
        for payload in ["result-a", "result-a", "result-b"] {
            let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            sender
                .send_to(payload.as_bytes(), input_endpoint)
                .await
                .unwrap();
        }

        // The round window is 50ms; wait for the vote to land.
        let mut decided = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !sink.delivered.lock().unwrap().is_empty() {
                decided = true;
                break;
            }
        }
        assert!(decided, "round never decided");
        {
            let delivered = sink.delivered.lock().unwrap();
            assert_eq!(delivered.len(), 1);
            assert_eq!(delivered[0].0, b"result-a".to_vec());
            assert_eq!(delivered[0].1, 2);
            assert_eq!(delivered[0].2, 1);
        }

        node.request_shutdown();
        // Masked re-entry: a second request is a no-op.
        node.request_shutdown();
        run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bind_failure_maps_to_exit_code_two() {
        let agent = spawn_agent().await;
        let schema = Arc::new(AddressSchema::canonical());

        // Route the input bind to an address this host does not own.
        let resolver: EndpointResolver =
            Arc::new(|_addr, _port| "192.0.2.1:50002".parse().unwrap());
        let config = NodeConfig {
            directory: DirectoryConfig::default()
                .with_agent(agent)
                .with_ack_timeout(Duration::from_millis(500)),
            redundancy: RedundancyConfig::default().with_resolver(resolver),
            ..NodeConfig::default()
        };

        let node = ReplicaNode::new(
            config,
            1,
            schema,
            Arc::new(StaticRib::new()) as Arc<dyn RouteStore>,
            Arc::new(LogSink) as Arc<dyn ResultSink>,
        )
        .await
        .unwrap();

        let err = node.run().await.unwrap_err();
        assert!(matches!(err, NodeError::Bind(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn registration_failure_maps_to_exit_code_one() {
        // An agent that never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let agent = silent.local_addr().unwrap();

        let config = NodeConfig {
            directory: DirectoryConfig::default()
                .with_agent(agent)
                .with_ack_timeout(Duration::from_millis(50)),
            ..NodeConfig::default()
        };
        let node = ReplicaNode::new(
            config,
            1,
            Arc::new(AddressSchema::canonical()),
            Arc::new(StaticRib::new()) as Arc<dyn RouteStore>,
            Arc::new(LogSink) as Arc<dyn ResultSink>,
        )
        .await
        .unwrap();

        let err = node.run().await.unwrap_err();
        assert!(matches!(err, NodeError::Registration(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn stop_role_fans_out_to_every_replica() {
        let agent = spawn_agent().await;
        let rib = Arc::new(StaticRib::new());
        let schema = Arc::new(AddressSchema::canonical());

        let worker = ReplicaIdentity {
            role: WORKER,
            host_id: 1,
            pid: 2,
            registered_at: 3,
        };
        rib.add_route(worker.encode(&schema).unwrap());

        let client = DirectoryClient::connect(
            DirectoryConfig::default().with_agent(agent),
            Arc::clone(&schema),
            rib as Arc<dyn RouteStore>,
        )
        .await
        .unwrap();

        let control_endpoint = free_loopback_port().await;
        let listener = UdpSocket::bind(control_endpoint).await.unwrap();
        let resolver: EndpointResolver =
            Arc::new(move |_addr, _port| control_endpoint);

        let sent = stop_role(&client, WORKER, 50100, "hydra-stop", &resolver).await;
        assert_eq!(sent, 1);

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), listener.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], b"hydra-stop");
    }
}
