//! The directory client.
//!
//! One instance per process. Registration is the only operation that can
//! fail toward the caller: the initial request is acknowledged (or not)
//! within a bounded wait, and from then on a background heartbeat resends
//! the identical request forever — the routing agent treats re-registration
//! as a refresh, and the heartbeat never unregisters on its own.

use std::collections::HashSet;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hydra_addr::{AddressSchema, ReplicaIdentity, RolePrefix};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::DirectoryError;
use crate::rib::{RouteCallback, RouteStore, SubscriptionId};
use crate::wire::{Message, DEFAULT_AGENT_PORT};

/// Configuration for a [`DirectoryClient`].
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Where the local routing agent listens.
    pub agent: SocketAddr,
    /// Bounded wait for the registration acknowledgment.
    pub ack_timeout: Duration,
    /// Interval between identical re-registration sends.
    pub heartbeat: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            agent: SocketAddr::from(([127, 0, 0, 1], DEFAULT_AGENT_PORT)),
            ack_timeout: Duration::from_secs(2),
            heartbeat: Duration::from_secs(15),
        }
    }
}

impl DirectoryConfig {
    /// Point the client at a non-default agent endpoint.
    #[must_use]
    pub fn with_agent(mut self, agent: SocketAddr) -> Self {
        self.agent = agent;
        self
    }

    /// Set the registration acknowledgment wait.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the re-registration interval.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval;
        self
    }
}

/// Client for the address directory carried by the routing domain.
pub struct DirectoryClient {
    config: DirectoryConfig,
    schema: Arc<AddressSchema>,
    rib: Arc<dyn RouteStore>,
    socket: Arc<UdpSocket>,
    next_request_id: AtomicU32,
    own_addr_tx: watch::Sender<Option<Ipv6Addr>>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    anchor: Arc<Mutex<Instant>>,
}

impl DirectoryClient {
    /// Open a socket toward the routing agent.
    pub async fn connect(
        config: DirectoryConfig,
        schema: Arc<AddressSchema>,
        rib: Arc<dyn RouteStore>,
    ) -> Result<Self, DirectoryError> {
        let bind: SocketAddr = if config.agent.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(config.agent).await?;

        let (own_addr_tx, _) = watch::channel(None);
        Ok(Self {
            config,
            schema,
            rib,
            socket: Arc::new(socket),
            next_request_id: AtomicU32::new(1),
            own_addr_tx,
            heartbeat_task: Mutex::new(None),
            anchor: Arc::new(Mutex::new(Instant::now())),
        })
    }

    /// The schema addresses are encoded under.
    pub fn schema(&self) -> &AddressSchema {
        &self.schema
    }

    /// Register an identity and wait (bounded) for the agent to confirm.
    ///
    /// On success the resolved address becomes available through
    /// [`own_address`](Self::own_address) and the heartbeat loop starts.
    /// On failure nothing is retried here — callers treat a startup
    /// registration failure as fatal.
    pub async fn register(
        &self,
        identity: &ReplicaIdentity,
    ) -> Result<Ipv6Addr, DirectoryError> {
        let addr = identity.encode(&self.schema)?;
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = Message::Register { request_id, addr }.encode();

        self.socket.send(&request).await?;
        self.touch_anchor();
        self.await_ack(request_id).await?;

        tracing::info!(%addr, "registered with routing agent");
        self.own_addr_tx.send_replace(Some(addr));
        self.start_heartbeat(request);
        Ok(addr)
    }

    /// Withdraw an identity. Fire-and-forget: no acknowledgment is
    /// awaited and failures are only logged.
    pub async fn unregister(&self, identity: &ReplicaIdentity) {
        let handle = self.heartbeat_task.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }

        let addr = match identity.encode(&self.schema) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!("cannot encode identity for unregister: {e}");
                return;
            }
        };
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let request = Message::Unregister { request_id, addr }.encode();
        if let Err(e) = self.socket.send(&request).await {
            tracing::warn!(%addr, "unregister send failed: {e}");
        } else {
            tracing::info!(%addr, "unregistered from routing agent");
        }
    }

    /// A fresh read of all registered addresses under a prefix.
    ///
    /// Only maximal-length (host) routes count — shorter aggregates are
    /// routing artifacts, not replicas. Failures collapse to an empty
    /// set: "no peers yet" is a normal bootstrap state and callers must
    /// treat it as such.
    pub fn query_by_prefix(&self, prefix: &RolePrefix) -> HashSet<Ipv6Addr> {
        match self.rib.host_routes() {
            Ok(routes) => routes
                .into_iter()
                .filter(|route| route.is_host_route() && prefix.matches(route.addr))
                .map(|route| route.addr)
                .collect(),
            Err(e) => {
                tracing::debug!("routing table read failed, treating as empty: {e}");
                HashSet::new()
            }
        }
    }

    /// Number of registered addresses under a prefix.
    pub fn count_by_prefix(&self, prefix: &RolePrefix) -> usize {
        self.query_by_prefix(prefix).len()
    }

    /// Decoded identities under a prefix, sorted by their deterministic
    /// rank. Addresses that fail to decode are skipped — a malformed
    /// peer must not wedge everyone else's view.
    pub fn peers_by_prefix(&self, prefix: &RolePrefix) -> Vec<ReplicaIdentity> {
        let mut peers: Vec<ReplicaIdentity> = self
            .query_by_prefix(prefix)
            .into_iter()
            .filter_map(|addr| ReplicaIdentity::from_address(&self.schema, addr).ok())
            .collect();
        peers.sort_by_key(ReplicaIdentity::rank);
        peers
    }

    /// Register callbacks for host-route adds/removes. Callbacks run on
    /// the feed's notification context and must not block.
    pub fn subscribe_rib_changes(
        &self,
        on_add: RouteCallback,
        on_remove: RouteCallback,
    ) -> SubscriptionId {
        self.rib.subscribe(on_add, on_remove)
    }

    /// Drop a change subscription.
    pub fn unsubscribe_rib_changes(&self, id: SubscriptionId) {
        self.rib.unsubscribe(id);
    }

    /// The process's own registered address, waiting until registration
    /// has completed. Callers must tolerate the wait instead of assuming
    /// the address is already available.
    pub async fn own_address(&self) -> Ipv6Addr {
        let mut rx = self.own_addr_tx.subscribe();
        let guard = rx
            .wait_for(Option::is_some)
            .await
            .expect("sender lives in self");
        let addr = *guard;
        addr.expect("predicate guarantees Some")
    }

    /// The own address if registration has already completed.
    pub fn try_own_address(&self) -> Option<Ipv6Addr> {
        *self.own_addr_tx.borrow()
    }

    /// The instant of the most recent routing-convergence-sensitive
    /// action (initial registration or heartbeat send). Settle windows
    /// measure from here.
    pub fn convergence_anchor(&self) -> Instant {
        *self.anchor.lock().unwrap()
    }

    async fn await_ack(&self, request_id: u32) -> Result<(), DirectoryError> {
        let deadline = Instant::now() + self.config.ack_timeout;
        let mut buf = [0u8; 256];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DirectoryError::AckTimeout(self.config.ack_timeout));
            }

            let received = tokio::time::timeout(remaining, self.socket.recv(&mut buf)).await;
            let len = match received {
                Err(_) => return Err(DirectoryError::AckTimeout(self.config.ack_timeout)),
                Ok(result) => result?,
            };

            match Message::decode(&buf[..len]) {
                Ok(Message::Ack { request_id: id }) if id == request_id => return Ok(()),
                Ok(Message::Nack { request_id: id }) if id == request_id => {
                    return Err(DirectoryError::Rejected)
                }
                // Stale id or unrelated traffic: keep waiting out the deadline.
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("undecodable agent datagram: {e}");
                    continue;
                }
            }
        }
    }

    fn start_heartbeat(&self, request: Vec<u8>) {
        let socket = Arc::clone(&self.socket);
        let anchor = Arc::clone(&self.anchor);
        let interval = self.config.heartbeat;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                match socket.send(&request).await {
                    Ok(_) => {
                        *anchor.lock().unwrap() = Instant::now();
                        tracing::trace!("re-registration sent");
                    }
                    // Non-fatal: the next tick tries again.
                    Err(e) => tracing::warn!("re-registration send failed: {e}"),
                }
            }
        });

        let previous = self.heartbeat_task.lock().unwrap().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn touch_anchor(&self) {
        *self.anchor.lock().unwrap() = Instant::now();
    }
}

impl Drop for DirectoryClient {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
