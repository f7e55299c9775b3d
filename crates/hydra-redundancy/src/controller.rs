//! The per-role control loop.
//!
//! One controller instance runs inside every replica of a managed role.
//! All of them watch the same directory, derive the same desired count,
//! and rank themselves by the same deterministic ordering — so exactly
//! one acts on a shortage (the leader) and exactly the surplus acts on
//! an excess (everyone ranked past the desired count retires itself).
//!
//! Evaluations are serialized through a single coalesced one-shot timer:
//! route events and post-spawn delays arm it, and a pending sooner
//! deadline is never pushed out by a later one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hydra_addr::{CodecError, ReplicaIdentity, RolePrefix};
use hydra_directory::{DirectoryClient, DirectoryError, RouteChange, SubscriptionId};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Notify};

use crate::config::RedundancyConfig;
use crate::control::StopListener;
use crate::policy::{desired_count, is_leader, retirement_position};
use crate::scorer::HostScorer;
use crate::spawn::SpawnRequest;

/// Lifecycle of one controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Started but the first evaluation has not completed.
    Initializing,
    /// Population matches the last evaluation; nothing pending.
    Steady,
    /// A coalesced recheck timer is armed.
    RecheckScheduled,
    /// This replica is retiring (scale-down or shutdown). Absorbing.
    Terminating,
}

/// What one evaluation decided. Returned for observability and tests;
/// the side effects (spawn requests, state transitions) have already
/// happened by the time this is in hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Controller disabled or already terminating; nothing evaluated.
    Disabled,
    /// Population matches the target.
    Balanced { current: usize, desired: usize },
    /// Under-provisioned, but a preceding peer owns the fix.
    Deferred { current: usize, desired: usize },
    /// Under-provisioned and this replica led: start requests issued.
    ScaleUp {
        requested: usize,
        current: usize,
        desired: usize,
    },
    /// Over-provisioned and this replica is surplus: retiring.
    Retiring { position: usize, desired: usize },
    /// Over-provisioned but this replica's rank keeps it alive.
    Surviving {
        position: usize,
        current: usize,
        desired: usize,
    },
}

/// Keeps one role's replica count proportional to fleet size.
pub struct RedundancyController {
    config: RedundancyConfig,
    client: Arc<DirectoryClient>,
    identity: ReplicaIdentity,
    own_prefix: RolePrefix,
    fleet_prefix: RolePrefix,
    spawn_prefix: RolePrefix,
    scorer: HostScorer,
    /// Cached peer count: lazily initialized from a directory query,
    /// then maintained incrementally by route events.
    peer_count: Mutex<Option<usize>>,
    enabled: AtomicBool,
    state_tx: watch::Sender<ControllerState>,
    recheck_at: Mutex<Option<Instant>>,
    recheck_notify: Notify,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl RedundancyController {
    /// Build a controller for one replica of one role.
    pub fn new(
        config: RedundancyConfig,
        client: Arc<DirectoryClient>,
        identity: ReplicaIdentity,
    ) -> Result<Arc<Self>, CodecError> {
        let schema = client.schema();
        let own_prefix = schema.role_prefix(identity.role)?;
        let fleet_prefix = schema.role_prefix(config.fleet_role)?;
        let spawn_prefix = schema.role_prefix(config.spawn_role)?;
        let scorer = HostScorer::new(
            Arc::clone(&config.resolver),
            config.monitor_port,
            config.monitor_timeout,
        );

        let (state_tx, _) = watch::channel(ControllerState::Initializing);
        Ok(Arc::new(Self {
            config,
            client,
            identity,
            own_prefix,
            fleet_prefix,
            spawn_prefix,
            scorer,
            peer_count: Mutex::new(None),
            enabled: AtomicBool::new(true),
            state_tx,
            recheck_at: Mutex::new(None),
            recheck_notify: Notify::new(),
            subscription: Mutex::new(None),
        }))
    }

    /// Register, subscribe to route changes, evaluate once, and hand the
    /// recheck timer to a background task.
    ///
    /// A registration failure here is fatal by contract — the caller
    /// exits rather than running an unadvertised replica.
    pub async fn start(self: &Arc<Self>) -> Result<(), DirectoryError> {
        let own_addr = self.client.register(&self.identity).await?;

        let add_ctrl = Arc::downgrade(self);
        let remove_ctrl = Arc::downgrade(self);
        let subscription = self.client.subscribe_rib_changes(
            Arc::new(move |change: RouteChange| {
                if let Some(ctrl) = add_ctrl.upgrade() {
                    ctrl.on_route_event(change, true);
                }
            }),
            Arc::new(move |change: RouteChange| {
                if let Some(ctrl) = remove_ctrl.upgrade() {
                    ctrl.on_route_event(change, false);
                }
            }),
        );
        *self.subscription.lock().unwrap() = Some(subscription);

        let control_bind = (self.config.resolver)(own_addr, self.config.control_port);
        match StopListener::bind(control_bind, self.config.stop_token.clone()).await {
            Ok(listener) => {
                let ctrl = Arc::downgrade(self);
                tokio::spawn(async move {
                    listener.wait().await;
                    if let Some(ctrl) = ctrl.upgrade() {
                        ctrl.disable();
                    }
                });
            }
            Err(e) => tracing::warn!(%control_bind, "control channel bind failed: {e}"),
        }

        self.check_redundancy().await;
        tokio::spawn(run_timer(Arc::clone(self)));
        Ok(())
    }

    /// The identity this controller manages.
    pub fn identity(&self) -> &ReplicaIdentity {
        &self.identity
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_tx.subscribe()
    }

    /// Resolves when this replica has decided to retire.
    pub async fn terminated(&self) {
        let mut rx = self.state_tx.subscribe();
        let _ = rx.wait_for(|s| *s == ControllerState::Terminating).await;
    }

    /// Permanently stop managing redundancy for this instance. The
    /// replica keeps serving; it just no longer scales anything.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        let subscription = self.subscription.lock().unwrap().take();
        if let Some(subscription) = subscription {
            self.client.unsubscribe_rib_changes(subscription);
        }
        tracing::info!("redundancy control disabled");
    }

    /// Arm the coalesced recheck timer. A pending sooner deadline wins
    /// over any later rearm.
    pub fn arm_recheck(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        {
            let mut pending = self.recheck_at.lock().unwrap();
            match *pending {
                Some(existing) if existing <= deadline => return,
                _ => *pending = Some(deadline),
            }
        }
        self.recheck_notify.notify_one();
        self.state_tx.send_modify(|state| {
            if *state == ControllerState::Steady {
                *state = ControllerState::RecheckScheduled;
            }
        });
    }

    /// Evaluate the population against the target and act on this
    /// replica's share of the outcome.
    pub async fn check_redundancy(&self) -> Evaluation {
        let mut second_chance = true;
        loop {
            if !self.enabled.load(Ordering::SeqCst)
                || self.state() == ControllerState::Terminating
            {
                return Evaluation::Disabled;
            }

            let fleet = self.client.count_by_prefix(&self.fleet_prefix);
            let desired = desired_count(fleet, self.config.percentage, self.config.floor);
            let peers = self.client.peers_by_prefix(&self.own_prefix);
            let current = *self
                .peer_count
                .lock()
                .unwrap()
                .get_or_insert(peers.len());
            tracing::info!(fleet, desired, current, "redundancy check");

            if current < desired {
                if !is_leader(&self.identity, &peers) {
                    self.settle_state();
                    return Evaluation::Deferred { current, desired };
                }
                let requested = self.scale_up(desired - current, &peers).await;
                // New replicas need time to register before recounting.
                self.arm_recheck(self.config.recheck_delay);
                self.settle_state();
                return Evaluation::ScaleUp {
                    requested,
                    current,
                    desired,
                };
            }

            if current > desired {
                let position = retirement_position(&self.identity, &peers);
                if position >= desired {
                    let since = self.client.convergence_anchor().elapsed();
                    if second_chance && since < self.config.settle_window {
                        // Inside the settle window the directory may still
                        // be flapping from our own registration; wait it
                        // out and look again before acting.
                        tokio::time::sleep(self.config.settle_window - since).await;
                        second_chance = false;
                        continue;
                    }
                    tracing::info!(position, desired, "surplus replica, retiring");
                    self.state_tx.send_replace(ControllerState::Terminating);
                    return Evaluation::Retiring { position, desired };
                }
                self.settle_state();
                return Evaluation::Surviving {
                    position,
                    current,
                    desired,
                };
            }

            self.settle_state();
            return Evaluation::Balanced { current, desired };
        }
    }

    /// The voluntary-exit ordering: unregister, then hold the endpoint
    /// open until the settle window has elapsed since the last
    /// convergence-sensitive action. The caller releases the endpoint
    /// after this returns.
    pub async fn shutdown(&self) {
        self.state_tx.send_replace(ControllerState::Terminating);
        self.disable();
        self.client.unregister(&self.identity).await;

        let since = self.client.convergence_anchor().elapsed();
        if since < self.config.settle_window {
            let hold = self.config.settle_window - since;
            tracing::info!(?hold, "holding endpoint through settle window");
            tokio::time::sleep(hold).await;
        }
    }

    fn on_route_event(&self, change: RouteChange, added: bool) {
        if !self.enabled.load(Ordering::SeqCst) || !change.is_host_route() {
            return;
        }

        if self.own_prefix.matches(change.addr) {
            let mut count = self.peer_count.lock().unwrap();
            if let Some(count) = count.as_mut() {
                if added {
                    *count += 1;
                } else {
                    *count = count.saturating_sub(1);
                }
            }
            drop(count);
            self.arm_recheck(self.config.recheck_delay);
        } else if self.fleet_prefix.matches(change.addr) {
            // Fleet size moved, so the target moved.
            self.arm_recheck(self.config.recheck_delay);
        }
    }

    async fn scale_up(&self, num_to_start: usize, role_peers: &[ReplicaIdentity]) -> usize {
        let spawn_peers = self.client.peers_by_prefix(&self.spawn_prefix);
        if spawn_peers.is_empty() {
            tracing::warn!("under-provisioned but no spawn-capable hosts found");
            return 0;
        }
        let monitor_peers = self.client.peers_by_prefix(&self.fleet_prefix);

        let candidates = self
            .scorer
            .rank(
                self.client.schema(),
                self.identity.host_id,
                &spawn_peers,
                &monitor_peers,
                role_peers,
            )
            .await;

        let socket_v4 = UdpSocket::bind(std::net::SocketAddr::from(([0, 0, 0, 0], 0)))
            .await
            .ok();
        let socket_v6 = UdpSocket::bind(std::net::SocketAddr::from((
            std::net::Ipv6Addr::UNSPECIFIED,
            0,
        )))
        .await
        .ok();

        let request = SpawnRequest::start(self.identity.role).encode();
        let mut remaining = num_to_start;
        let mut requested = 0;

        // Walk the ranked list, wrapping around while starts remain. A
        // full pass with no successful send leaves the shortfall to the
        // next recheck.
        while remaining > 0 {
            let mut sent_this_pass = 0;
            for candidate in &candidates {
                if remaining == 0 {
                    break;
                }
                let target = (self.config.resolver)(candidate.spawn_addr, self.config.spawn_port);
                let socket = if target.is_ipv4() {
                    &socket_v4
                } else {
                    &socket_v6
                };
                let Some(socket) = socket else {
                    tracing::warn!(host = candidate.host_id, "no socket for spawn target family");
                    continue;
                };
                match socket.send_to(request.as_bytes(), target).await {
                    Ok(_) => {
                        tracing::info!(host = candidate.host_id, "requested replica start");
                        remaining -= 1;
                        requested += 1;
                        sent_this_pass += 1;
                    }
                    Err(e) => {
                        tracing::warn!(host = candidate.host_id, "spawn request failed: {e}");
                    }
                }
            }
            if sent_this_pass == 0 {
                tracing::warn!(unmet = remaining, "spawn requests unmet until next recheck");
                break;
            }
        }
        requested
    }

    fn settle_state(&self) {
        let pending = self.recheck_at.lock().unwrap().is_some();
        self.state_tx.send_modify(|state| {
            if *state != ControllerState::Terminating {
                *state = if pending {
                    ControllerState::RecheckScheduled
                } else {
                    ControllerState::Steady
                };
            }
        });
    }
}

/// Drives the coalesced recheck timer for one controller.
async fn run_timer(ctrl: Arc<RedundancyController>) {
    loop {
        if ctrl.state() == ControllerState::Terminating {
            return;
        }

        let pending = *ctrl.recheck_at.lock().unwrap();
        match pending {
            None => ctrl.recheck_notify.notified().await,
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    // A rearm notification wakes us to re-read a (only
                    // ever sooner) deadline.
                    tokio::select! {
                        _ = tokio::time::sleep(deadline - now) => {}
                        _ = ctrl.recheck_notify.notified() => {}
                    }
                } else {
                    *ctrl.recheck_at.lock().unwrap() = None;
                    ctrl.check_redundancy().await;
                }
            }
        }
    }
}
