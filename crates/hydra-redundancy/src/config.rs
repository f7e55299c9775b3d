//! Controller configuration.

use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hydra_addr::RoleDescriptor;

/// Fixed port where machine monitors answer stat requests.
pub const MONITOR_PORT: u16 = 50000;

/// Fixed port where spawn responders listen for start requests.
pub const SPAWN_PORT: u16 = 50001;

/// Fixed port of the stop-redundancy control channel.
pub const CONTROL_PORT: u16 = 50100;

/// Maps a replica address plus port to a reachable socket address.
///
/// Production uses the identity mapping — the replica address is
/// routable. Tests remap onto loopback endpoints.
pub type EndpointResolver = Arc<dyn Fn(Ipv6Addr, u16) -> SocketAddr + Send + Sync>;

/// Tunables for one managed role.
#[derive(Clone)]
pub struct RedundancyConfig {
    /// Replicas per hundred fleet members.
    pub percentage: usize,
    /// Never run fewer than this many replicas.
    pub floor: usize,
    /// Role whose replica count proxies fleet size (one per machine).
    pub fleet_role: RoleDescriptor,
    /// Role advertising spawn capability on a host.
    pub spawn_role: RoleDescriptor,
    /// Delay before the post-action recheck.
    pub recheck_delay: Duration,
    /// Minimum age/hold around convergence-sensitive actions.
    pub settle_window: Duration,
    /// Bounded wait for one monitor stat response.
    pub monitor_timeout: Duration,
    /// Port monitors answer on.
    pub monitor_port: u16,
    /// Port spawn responders listen on.
    pub spawn_port: u16,
    /// Port of the stop-token listener.
    pub control_port: u16,
    /// Shared plaintext stop token. Insecure by design; a behavioral
    /// contract, not an authentication mechanism.
    pub stop_token: String,
    /// Address-to-endpoint mapping for monitor probes and spawn sends.
    pub resolver: EndpointResolver,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            percentage: 20,
            floor: 3,
            fleet_role: RoleDescriptor::new(1, 1),
            spawn_role: RoleDescriptor::new(2, 1),
            recheck_delay: Duration::from_millis(500),
            settle_window: Duration::from_secs(1),
            monitor_timeout: Duration::from_secs(2),
            monitor_port: MONITOR_PORT,
            spawn_port: SPAWN_PORT,
            control_port: CONTROL_PORT,
            stop_token: "hydra-stop".to_string(),
            resolver: Arc::new(|addr, port| SocketAddr::from((addr, port))),
        }
    }
}

impl RedundancyConfig {
    /// Set the percentage-with-floor sizing policy.
    #[must_use]
    pub fn with_policy(mut self, percentage: usize, floor: usize) -> Self {
        self.percentage = percentage;
        self.floor = floor;
        self
    }

    /// Set the fleet-size signal role.
    #[must_use]
    pub fn with_fleet_role(mut self, role: RoleDescriptor) -> Self {
        self.fleet_role = role;
        self
    }

    /// Set the spawn-capability role.
    #[must_use]
    pub fn with_spawn_role(mut self, role: RoleDescriptor) -> Self {
        self.spawn_role = role;
        self
    }

    /// Set the post-action recheck delay.
    #[must_use]
    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    /// Set the settle window.
    #[must_use]
    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_window = window;
        self
    }

    /// Override how replica addresses resolve to probe/spawn endpoints.
    #[must_use]
    pub fn with_resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolver = resolver;
        self
    }
}

impl std::fmt::Debug for RedundancyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedundancyConfig")
            .field("percentage", &self.percentage)
            .field("floor", &self.floor)
            .field("fleet_role", &self.fleet_role)
            .field("spawn_role", &self.spawn_role)
            .field("recheck_delay", &self.recheck_delay)
            .field("settle_window", &self.settle_window)
            .field("monitor_timeout", &self.monitor_timeout)
            .finish_non_exhaustive()
    }
}
