//! The routing-table seam.
//!
//! Route computation belongs to the link-state daemon, not to us. This
//! module defines the boundary the rest of Hydra consumes: a fresh read
//! of the converged host routes, and add/remove change notifications.
//! [`StaticRib`] is the in-memory implementation used by tests and
//! single-host demos; a deployment plugs the real daemon in behind the
//! same trait.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use crate::error::RibError;

/// One host-route change delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteChange {
    /// Destination address of the route.
    pub addr: Ipv6Addr,
    /// Prefix length; host routes carry 128.
    pub prefix_len: u8,
}

impl RouteChange {
    /// Whether this is a maximal-length (host) route.
    pub fn is_host_route(&self) -> bool {
        self.prefix_len == 128
    }
}

/// Callback invoked on a route change.
///
/// Callbacks run on the feed's own notification context, concurrently
/// with table reads — they must not block.
pub type RouteCallback = Arc<dyn Fn(RouteChange) + Send + Sync>;

/// Handle identifying one subscription, for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Read access to the locally converged routing table.
pub trait RouteStore: Send + Sync {
    /// A fresh read of all host routes. Never cached by implementations;
    /// the caller decides what staleness it can tolerate.
    fn host_routes(&self) -> Result<Vec<RouteChange>, RibError>;

    /// Register callbacks for every host-route add/remove.
    fn subscribe(&self, on_add: RouteCallback, on_remove: RouteCallback) -> SubscriptionId;

    /// Remove a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

struct Subscriber {
    id: SubscriptionId,
    on_add: RouteCallback,
    on_remove: RouteCallback,
}

/// In-memory route store.
///
/// Mutations fire subscriber callbacks synchronously on the mutating
/// thread, which mirrors how the real feed invokes them from its own
/// notification context.
#[derive(Default)]
pub struct StaticRib {
    routes: Mutex<BTreeSet<Ipv6Addr>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: Mutex<u64>,
}

impl StaticRib {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a host route and notify subscribers of the add.
    pub fn add_route(&self, addr: Ipv6Addr) {
        let added = self.routes.lock().unwrap().insert(addr);
        if !added {
            return;
        }
        let change = RouteChange {
            addr,
            prefix_len: 128,
        };
        for sub in self.subscribers.lock().unwrap().iter() {
            (sub.on_add)(change);
        }
    }

    /// Withdraw a host route and notify subscribers of the remove.
    pub fn remove_route(&self, addr: Ipv6Addr) {
        let removed = self.routes.lock().unwrap().remove(&addr);
        if !removed {
            return;
        }
        let change = RouteChange {
            addr,
            prefix_len: 128,
        };
        for sub in self.subscribers.lock().unwrap().iter() {
            (sub.on_remove)(change);
        }
    }
}

impl RouteStore for StaticRib {
    fn host_routes(&self) -> Result<Vec<RouteChange>, RibError> {
        Ok(self
            .routes
            .lock()
            .unwrap()
            .iter()
            .map(|&addr| RouteChange {
                addr,
                prefix_len: 128,
            })
            .collect())
    }

    fn subscribe(&self, on_add: RouteCallback, on_remove: RouteCallback) -> SubscriptionId {
        let mut next = self.next_id.lock().unwrap();
        let id = SubscriptionId(*next);
        *next += 1;

        self.subscribers.lock().unwrap().push(Subscriber {
            id,
            on_add,
            on_remove,
        });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }
}
