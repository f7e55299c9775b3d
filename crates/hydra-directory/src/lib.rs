//! Hydra Directory Client
//!
//! The routing table is the directory: a replica "registers" by asking
//! the local routing agent to inject its identity-bearing address as a
//! host route, and "discovers peers" by reading the converged table back
//! and filtering on a role's address prefix. There is no registry
//! service to fail — if the route exists, the replica is reachable, and
//! if the replica dies, routing convergence withdraws it.
//!
//! This crate owns the three pieces of that contract:
//!
//! - the wire protocol spoken to the routing agent ([`wire`]),
//! - the [`DirectoryClient`] — register with bounded ack wait, keep the
//!   registration alive with an identical-request heartbeat, withdraw on
//!   shutdown, and query/count/decode peers by prefix,
//! - the [`RouteStore`] seam behind which the actual link-state daemon
//!   lives, including add/remove change subscriptions.
//!
//! Failure policy: transport failures stop at this boundary. Queries
//! yield empty sets rather than errors ("no peers yet" is a normal
//! bootstrap state), and only the initial registration surfaces a
//! timeout to the caller.

mod client;
mod error;
mod rib;
pub mod wire;

pub use client::{DirectoryClient, DirectoryConfig};
pub use error::{DirectoryError, RibError, WireError};
pub use rib::{RouteCallback, RouteChange, RouteStore, StaticRib, SubscriptionId};
