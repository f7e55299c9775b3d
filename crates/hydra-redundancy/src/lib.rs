//! Hydra Redundancy Controller
//!
//! Every replica of a role runs one of these. Nobody coordinates them,
//! yet the population self-stabilizes: each controller independently
//! derives the desired replica count from fleet size, compares it to the
//! directory's view of reality, and acts only when the deterministic
//! ordering of all peers says it is that controller's turn to act.
//!
//! - **Scale up**: only the leader — the peer with the lexicographically
//!   minimal `(registered_at, host_id, pid)` — requests new starts, on
//!   the best-scored candidate hosts. Every replica computes the same
//!   ordering from the same directory data, so "the minimum acts" needs
//!   no lock service.
//! - **Scale down**: the same ordering ranks every replica; those ranked
//!   at or past the desired count retire themselves, after waiting out a
//!   settle window that lets transient routing noise resolve.
//! - **Recheck**: route add/remove events and post-spawn delays both
//!   funnel into a single coalesced one-shot timer, so only one
//!   evaluation is ever logically in flight.
//!
//! The control channel (a plaintext stop token on a fixed port) is a
//! preserved behavioral contract from the system this one descends from.
//! It is not a security boundary and must never guard anything beyond
//! "stop managing redundancy on this instance".

mod config;
mod control;
mod controller;
mod monitor;
mod policy;
mod scorer;
mod spawn;

pub use config::{EndpointResolver, RedundancyConfig, CONTROL_PORT, MONITOR_PORT, SPAWN_PORT};
pub use control::{stop_fanout, StopListener};
pub use controller::{ControllerState, Evaluation, RedundancyController};
pub use monitor::{parse_report, MonitorReport, ProbeError};
pub use policy::{desired_count, is_leader, retirement_position};
pub use scorer::{CandidateHost, HostScorer};
pub use spawn::{SpawnRequest, SpawnResponder, SpawnResponse, Spawner};
