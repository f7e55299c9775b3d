//! Hydra Replica Node
//!
//! The binary shell around the Hydra core: one interchangeable worker
//! process that registers its identity into the routing domain, keeps
//! its role's population at target through the redundancy controller,
//! gathers redundant inputs from an upstream role into voting rounds,
//! and retires cleanly when told to — by rank, by signal, or by the
//! stop token.
//!
//! Payload semantics are deliberately absent. The node moves opaque
//! byte records and hands each round's reconciled winner to a
//! [`ResultSink`]; what the bytes mean belongs to the application that
//! embeds this crate.

mod config;
mod node;

pub use config::{NodeConfig, INPUT_PORT};
pub use node::{stop_role, LogSink, NodeError, ReplicaNode, ResultSink};
