//! Error types for the directory layer.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`DirectoryClient`](crate::DirectoryClient).
///
/// Only registration can fail toward the caller. Query paths absorb
/// their failures into empty results by design.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Identity could not be encoded under the active schema
    #[error(transparent)]
    Codec(#[from] hydra_addr::CodecError),

    /// The routing agent did not acknowledge within the bounded wait
    #[error("registration not acknowledged within {0:?}")]
    AckTimeout(Duration),

    /// The routing agent refused the registration
    #[error("registration rejected by the routing agent")]
    Rejected,

    /// Socket setup or send failure while talking to the agent
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in the agent wire protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Datagram shorter than its header or declared payload
    #[error("truncated message: {0} bytes")]
    Truncated(usize),

    /// Header carries a command number we do not speak
    #[error("unknown command {0}")]
    UnknownCommand(u16),

    /// Header carries a protocol version we do not speak
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// Address payload that does not parse
    #[error("malformed address payload")]
    MalformedAddress,
}

/// Errors from the route store seam. Callers inside this crate convert
/// these to empty results; they exist so implementations can be honest.
#[derive(Debug, Error)]
pub enum RibError {
    /// The routing table could not be read
    #[error("routing table unavailable: {0}")]
    Unavailable(String),
}
