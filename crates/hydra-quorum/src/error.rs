//! Error types for voting.

use thiserror::Error;

/// Why a round failed to produce a winner.
///
/// `InsufficientInput` and `NoWinner` are deliberately distinct: the
/// first means "not enough replicas reported to even judge", the second
/// means "a quorum reported but no payload earned authority". Callers
/// flush and wait in the first case; the second is a real disagreement
/// worth logging loudly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoteError {
    /// Received candidates do not exceed half the expected total.
    #[error("insufficient input: {received} of {expected} expected replicas reported")]
    InsufficientInput { received: usize, expected: usize },

    /// A quorum of candidates arrived but no group is authoritative.
    #[error("no winner: {received} candidates, none with more than {expected}/2 agreement")]
    NoWinner { received: usize, expected: usize },

    /// More than one checksum group cleared the authority threshold.
    /// Picking one arbitrarily would let a split round corrupt downstream
    /// state, so the round fails instead.
    #[error("inconsistent round: {groups} checksum groups each exceed half of {expected}")]
    InconsistentRound { groups: usize, expected: usize },
}
