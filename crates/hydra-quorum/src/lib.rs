//! Hydra Quorum Voter
//!
//! When several replicas redundantly compute the same result, something
//! has to reconcile their outputs into one trusted answer — despite
//! partial corruption, divergent stragglers, or replicas that never
//! reported at all. This crate is that something, reusable by any
//! replicated computation stage.
//!
//! # Two schemes
//!
//! - **Distance voting** ([`vote_distance`]) for payloads expected to be
//!   near-identical but not bit-exact: the candidate with the smallest
//!   summed pairwise distance to everyone else wins.
//! - **Checksum quorum** ([`vote_checksum`]) for payloads expected to be
//!   bit-exact: candidates group by digest, and a group becomes
//!   authoritative once it holds more than half of the round's expected
//!   replica count.
//!
//! # Quorum gating
//!
//! Neither scheme will decide from a minority. A round is eligible only
//! once received candidates exceed half the expected total; short rounds
//! report [`VoteError::InsufficientInput`], which is distinct from "a
//! quorum arrived but no group is authoritative"
//! ([`VoteError::NoWinner`]).
//!
//! # Rounds
//!
//! [`VoteRound`] owns the accumulation window: it opens on the first
//! ballot, shrinks its deadline as time passes, and is drained wholesale
//! when it closes — late ballots start the next round rather than
//! polluting a closed one.

mod ballot;
mod checksum;
mod distance;
mod error;
mod round;

pub use ballot::{Ballot, VoteResult};
pub use checksum::{vote_checksum, Checksum, Checksummed};
pub use distance::{record_distance, vote_distance, PairwiseDistance};
pub use error::VoteError;
pub use round::{RoundConfig, VoteRound};

/// Whether `received` inputs out of `expected` clear the quorum bar.
///
/// "More than half", integer arithmetic: 3 of 5 clears, 2 of 4 does not.
pub const fn meets_quorum(received: usize, expected: usize) -> bool {
    received > expected / 2
}
