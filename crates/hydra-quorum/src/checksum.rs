//! Checksum-quorum voting for bit-exact payloads.
//!
//! When replicas are supposed to produce byte-identical output, comparing
//! digests is enough: candidates group by checksum, and a group holding
//! more than half of the round's expected replica count speaks for the
//! round. Two groups clearing that bar at once means the round itself is
//! inconsistent, and no answer is trusted.

use std::fmt;

use crate::ballot::{Ballot, VoteResult};
use crate::error::VoteError;
use crate::meets_quorum;

/// A payload digest. Equality is the whole interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Digest raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// The full digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}...", &hex::encode(&self.0[..4]))
    }
}

/// Payloads that can digest themselves for grouping.
pub trait Checksummed {
    /// The payload's digest.
    fn checksum(&self) -> Checksum;
}

impl<T: AsRef<[u8]>> Checksummed for T {
    fn checksum(&self) -> Checksum {
        Checksum::of(self.as_ref())
    }
}

/// Group candidates by checksum and return the authoritative group's
/// payload, if any group holds more than half the expected total.
pub fn vote_checksum<T: Checksummed>(
    ballots: &[Ballot<T>],
    expected_total: usize,
) -> Result<VoteResult<'_, T>, VoteError> {
    if !meets_quorum(ballots.len(), expected_total) {
        return Err(VoteError::InsufficientInput {
            received: ballots.len(),
            expected: expected_total,
        });
    }

    // First-seen order keeps the result deterministic for a given input
    // sequence; authority itself does not depend on order.
    let mut groups: Vec<(Checksum, Vec<usize>)> = Vec::new();
    for (i, ballot) in ballots.iter().enumerate() {
        let digest = ballot.payload.checksum();
        match groups.iter_mut().find(|(sum, _)| *sum == digest) {
            Some((_, members)) => members.push(i),
            None => groups.push((digest, vec![i])),
        }
    }

    let mut authoritative = groups
        .iter()
        .filter(|(_, members)| meets_quorum(members.len(), expected_total));

    let winner = match (authoritative.next(), authoritative.next()) {
        (Some(group), None) => group,
        (None, _) => {
            return Err(VoteError::NoWinner {
                received: ballots.len(),
                expected: expected_total,
            })
        }
        (Some(_), Some(_)) => {
            let groups = groups
                .iter()
                .filter(|(_, m)| meets_quorum(m.len(), expected_total))
                .count();
            return Err(VoteError::InconsistentRound {
                groups,
                expected: expected_total,
            });
        }
    };

    let support = winner.1.len();
    Ok(VoteResult {
        payload: &ballots[winner.1[0]].payload,
        support,
        dissent: ballots.len() - support,
    })
}
