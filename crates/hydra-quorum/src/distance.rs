//! Distance voting for near-identical payloads.
//!
//! Replicas that compute over the same inputs usually produce the same
//! output, but a corrupted or lagging replica can diverge in a few
//! records without being bit-for-bit wrong everywhere. Distance voting
//! tolerates that: each candidate is scored by its summed distance to
//! every other candidate, and the most central one wins.

use crate::ballot::{Ballot, VoteResult};
use crate::error::VoteError;
use crate::meets_quorum;

/// Payloads that can measure how far apart two of them are.
///
/// Zero means "agrees exactly" for support counting. Implementations must
/// be symmetric.
pub trait PairwiseDistance {
    /// Distance between two payloads.
    fn distance(&self, other: &Self) -> u64;
}

/// The record-sequence metric: a size mismatch costs 3 per missing
/// record, plus 1 per mismatched record over the overlapping range.
///
/// The 3× weight makes a truncated result lose to a complete one even
/// when the truncation hides the disagreement.
pub fn record_distance<T: PartialEq>(a: &[T], b: &[T]) -> u64 {
    let size_gap = a.len().abs_diff(b.len()) as u64;
    let overlap = a.len().min(b.len());
    let mismatches = a[..overlap]
        .iter()
        .zip(&b[..overlap])
        .filter(|(x, y)| x != y)
        .count() as u64;
    size_gap * 3 + mismatches
}

impl<T: PartialEq> PairwiseDistance for Vec<T> {
    fn distance(&self, other: &Self) -> u64 {
        record_distance(self, other)
    }
}

/// Pick the candidate with minimum total distance to all others.
///
/// Ties resolve to the first minimum in input order. Fails only when the
/// round is short of quorum — one lone ballot in a one-replica round is a
/// valid (if trivial) winner.
pub fn vote_distance<T: PairwiseDistance>(
    ballots: &[Ballot<T>],
    expected_total: usize,
) -> Result<VoteResult<'_, T>, VoteError> {
    if !meets_quorum(ballots.len(), expected_total) {
        return Err(VoteError::InsufficientInput {
            received: ballots.len(),
            expected: expected_total,
        });
    }

    let mut winner = 0usize;
    let mut best = u64::MAX;
    for (i, candidate) in ballots.iter().enumerate() {
        let total: u64 = ballots
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, other)| candidate.payload.distance(&other.payload))
            .sum();
        if total < best {
            best = total;
            winner = i;
        }
    }

    let support = ballots
        .iter()
        .filter(|b| ballots[winner].payload.distance(&b.payload) == 0)
        .count();

    Ok(VoteResult {
        payload: &ballots[winner].payload,
        support,
        dissent: ballots.len() - support,
    })
}
