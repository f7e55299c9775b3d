//! Round accumulation: the bounded window that collects ballots.
//!
//! A round does not exist until its first ballot arrives; that arrival
//! pins the deadline. Every later ballot lands in the same round until
//! the deadline passes, after which the round is drained as a unit and
//! the next ballot opens a fresh one. Time is passed in by the caller,
//! which keeps the type free of timers and trivially testable.

use std::time::{Duration, Instant};

use crate::ballot::Ballot;

/// Window configuration for a voting round.
#[derive(Debug, Clone, Copy)]
pub struct RoundConfig {
    /// Collection window measured from the round's first ballot.
    pub gather_window: Duration,
    /// Absolute cap on the window, whatever `gather_window` says.
    pub max_window: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            gather_window: Duration::from_millis(100),
            max_window: Duration::from_secs(2),
        }
    }
}

impl RoundConfig {
    fn effective_window(&self) -> Duration {
        self.gather_window.min(self.max_window)
    }
}

/// An accumulating set of ballots with a deadline.
#[derive(Debug)]
pub struct VoteRound<T> {
    config: RoundConfig,
    ballots: Vec<Ballot<T>>,
    opened_at: Option<Instant>,
}

impl<T> VoteRound<T> {
    /// A closed, empty round.
    pub fn new(config: RoundConfig) -> Self {
        Self {
            config,
            ballots: Vec::new(),
            opened_at: None,
        }
    }

    /// Whether a round is currently accumulating.
    pub fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }

    /// Ballots received so far this round.
    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    /// True when no ballots have been received.
    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }

    /// When the open round closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.opened_at
            .map(|at| at + self.config.effective_window())
    }

    /// Time left in the open round — this is the shrinking receive
    /// timeout the caller feeds to its readiness wait.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Whether the open round's window has elapsed.
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.deadline(), Some(deadline) if now >= deadline)
    }

    /// Record a ballot.
    ///
    /// The first ballot opens the round and pins its deadline. A ballot
    /// arriving after the deadline closes the stale round instead of
    /// joining it: the stale ballots are returned for the caller to
    /// evaluate (or discard), and this ballot opens the next round.
    pub fn accept(&mut self, ballot: Ballot<T>, now: Instant) -> Option<Vec<Ballot<T>>> {
        let stale = if self.is_expired(now) {
            Some(self.take())
        } else {
            None
        };

        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
        self.ballots.push(ballot);
        stale
    }

    /// Drain the round and close it. The next ballot starts a new round.
    pub fn take(&mut self) -> Vec<Ballot<T>> {
        self.opened_at = None;
        std::mem::take(&mut self.ballots)
    }
}
