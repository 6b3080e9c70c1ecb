//! Strategies for picking one of several equally valid peer groups.

use crate::{group::PeerGroup, Peer};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex, PoisonError,
};

/// Picks one candidate among the peer groups that satisfy a policy.
///
/// Implementations may be shared by many resolvers and called concurrently.
pub trait LoadBalancePolicy: Send + Sync + 'static {
    /// Returns one of `candidates`.
    ///
    /// `candidates` is never empty and keeps the same order across calls for the same policy.
    fn choose<'a, P: Peer>(&self, candidates: &'a [PeerGroup<P>]) -> &'a PeerGroup<P>;
}

/// Cycles through candidates in order, wrapping around after the last.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    /// Creates a new round-robin policy starting at the first candidate.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancePolicy for RoundRobin {
    fn choose<'a, P: Peer>(&self, candidates: &'a [PeerGroup<P>]) -> &'a PeerGroup<P> {
        let next = self.cursor.fetch_add(1, Ordering::Relaxed);
        &candidates[next % candidates.len()]
    }
}

/// Picks a uniformly random candidate.
#[derive(Debug)]
pub struct Random {
    rng: Mutex<StdRng>,
}

impl Random {
    /// Creates a random policy with a reproducible sequence of choices.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for Random {
    fn default() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl LoadBalancePolicy for Random {
    fn choose<'a, P: Peer>(&self, candidates: &'a [PeerGroup<P>]) -> &'a PeerGroup<P> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        &candidates[rng.gen_range(0..candidates.len())]
    }
}
