//! Resolve a compiled policy to one satisfying peer group per call.

use crate::{
    balancer::LoadBalancePolicy,
    group::{Group, PeerGroup},
    Peer,
};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when resolving a peer group.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("no peer group satisfies the policy")]
    Unsatisfiable,
}

/// Picks peer groups satisfying a compiled [Group].
///
/// The satisfying combinations are enumerated once, at construction. Each call to
/// [PeerGroupResolver::resolve] then only asks the [LoadBalancePolicy] to pick among them.
pub struct PeerGroupResolver<P: Peer, L: LoadBalancePolicy> {
    combinations: Vec<PeerGroup<P>>,
    balancer: Arc<L>,
}

impl<P: Peer, L: LoadBalancePolicy> PeerGroupResolver<P, L> {
    /// Creates a resolver for `root`, enumerating its satisfying combinations.
    pub fn new(root: &Group<P>, balancer: Arc<L>) -> Self {
        Self {
            combinations: root.combinations().into_iter().collect(),
            balancer,
        }
    }

    /// Returns a peer group that satisfies the policy.
    pub fn resolve(&self) -> Result<PeerGroup<P>, Error> {
        if self.combinations.is_empty() {
            return Err(Error::Unsatisfiable);
        }
        Ok(self.balancer.choose(&self.combinations).clone())
    }

    /// Returns every peer group that satisfies the policy, in a stable order.
    pub fn combinations(&self) -> &[PeerGroup<P>] {
        &self.combinations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        balancer::{Random, RoundRobin},
        mocks::{First, Peer as MockPeer},
        policy::{self, builder::*, EndorsementPolicy, Principal},
    };
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
    use std::collections::{BTreeSet, HashSet};

    const ORGS: [&str; 4] = ["Org1", "Org2", "Org3", "Org4"];

    fn pool(per_org: usize) -> Vec<MockPeer> {
        ORGS.iter()
            .flat_map(|org| {
                (0..per_org).map(move |i| {
                    MockPeer::new(&format!("peer{i}.{}:7051", org.to_lowercase()), org)
                })
            })
            .collect()
    }

    fn compile(policy: &EndorsementPolicy, pool: &[MockPeer]) -> Group<MockPeer> {
        policy::compile(policy, |org: &str| {
            pool.iter().filter(|p| p.msp_id() == org).cloned().collect()
        })
        .unwrap()
    }

    fn orgs_in(group: &PeerGroup<MockPeer>) -> BTreeSet<String> {
        group.peers().map(|p| p.msp_id().to_string()).collect()
    }

    /// Enumerates every subset of `pool` in which exactly `n` of `orgs` are each represented by
    /// exactly one peer, and no other peer is present.
    fn brute_force(n: usize, orgs: &[&str], pool: &[MockPeer]) -> HashSet<PeerGroup<MockPeer>> {
        let mut valid = HashSet::new();
        for mask in 0u32..(1 << pool.len()) {
            let members: Vec<_> = pool
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, p)| p.clone())
                .collect();
            let represented: BTreeSet<_> = members.iter().map(|p| p.msp_id()).collect();
            if members.len() == n
                && represented.len() == n
                && represented.iter().all(|org| orgs.contains(org))
            {
                valid.insert(members.into_iter().collect());
            }
        }
        valid
    }

    #[test]
    fn test_signed_by() {
        let pool = pool(3);
        let root = compile(&n_of_orgs(1, &["Org2"]), &pool);
        let resolver = PeerGroupResolver::new(&root, Arc::new(Random::new(0)));
        for _ in 0..20 {
            let group = resolver.resolve().unwrap();
            assert_eq!(group.len(), 1);
            assert!(group.peers().all(|p| p.msp_id() == "Org2"));
        }
    }

    #[test]
    fn test_n_out_of_matches_brute_force() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool = pool(2);
        for n in 1..=3 {
            let mut orgs = ORGS.to_vec();
            orgs.shuffle(&mut rng);
            let orgs = &orgs[..rng.gen_range(n..=ORGS.len())];

            let root = compile(&n_of_orgs(n as i32, orgs), &pool);
            let resolver = PeerGroupResolver::new(&root, Arc::new(Random::new(n as u64)));

            let expected = brute_force(n, orgs, &pool);
            let enumerated: HashSet<_> = resolver.combinations().iter().cloned().collect();
            assert_eq!(enumerated, expected);

            for _ in 0..50 {
                let group = resolver.resolve().unwrap();
                assert_eq!(orgs_in(&group).len(), n);
                assert!(expected.contains(&group));
            }
        }
    }

    #[test]
    fn test_deterministic_enumeration() {
        let mut pool = pool(2);
        let policy = n_of_orgs(2, &["Org1", "Org2", "Org3"]);
        let first = PeerGroupResolver::new(&compile(&policy, &pool), Arc::new(First));

        // Peer order does not change the enumerated set
        pool.reverse();
        let second = PeerGroupResolver::new(&compile(&policy, &pool), Arc::new(First));
        assert_eq!(first.combinations(), second.combinations());
        assert_eq!(first.resolve(), second.resolve());
    }

    #[test]
    fn test_round_robin_fairness() {
        let pool = pool(2);
        let root = compile(&n_of_orgs(2, &["Org1", "Org2", "Org3"]), &pool);
        let resolver = PeerGroupResolver::new(&root, Arc::new(RoundRobin::new()));
        let k = resolver.combinations().len();
        assert_eq!(k, 12);

        let visited: HashSet<_> = (0..k).map(|_| resolver.resolve().unwrap()).collect();
        assert_eq!(visited.len(), k);

        // Wraps back to the first candidate
        assert_eq!(resolver.resolve().unwrap(), resolver.combinations()[0]);
    }

    #[test]
    fn test_nested_policy() {
        // 1-of[ 2-of[Org1,Org2], 2-of[Org1, 1-of[Org3,Org4]] ]
        let policy = EndorsementPolicy {
            version: 0,
            rule: n_out_of(
                1,
                vec![
                    n_out_of(2, vec![signed_by(0), signed_by(1)]),
                    n_out_of(
                        2,
                        vec![signed_by(0), n_out_of(1, vec![signed_by(2), signed_by(3)])],
                    ),
                ],
            ),
            identities: ORGS.iter().map(|org| Principal::member(*org)).collect(),
        };
        let pool = pool(2);
        let resolver =
            PeerGroupResolver::new(&compile(&policy, &pool), Arc::new(RoundRobin::new()));

        let allowed: [BTreeSet<String>; 3] = [
            ["Org1", "Org2"].iter().map(|s| s.to_string()).collect(),
            ["Org1", "Org3"].iter().map(|s| s.to_string()).collect(),
            ["Org1", "Org4"].iter().map(|s| s.to_string()).collect(),
        ];
        for _ in 0..50 {
            let group = resolver.resolve().unwrap();
            assert_eq!(group.len(), 2);
            assert!(allowed.contains(&orgs_in(&group)), "{group:?}");
        }
    }

    #[test]
    fn test_unsatisfiable() {
        let pool: Vec<_> = pool(2)
            .into_iter()
            .filter(|p| p.msp_id() != "Org3")
            .collect();
        let root = compile(&n_of_orgs(2, &["Org1", "Org3"]), &pool);
        let resolver = PeerGroupResolver::new(&root, Arc::new(RoundRobin::new()));
        assert!(resolver.combinations().is_empty());
        assert_eq!(resolver.resolve(), Err(Error::Unsatisfiable));
    }
}
