//! Sets of peers that can jointly satisfy a policy clause.
//!
//! A [Group] is the compiled form of an endorsement policy: each leaf holds the peers of one
//! organization and each combinator requires `threshold` of its children. Calling
//! [Group::combinations] enumerates every [PeerGroup] that satisfies the group.

use crate::Peer;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
};

/// A deduplicated set of peers representing one concrete satisfying assignment.
///
/// Peers are identified by URL: equality, ordering and hashing only consider the set of URLs.
#[derive(Clone)]
pub struct PeerGroup<P: Peer> {
    peers: BTreeMap<String, P>,
}

impl<P: Peer> PeerGroup<P> {
    /// Returns a group containing no peers.
    pub fn empty() -> Self {
        Self {
            peers: BTreeMap::new(),
        }
    }

    /// Returns a group containing only `peer`.
    pub fn single(peer: P) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(peer.url().to_string(), peer);
        Self { peers }
    }

    /// Returns a group containing the peers of both `self` and `other`.
    pub fn union(&self, other: &Self) -> Self {
        let mut peers = self.peers.clone();
        for (url, peer) in other.peers.iter() {
            peers.entry(url.clone()).or_insert_with(|| peer.clone());
        }
        Self { peers }
    }

    /// Returns the number of peers in the group.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if the group contains no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns true if a peer with the given URL is in the group.
    pub fn contains(&self, url: &str) -> bool {
        self.peers.contains_key(url)
    }

    /// Iterates over the peers of the group, ordered by URL.
    pub fn peers(&self) -> impl Iterator<Item = &P> {
        self.peers.values()
    }

    /// Iterates over the URLs of the group, in order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    /// Consumes the group, returning its peers ordered by URL.
    pub fn into_peers(self) -> Vec<P> {
        self.peers.into_values().collect()
    }
}

impl<P: Peer> FromIterator<P> for PeerGroup<P> {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut peers = BTreeMap::new();
        for peer in iter {
            peers.entry(peer.url().to_string()).or_insert(peer);
        }
        Self { peers }
    }
}

impl<P: Peer> PartialEq for PeerGroup<P> {
    fn eq(&self, other: &Self) -> bool {
        self.urls().eq(other.urls())
    }
}

impl<P: Peer> Eq for PeerGroup<P> {}

impl<P: Peer> PartialOrd for PeerGroup<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Peer> Ord for PeerGroup<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.urls().cmp(other.urls())
    }
}

impl<P: Peer> Hash for PeerGroup<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peers.len().hash(state);
        for url in self.urls() {
            url.hash(state);
        }
    }
}

impl<P: Peer> fmt::Debug for PeerGroup<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.urls()).finish()
    }
}

/// A compiled policy clause.
#[derive(Clone)]
pub enum Group<P: Peer> {
    /// Peers of a single organization. Any one of them satisfies the clause.
    Leaf(Vec<P>),

    /// Satisfied when `threshold` of `children` are satisfied.
    Combinator {
        children: Vec<Group<P>>,
        threshold: usize,
    },
}

impl<P: Peer> Group<P> {
    /// Returns the set of peer groups that satisfy this group.
    ///
    /// An empty set means the clause cannot be satisfied by the peers it was compiled with.
    pub fn combinations(&self) -> BTreeSet<PeerGroup<P>> {
        match self {
            Group::Leaf(peers) => peers.iter().cloned().map(PeerGroup::single).collect(),
            Group::Combinator {
                children,
                threshold,
            } => {
                // Children are enumerated once and reused across every subset they appear in
                let options: Vec<Vec<PeerGroup<P>>> = children
                    .iter()
                    .map(|child| child.combinations().into_iter().collect())
                    .collect();

                let mut result = BTreeSet::new();
                for subset in Subsets::new(children.len(), *threshold) {
                    result.extend(product(subset.iter().map(|&i| &options[i])));
                }
                result
            }
        }
    }
}

impl<P: Peer> fmt::Debug for Group<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Leaf(peers) => f
                .debug_tuple("Leaf")
                .field(&peers.iter().map(|p| p.url()).collect::<Vec<_>>())
                .finish(),
            Group::Combinator {
                children,
                threshold,
            } => f
                .debug_struct("Combinator")
                .field("threshold", threshold)
                .field("children", children)
                .finish(),
        }
    }
}

/// Merges one option from each of `choices` in every possible way.
///
/// If any choice has no options, the product is empty.
fn product<'a, P: Peer>(
    choices: impl Iterator<Item = &'a Vec<PeerGroup<P>>>,
) -> Vec<PeerGroup<P>> {
    let mut partial = vec![PeerGroup::empty()];
    for options in choices {
        if options.is_empty() {
            return Vec::new();
        }
        partial = partial
            .iter()
            .flat_map(|acc| options.iter().map(move |option| acc.union(option)))
            .collect();
    }
    partial
}

/// Iterator over every `k`-element subset of `0..n`, as ascending index lists in
/// lexicographic order.
struct Subsets {
    n: usize,
    indices: Vec<usize>,
    done: bool,
}

impl Subsets {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            indices: (0..k).collect(),
            done: k > n,
        }
    }
}

impl Iterator for Subsets {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self.indices.clone();

        // Advance the rightmost index that has room to move, then reset everything after it
        let k = self.indices.len();
        match (0..k).rev().find(|&i| self.indices[i] < self.n - k + i) {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..k {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
            }
            None => self.done = true,
        }
        Some(current)
    }
}
