//! Select endorsers for the chaincodes invoked by a transaction.
//!
//! # Overview
//!
//! The [Service] answers [Service::endorsers] for a single channel. Given the peers currently
//! available on the channel and the chaincodes a transaction invokes, it returns a set of peers
//! whose endorsements satisfy the endorsement policy of every chaincode.
//!
//! # Caching
//!
//! Compiling policies and enumerating their satisfying peer groups is done once per
//! [ResolverKey] and reused by later requests for the same chaincodes. A cached resolver is
//! bound to the peers it was compiled with: a request with a different set of peers compiles a
//! new resolver from the (cached) policies and replaces the old one.
//!
//! Like the [Provider](crate::provider::Provider), the resolver cache takes a read lock on hits
//! and a write lock (checking the cache again) on misses.

use crate::{
    balancer::LoadBalancePolicy,
    policy,
    provider::{Dispatcher, PolicyProvider, Provider},
    resolver::PeerGroupResolver,
    Error, Peer,
};
use async_lock::RwLock;
use prometheus_client::registry::Registry;
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{debug, trace, warn};

mod config;
pub use config::Config;
mod metrics;

/// Identifies a cached resolver: a channel and the set of chaincodes invoked on it.
///
/// Chaincodes are sorted and deduplicated, so the order they are requested in does not matter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverKey {
    channel: String,
    chaincodes: Vec<String>,
}

impl ResolverKey {
    /// Creates a key for `chaincodes` invoked on `channel`.
    pub fn new<S: AsRef<str>>(channel: &str, chaincodes: &[S]) -> Self {
        let mut chaincodes: Vec<String> =
            chaincodes.iter().map(|c| c.as_ref().to_string()).collect();
        chaincodes.sort();
        chaincodes.dedup();
        Self {
            channel: channel.to_string(),
            chaincodes,
        }
    }

    /// Returns the channel of the key.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns the chaincodes of the key, sorted.
    pub fn chaincodes(&self) -> &[String] {
        &self.chaincodes
    }
}

/// The (URL, organization) pairs of a set of peers.
type Fingerprint = BTreeSet<(String, String)>;

fn fingerprint<P: Peer>(peers: &[P]) -> Fingerprint {
    peers
        .iter()
        .map(|p| (p.url().to_string(), p.msp_id().to_string()))
        .collect()
}

/// A cached resolver and the peers it was compiled with.
struct Entry<P: Peer, L: LoadBalancePolicy> {
    peers: Fingerprint,
    resolver: Arc<PeerGroupResolver<P, L>>,
}

/// Selects endorsers satisfying the policies of chaincodes on one channel.
pub struct Service<P: Peer, Pp: PolicyProvider, L: LoadBalancePolicy> {
    channel: String,
    provider: Pp,
    balancer: Arc<L>,

    resolvers: RwLock<HashMap<ResolverKey, Entry<P, L>>>,

    metrics: metrics::Metrics,
}

impl<D: Dispatcher, L: LoadBalancePolicy> Service<D::Peer, Provider<D>, L> {
    /// Creates a new service fetching policies with `dispatcher`.
    ///
    /// Fails if the channel is empty or not configured (see [Provider::new]).
    pub fn new(
        cfg: Config<D::Peer, L>,
        dispatcher: D,
        registry: &mut Registry,
    ) -> Result<Self, Error> {
        let provider = Provider::new(cfg.provider, dispatcher, registry)?;
        Self::with_provider(provider, cfg.balancer, registry)
    }
}

impl<P: Peer, Pp: PolicyProvider, L: LoadBalancePolicy> Service<P, Pp, L> {
    /// Creates a new service fetching policies from `provider`.
    pub fn with_provider(
        provider: Pp,
        balancer: L,
        registry: &mut Registry,
    ) -> Result<Self, Error> {
        let channel = provider.channel().to_string();
        if channel.is_empty() {
            return Err(Error::Validation("channel ID is required"));
        }
        Ok(Self {
            channel,
            provider,
            balancer: Arc::new(balancer),
            resolvers: RwLock::new(HashMap::new()),
            metrics: metrics::Metrics::init(registry),
        })
    }

    /// Returns the channel endorsers are selected on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Returns peers among `peers` whose endorsements satisfy the policies of all `chaincodes`.
    ///
    /// Either every policy is satisfied by the returned peers or an error is returned.
    pub async fn endorsers<S: AsRef<str>>(
        &self,
        peers: &[P],
        chaincodes: &[S],
    ) -> Result<Vec<P>, Error> {
        if chaincodes.is_empty() {
            return Err(Error::Validation("no chaincode IDs provided"));
        }
        if chaincodes.iter().any(|c| c.as_ref().is_empty()) {
            return Err(Error::Validation("chaincode ID is required"));
        }
        if peers.is_empty() {
            return Err(Error::Validation("must provide at least one channel peer"));
        }

        let key = ResolverKey::new(&self.channel, chaincodes);
        let resolver = self.resolver(&key, peers).await?;
        match resolver.resolve() {
            Ok(group) => {
                self.metrics.resolutions.inc();
                Ok(group.into_peers())
            }
            Err(err) => {
                warn!(?err, channel = %self.channel, chaincodes = ?key.chaincodes, "no endorsers");
                self.metrics.unsatisfiable.inc();
                Err(Error::Resolution {
                    channel: self.channel.clone(),
                    chaincodes: key.chaincodes,
                })
            }
        }
    }

    /// Forgets the policy of `chaincode` and every resolver compiled from it.
    ///
    /// Intended to be called when a chaincode is upgraded, as its policy may have changed.
    pub async fn invalidate(&self, chaincode: &str) {
        let mut resolvers = self.resolvers.write().await;
        resolvers.retain(|key, _| !key.chaincodes.iter().any(|c| c == chaincode));
        self.provider.invalidate(chaincode).await;
        debug!(channel = %self.channel, chaincode, "invalidated");
    }

    /// Returns the resolver of `key` compiled for `peers`, compiling it if needed.
    async fn resolver(
        &self,
        key: &ResolverKey,
        peers: &[P],
    ) -> Result<Arc<PeerGroupResolver<P, L>>, Error> {
        let fingerprint = fingerprint(peers);

        // Fast path
        {
            let resolvers = self.resolvers.read().await;
            if let Some(entry) = resolvers.get(key) {
                if entry.peers == fingerprint {
                    trace!(
                        channel = %self.channel,
                        chaincodes = ?key.chaincodes,
                        "resolver cached"
                    );
                    self.metrics.cache_hits.inc();
                    return Ok(entry.resolver.clone());
                }
            }
        }

        // Another caller may have compiled the resolver while we waited for the write lock
        let mut resolvers = self.resolvers.write().await;
        if let Some(entry) = resolvers.get(key) {
            if entry.peers == fingerprint {
                self.metrics.cache_hits.inc();
                return Ok(entry.resolver.clone());
            }
        }

        // Compile the policy of every chaincode against the available peers
        let mut roots = Vec::with_capacity(key.chaincodes.len());
        for chaincode in key.chaincodes.iter() {
            let policy = self.provider.policy(chaincode).await?;
            let root = policy::compile(&policy, |org: &str| {
                peers
                    .iter()
                    .filter(|p| p.msp_id() == org)
                    .cloned()
                    .collect()
            })
            .map_err(|source| Error::Compile {
                channel: self.channel.clone(),
                chaincode: chaincode.clone(),
                source,
            })?;
            roots.push(root);
        }
        let resolver = Arc::new(PeerGroupResolver::new(
            &policy::all_of(roots),
            self.balancer.clone(),
        ));
        debug!(
            channel = %self.channel,
            chaincodes = ?key.chaincodes,
            combinations = resolver.combinations().len(),
            "compiled resolver"
        );
        self.metrics.compilations.inc();
        resolvers.insert(
            key.clone(),
            Entry {
                peers: fingerprint,
                resolver: resolver.clone(),
            },
        );
        Ok(resolver)
    }
}
