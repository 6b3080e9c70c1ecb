//! Fetch and cache chaincode endorsement policies.
//!
//! # Overview
//!
//! The [Provider] answers [PolicyProvider::policy] from a cache keyed by (channel, chaincode). On
//! a miss, it asks the configured targets for the chaincode's metadata with the `getccdata`
//! function of the `lscc` system chaincode, trying targets in order until one answers without
//! error. If every target fails, the failures of all targets are returned together.
//!
//! # Concurrency
//!
//! The cache is guarded by a reader-writer lock. Hits only take the read lock. Misses take the
//! write lock and check the cache again before querying, so concurrent misses for the same
//! chaincode result in a single query. Cached policies are kept until [PolicyProvider::invalidate]
//! is called for their chaincode.

use crate::{policy::EndorsementPolicy, Error, Peer};
use async_lock::RwLock;
use bytes::Bytes;
use futures::future::{self, Either};
use futures_timer::Delay;
use prometheus_client::registry::Registry;
use std::{
    collections::HashMap,
    fmt::Display,
    future::Future,
    pin::pin,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

mod config;
pub use config::Config;
mod metrics;

/// System chaincode storing chaincode metadata.
pub const LSCC: &str = "lscc";

/// Function of [LSCC] returning the metadata of a chaincode.
pub const GET_CHAINCODE_DATA: &str = "getccdata";

/// Responses with a status at or above this value carry an error.
pub const ERROR_THRESHOLD: i32 = 400;

/// A chaincode function invocation sent to a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub channel: String,
    pub chaincode: String,
    pub function: String,
    pub args: Vec<Bytes>,
}

impl Invocation {
    /// Returns the invocation that fetches the metadata of `chaincode` on `channel`.
    pub fn chaincode_data(channel: &str, chaincode: &str) -> Self {
        Self {
            channel: channel.to_string(),
            chaincode: LSCC.to_string(),
            function: GET_CHAINCODE_DATA.to_string(),
            args: vec![
                Bytes::copy_from_slice(channel.as_bytes()),
                Bytes::copy_from_slice(chaincode.as_bytes()),
            ],
        }
    }
}

/// The response of a peer to an [Invocation].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: i32,
    pub message: String,
    pub payload: Bytes,
}

impl Response {
    /// Returns true if the response carries an error.
    pub fn is_error(&self) -> bool {
        self.status >= ERROR_THRESHOLD
    }
}

/// Signs and sends proposals to peers.
pub trait Dispatcher: Clone + Send + Sync + 'static {
    /// Type of peer proposals are sent to.
    type Peer: Peer;

    /// Error returned when a proposal could not be sent or answered.
    type Error: Display + Send;

    /// Returns true if a signing identity is available for proposals on `channel`.
    fn is_configured(&self, channel: &str) -> bool;

    /// Sends `invocation` to `target` and waits for its response.
    fn send(
        &self,
        target: &Self::Peer,
        invocation: Invocation,
    ) -> impl Future<Output = Result<Response, Self::Error>> + Send;
}

/// Provides the endorsement policies of chaincodes on a channel.
pub trait PolicyProvider: Send + Sync + 'static {
    /// Returns the channel policies are provided for.
    fn channel(&self) -> &str;

    /// Returns the endorsement policy of `chaincode`.
    fn policy(
        &self,
        chaincode: &str,
    ) -> impl Future<Output = Result<Arc<EndorsementPolicy>, Error>> + Send;

    /// Forgets any cached policy of `chaincode`, returning true if one was cached.
    fn invalidate(&self, chaincode: &str) -> impl Future<Output = bool> + Send;
}

/// Identifies a cached policy.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Key {
    channel: String,
    chaincode: String,
}

impl Key {
    fn new(channel: &str, chaincode: &str) -> Self {
        Self {
            channel: channel.to_string(),
            chaincode: chaincode.to_string(),
        }
    }
}

/// Fetches endorsement policies from peers and caches them.
pub struct Provider<D: Dispatcher> {
    channel: String,
    targets: Vec<D::Peer>,
    query_timeout: Option<Duration>,
    dispatcher: D,

    cache: RwLock<HashMap<Key, Arc<EndorsementPolicy>>>,

    metrics: metrics::Metrics,
}

impl<D: Dispatcher> Provider<D> {
    /// Creates a new provider.
    ///
    /// Fails if the channel is empty, if it has no targets, or if the dispatcher cannot sign
    /// proposals for it.
    pub fn new(
        cfg: Config<D::Peer>,
        dispatcher: D,
        registry: &mut Registry,
    ) -> Result<Self, Error> {
        if cfg.channel.is_empty() {
            return Err(Error::Validation("channel ID is required"));
        }
        if cfg.targets.is_empty() || !dispatcher.is_configured(&cfg.channel) {
            return Err(Error::NotConfigured(cfg.channel));
        }
        Ok(Self {
            channel: cfg.channel,
            targets: cfg.targets,
            query_timeout: cfg.query_timeout,
            dispatcher,
            cache: RwLock::new(HashMap::new()),
            metrics: metrics::Metrics::init(registry),
        })
    }

    /// Queries targets in order until one returns the metadata of `chaincode`.
    async fn query(&self, chaincode: &str) -> Result<EndorsementPolicy, Error> {
        let deadline = self.query_timeout.map(|timeout| Instant::now() + timeout);
        let mut failures = Vec::new();
        for target in self.targets.iter() {
            let invocation = Invocation::chaincode_data(&self.channel, chaincode);
            let request = self.dispatcher.send(target, invocation);
            let result = match deadline {
                None => request.await,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let expired = remaining.is_zero();
                    let outcome = if expired {
                        None
                    } else {
                        match future::select(pin!(request), Delay::new(remaining)).await {
                            Either::Left((result, _)) => Some(result),
                            Either::Right(_) => None,
                        }
                    };
                    let Some(result) = outcome else {
                        warn!(
                            channel = %self.channel,
                            chaincode,
                            peer = target.url(),
                            "query timed out"
                        );
                        return Err(Error::Timeout {
                            channel: self.channel.clone(),
                            chaincode: chaincode.to_string(),
                        });
                    };
                    result
                }
            };

            // Move to the next target on failure
            let failure = match result {
                Ok(response) if !response.is_error() => {
                    self.metrics.queries.inc();
                    return EndorsementPolicy::from_chaincode_data(response.payload).map_err(
                        |source| Error::Protocol {
                            channel: self.channel.clone(),
                            chaincode: chaincode.to_string(),
                            source,
                        },
                    );
                }
                Ok(response) => format!(
                    "{}: status {}: {}",
                    target.url(),
                    response.status,
                    response.message
                ),
                Err(err) => format!("{}: {}", target.url(), err),
            };
            debug!(channel = %self.channel, chaincode, %failure, "query failed");
            self.metrics.query_failures.inc();
            failures.push(failure);
        }

        warn!(
            channel = %self.channel,
            chaincode,
            targets = failures.len(),
            "query failed on every target"
        );
        Err(Error::Query {
            channel: self.channel.clone(),
            chaincode: chaincode.to_string(),
            failures,
        })
    }
}

impl<D: Dispatcher> PolicyProvider for Provider<D> {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn policy(&self, chaincode: &str) -> Result<Arc<EndorsementPolicy>, Error> {
        if chaincode.is_empty() {
            return Err(Error::Validation("chaincode ID is required"));
        }
        let key = Key::new(&self.channel, chaincode);

        // Fast path
        {
            let cache = self.cache.read().await;
            if let Some(policy) = cache.get(&key) {
                trace!(channel = %self.channel, chaincode, "policy cached");
                self.metrics.cache_hits.inc();
                return Ok(policy.clone());
            }
        }

        // Another caller may have fetched the policy while we waited for the write lock
        let mut cache = self.cache.write().await;
        if let Some(policy) = cache.get(&key) {
            self.metrics.cache_hits.inc();
            return Ok(policy.clone());
        }
        self.metrics.cache_misses.inc();
        debug!(channel = %self.channel, chaincode, "fetching policy");
        let policy = Arc::new(self.query(chaincode).await?);
        cache.insert(key, policy.clone());
        Ok(policy)
    }

    async fn invalidate(&self, chaincode: &str) -> bool {
        let key = Key::new(&self.channel, chaincode);
        let removed = self.cache.write().await.remove(&key).is_some();
        if removed {
            debug!(channel = %self.channel, chaincode, "policy invalidated");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks::{traced, Behavior, Dispatcher as MockDispatcher, Peer as MockPeer},
        policy::builder::n_of_orgs,
    };
    use futures::{executor::block_on, future::join_all};

    const CHANNEL: &str = "mychannel";

    fn targets(count: usize) -> Vec<MockPeer> {
        (0..count)
            .map(|i| MockPeer::new(&format!("peer{i}.org1:7051"), "Org1"))
            .collect()
    }

    fn setup(
        targets: Vec<MockPeer>,
        query_timeout: Option<Duration>,
    ) -> (Provider<MockDispatcher>, MockDispatcher) {
        let dispatcher = MockDispatcher::new();
        dispatcher.add_policy("mycc", n_of_orgs(1, &["Org1", "Org2"]));
        let provider = Provider::new(
            Config {
                channel: CHANNEL.to_string(),
                targets,
                query_timeout,
            },
            dispatcher.clone(),
            &mut Registry::default(),
        )
        .unwrap();
        (provider, dispatcher)
    }

    #[test]
    fn test_new_invalid() {
        traced();
        let dispatcher = MockDispatcher::new();
        let result = Provider::new(
            Config {
                channel: String::new(),
                targets: targets(1),
                query_timeout: None,
            },
            dispatcher.clone(),
            &mut Registry::default(),
        );
        assert!(matches!(result, Err(Error::Validation(_))));

        let result = Provider::new(
            Config {
                channel: CHANNEL.to_string(),
                targets: Vec::new(),
                query_timeout: None,
            },
            dispatcher,
            &mut Registry::default(),
        );
        assert!(matches!(result, Err(Error::NotConfigured(channel)) if channel == CHANNEL));

        let result = Provider::new(
            Config {
                channel: CHANNEL.to_string(),
                targets: targets(1),
                query_timeout: None,
            },
            MockDispatcher::unconfigured(),
            &mut Registry::default(),
        );
        assert!(matches!(result, Err(Error::NotConfigured(_))));
    }

    #[test]
    fn test_policy_cached() {
        traced();
        let (provider, dispatcher) = setup(targets(2), None);
        block_on(async {
            let first = provider.policy("mycc").await.unwrap();
            let second = provider.policy("mycc").await.unwrap();
            assert_eq!(*first, n_of_orgs(1, &["Org1", "Org2"]));
            assert!(Arc::ptr_eq(&first, &second));
        });
        assert_eq!(dispatcher.calls(), 1);
        assert_eq!(provider.metrics.cache_hits.get(), 1);
        assert_eq!(provider.metrics.cache_misses.get(), 1);

        // Sent to the first target only
        let requests = dispatcher.requests();
        assert_eq!(requests.len(), 1);
        let (target, invocation) = &requests[0];
        assert_eq!(target, "peer0.org1:7051");
        assert_eq!(invocation, &Invocation::chaincode_data(CHANNEL, "mycc"));
        assert_eq!(invocation.chaincode, LSCC);
        assert_eq!(invocation.function, GET_CHAINCODE_DATA);
        assert_eq!(
            invocation.args,
            vec![Bytes::from_static(b"mychannel"), Bytes::from_static(b"mycc")]
        );
    }

    #[test]
    fn test_policy_empty_chaincode() {
        traced();
        let (provider, dispatcher) = setup(targets(1), None);
        let result = block_on(provider.policy(""));
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(dispatcher.calls(), 0);
    }

    #[test]
    fn test_policy_failover() {
        traced();
        let (provider, dispatcher) = setup(targets(3), None);
        dispatcher.set_behavior("peer0.org1:7051", Behavior::Fail("connection refused".into()));
        dispatcher.set_behavior(
            "peer1.org1:7051",
            Behavior::Status(500, "chaincode unavailable".into()),
        );

        let policy = block_on(provider.policy("mycc")).unwrap();
        assert_eq!(*policy, n_of_orgs(1, &["Org1", "Org2"]));

        let tried: Vec<_> = dispatcher.requests().into_iter().map(|(t, _)| t).collect();
        assert_eq!(tried, vec!["peer0.org1:7051", "peer1.org1:7051", "peer2.org1:7051"]);
        assert_eq!(provider.metrics.query_failures.get(), 2);
        assert_eq!(provider.metrics.queries.get(), 1);
    }

    #[test]
    fn test_policy_all_targets_fail() {
        traced();
        let (provider, dispatcher) = setup(targets(2), None);
        dispatcher.set_behavior("peer0.org1:7051", Behavior::Fail("connection refused".into()));
        dispatcher.set_behavior("peer1.org1:7051", Behavior::Status(403, "access denied".into()));

        let Err(Error::Query {
            channel,
            chaincode,
            failures,
        }) = block_on(provider.policy("mycc"))
        else {
            panic!("expected query error");
        };
        assert_eq!(channel, CHANNEL);
        assert_eq!(chaincode, "mycc");
        assert_eq!(
            failures,
            vec![
                "peer0.org1:7051: connection refused".to_string(),
                "peer1.org1:7051: status 403: access denied".to_string(),
            ]
        );

        // Every failure is listed on its own line
        let err = block_on(provider.policy("mycc")).unwrap_err().to_string();
        assert_eq!(err.lines().count(), 3);

        // Failures are not cached
        assert_eq!(dispatcher.calls(), 4);
    }

    #[test]
    fn test_policy_unknown_chaincode() {
        traced();
        let (provider, _) = setup(targets(1), None);
        let result = block_on(provider.policy("unknown"));
        assert!(matches!(result, Err(Error::Query { failures, .. }) if failures.len() == 1));
    }

    #[test]
    fn test_policy_invalid_payload() {
        traced();
        let (provider, dispatcher) = setup(targets(2), None);
        dispatcher.set_behavior("peer0.org1:7051", Behavior::Garbage);

        let result = block_on(provider.policy("mycc"));
        assert!(matches!(result, Err(Error::Protocol { chaincode, .. }) if chaincode == "mycc"));

        // A malformed answer is not retried on other targets
        assert_eq!(dispatcher.calls(), 1);
    }

    #[test]
    fn test_policy_timeout() {
        traced();
        let (provider, dispatcher) = setup(targets(2), Some(Duration::from_millis(50)));
        dispatcher.set_behavior("peer0.org1:7051", Behavior::Hang);

        let result = block_on(provider.policy("mycc"));
        assert!(matches!(result, Err(Error::Timeout { chaincode, .. }) if chaincode == "mycc"));

        // The second target is never reached
        assert_eq!(dispatcher.calls(), 1);

        // The expired query released the cache
        dispatcher.set_behavior("peer0.org1:7051", Behavior::Serve);
        assert!(block_on(provider.policy("mycc")).is_ok());
        assert_eq!(dispatcher.calls(), 2);
    }

    #[test]
    fn test_policy_timeout_not_reached() {
        traced();
        let (provider, dispatcher) = setup(targets(2), Some(Duration::from_secs(10)));
        dispatcher.set_behavior("peer0.org1:7051", Behavior::Fail("connection refused".into()));
        assert!(block_on(provider.policy("mycc")).is_ok());
        assert_eq!(dispatcher.calls(), 2);
    }

    #[test]
    fn test_policy_concurrent_misses() {
        traced();
        let (provider, dispatcher) = setup(targets(1), None);
        let results = block_on(join_all((0..10).map(|_| provider.policy("mycc"))));
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(dispatcher.calls(), 1);
    }

    #[test]
    fn test_invalidate() {
        traced();
        let (provider, dispatcher) = setup(targets(1), None);
        block_on(async {
            provider.policy("mycc").await.unwrap();
            assert!(provider.invalidate("mycc").await);
            assert!(!provider.invalidate("mycc").await);

            // Upgraded chaincode now requires both organizations
            dispatcher.add_policy("mycc", n_of_orgs(2, &["Org1", "Org2"]));
            let policy = provider.policy("mycc").await.unwrap();
            assert_eq!(*policy, n_of_orgs(2, &["Org1", "Org2"]));
        });
        assert_eq!(dispatcher.calls(), 2);
    }
}
