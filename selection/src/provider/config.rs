use crate::Peer;
use std::time::Duration;

/// Configuration for the [Provider](super::Provider).
#[derive(Clone, Debug)]
pub struct Config<P: Peer> {
    /// The channel whose chaincode policies are fetched.
    pub channel: String,

    /// Peers queried for chaincode policies, tried in order until one answers.
    pub targets: Vec<P>,

    /// Maximum time spent querying targets for a single policy.
    ///
    /// If `None`, a query waits for every target to answer or fail.
    ///
    /// The cache write lock is held while a query runs, so lookups of every chaincode on the
    /// channel (including cached ones) wait for it. Without a timeout, a target that never
    /// answers stalls the whole channel.
    pub query_timeout: Option<Duration>,
}
