//! Select endorsing peers that satisfy chaincode endorsement policies.
//!
//! # Overview
//!
//! Before submitting a transaction, a client must collect endorsements from a set of peers whose
//! signatures jointly satisfy the endorsement policy of every chaincode the transaction touches.
//! This crate computes such a set:
//!
//! 1. The [provider::Provider] fetches the endorsement policy of a chaincode from the network
//!    (via the `lscc`/`getccdata` system query) and caches it per channel and chaincode.
//! 2. [policy::compile] turns the policy tree into a [group::Group] bound to the peers currently
//!    available for each organization. Policies of multiple chaincodes are combined with a
//!    logical AND ([policy::all_of]).
//! 3. The [resolver::PeerGroupResolver] enumerates every [group::PeerGroup] that satisfies the
//!    compiled group and picks one per call with a [balancer::LoadBalancePolicy].
//! 4. The [service::Service] ties the above together for one channel, caching resolvers per
//!    (channel, chaincode set).
//!
//! # Scaling
//!
//! Enumeration is combinatorial in the branching factor of the policy (an `n`-of-`m` node
//! expands into `C(m, n)` subsets, each the Cartesian product of its children). Endorsement
//! policies name a handful of organizations in practice, which keeps this tractable. Policies
//! with many organizations and large thresholds will enumerate slowly.
//!
//! # Status
//!
//! `endorse-selection` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use thiserror::Error;

pub mod balancer;
pub mod group;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod policy;
pub mod provider;
pub mod resolver;
pub mod service;

pub use balancer::{LoadBalancePolicy, Random, RoundRobin};
pub use group::{Group, PeerGroup};
pub use policy::EndorsementPolicy;
pub use provider::{Dispatcher, PolicyProvider, Provider};
pub use resolver::PeerGroupResolver;
pub use service::Service;

/// A network peer that can endorse proposals.
///
/// Peers are owned by the discovery layer. This crate only reads their identity.
pub trait Peer: Clone + Send + Sync + 'static {
    /// Address of the peer. Two peers with the same URL are the same peer.
    fn url(&self) -> &str;

    /// Identifier of the membership service provider (organization) the peer belongs to.
    fn msp_id(&self) -> &str;
}

/// Errors that can occur when selecting endorsers.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(&'static str),
    #[error("channel {0} is not configured")]
    NotConfigured(String),
    #[error(
        "querying policy of {chaincode} on {channel} failed on every target:\n{}",
        .failures.join("\n")
    )]
    Query {
        channel: String,
        chaincode: String,
        failures: Vec<String>,
    },
    #[error("querying policy of {chaincode} on {channel} timed out")]
    Timeout { channel: String, chaincode: String },
    #[error("invalid policy of {chaincode} on {channel}: {source}")]
    Protocol {
        channel: String,
        chaincode: String,
        source: policy::Error,
    },
    #[error("unable to compile policy of {chaincode} on {channel}: {source}")]
    Compile {
        channel: String,
        chaincode: String,
        source: policy::Error,
    },
    #[error("no peer group satisfies the policies of {chaincodes:?} on {channel}")]
    Resolution {
        channel: String,
        chaincodes: Vec<String>,
    },
}
