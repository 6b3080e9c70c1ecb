use crate::{balancer::LoadBalancePolicy, provider, Peer};

/// Configuration for the [Service](super::Service).
pub struct Config<P: Peer, L: LoadBalancePolicy> {
    /// Configuration of the policy provider of the channel.
    pub provider: provider::Config<P>,

    /// Picks one peer group among those satisfying the policies of a request.
    ///
    /// Shared by every resolver of the service.
    pub balancer: L,
}
