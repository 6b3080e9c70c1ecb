//! Mock implementations for testing.

use crate::{
    balancer::LoadBalancePolicy,
    group::PeerGroup,
    policy::{wire, EndorsementPolicy},
    provider::{self, Invocation, Response},
    Error,
};
use bytes::Bytes;
use prost::Message;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

/// A mock [crate::Peer].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Peer {
    url: String,
    msp_id: String,
}

impl Peer {
    /// Create a new [Peer] of organization `msp_id`.
    pub fn new(url: &str, msp_id: &str) -> Self {
        Self {
            url: url.to_string(),
            msp_id: msp_id.to_string(),
        }
    }
}

impl crate::Peer for Peer {
    fn url(&self) -> &str {
        &self.url
    }

    fn msp_id(&self) -> &str {
        &self.msp_id
    }
}

/// A [LoadBalancePolicy] that always picks the first candidate.
#[derive(Clone, Copy, Debug, Default)]
pub struct First;

impl LoadBalancePolicy for First {
    fn choose<'a, P: crate::Peer>(&self, candidates: &'a [PeerGroup<P>]) -> &'a PeerGroup<P> {
        &candidates[0]
    }
}

/// How a target of the mock [Dispatcher] answers.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Answer with the metadata of the requested chaincode, if known.
    Serve,
    /// Answer with the given status and message.
    Status(i32, String),
    /// Fail to deliver the invocation.
    Fail(String),
    /// Answer successfully with a payload that is not chaincode metadata.
    Garbage,
    /// Never answer.
    Hang,
}

/// A mock [provider::Dispatcher] serving chaincode metadata from memory.
#[derive(Clone)]
pub struct Dispatcher {
    configured: bool,
    policies: Arc<Mutex<HashMap<String, EndorsementPolicy>>>,
    behaviors: Arc<Mutex<HashMap<String, Behavior>>>,
    requests: Arc<Mutex<Vec<(String, Invocation)>>>,
}

impl Dispatcher {
    /// Create a new [Dispatcher] that can sign proposals on any channel.
    pub fn new() -> Self {
        Self {
            configured: true,
            policies: Arc::default(),
            behaviors: Arc::default(),
            requests: Arc::default(),
        }
    }

    /// Create a new [Dispatcher] with no signing identity.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Serve `policy` as the endorsement policy of `chaincode`.
    pub fn add_policy(&self, chaincode: &str, policy: EndorsementPolicy) {
        self.policies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chaincode.to_string(), policy);
    }

    /// Configure how the target at `url` answers. Targets default to [Behavior::Serve].
    pub fn set_behavior(&self, url: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), behavior);
    }

    /// Returns every invocation received so far, along with the URL of its target.
    pub fn requests(&self) -> Vec<(String, Invocation)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of invocations received so far.
    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn chaincode_data(&self, invocation: &Invocation) -> Option<Bytes> {
        let chaincode = invocation.args.get(1)?;
        let chaincode = std::str::from_utf8(chaincode).ok()?;
        let policies = self.policies.lock().unwrap_or_else(PoisonError::into_inner);
        let policy = policies.get(chaincode)?;
        let data = wire::ChaincodeData {
            name: chaincode.to_string(),
            version: "1.0".to_string(),
            escc: "escc".to_string(),
            vscc: "vscc".to_string(),
            policy: policy.encode(),
            ..Default::default()
        };
        Some(data.encode_to_vec().into())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl provider::Dispatcher for Dispatcher {
    type Peer = Peer;
    type Error = String;

    fn is_configured(&self, _: &str) -> bool {
        self.configured
    }

    async fn send(&self, target: &Peer, invocation: Invocation) -> Result<Response, String> {
        let behavior = {
            self.requests
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((target.url.clone(), invocation.clone()));
            self.behaviors
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&target.url)
                .cloned()
                .unwrap_or(Behavior::Serve)
        };
        match behavior {
            Behavior::Serve => match self.chaincode_data(&invocation) {
                Some(payload) => Ok(Response {
                    status: 200,
                    message: String::new(),
                    payload,
                }),
                None => Ok(Response {
                    status: 500,
                    message: "chaincode not found".to_string(),
                    payload: Bytes::new(),
                }),
            },
            Behavior::Status(status, message) => Ok(Response {
                status,
                message,
                payload: Bytes::new(),
            }),
            Behavior::Fail(reason) => Err(reason),
            Behavior::Garbage => Ok(Response {
                status: 200,
                message: String::new(),
                payload: Bytes::from_static(b"\xff\xff\xff"),
            }),
            Behavior::Hang => futures::future::pending().await,
        }
    }
}

/// A mock [provider::PolicyProvider] serving policies from memory and counting requests.
#[derive(Clone)]
pub struct Provider {
    channel: String,
    policies: Arc<Mutex<HashMap<String, Arc<EndorsementPolicy>>>>,
    requests: Arc<Mutex<HashMap<String, usize>>>,
    invalidations: Arc<AtomicUsize>,
}

impl Provider {
    /// Create a new [Provider] for `channel`.
    pub fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            policies: Arc::default(),
            requests: Arc::default(),
            invalidations: Arc::default(),
        }
    }

    /// Serve `policy` as the endorsement policy of `chaincode`.
    pub fn add_policy(&self, chaincode: &str, policy: EndorsementPolicy) {
        self.policies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chaincode.to_string(), Arc::new(policy));
    }

    /// Returns the number of times the policy of `chaincode` was requested.
    pub fn requests(&self, chaincode: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chaincode)
            .copied()
            .unwrap_or_default()
    }

    /// Returns the number of invalidations received.
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }
}

impl provider::PolicyProvider for Provider {
    fn channel(&self) -> &str {
        &self.channel
    }

    async fn policy(&self, chaincode: &str) -> Result<Arc<EndorsementPolicy>, Error> {
        *self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chaincode.to_string())
            .or_default() += 1;
        let policy = self
            .policies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chaincode)
            .cloned();
        policy.ok_or_else(|| Error::Query {
            channel: self.channel.clone(),
            chaincode: chaincode.to_string(),
            failures: vec!["mock: chaincode not found".to_string()],
        })
    }

    async fn invalidate(&self, chaincode: &str) -> bool {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        self.policies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(chaincode)
    }
}

/// Installs a subscriber printing events emitted during a test (shown only on failure).
#[cfg(test)]
pub fn traced() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
