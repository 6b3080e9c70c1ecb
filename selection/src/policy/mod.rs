//! Decode endorsement policies and compile them into [Group]s.
//!
//! # Decoding
//!
//! An endorsement policy arrives as the `policy` field of [wire::ChaincodeData], itself an
//! encoded [wire::SignaturePolicyEnvelope]. [EndorsementPolicy::decode] resolves every principal
//! of the envelope to the organization it names, so that compilation only deals with
//! organization identifiers.
//!
//! # Compiling
//!
//! [compile] walks the rule tree of a policy:
//! - `SignedBy(i)` becomes a [Group::Leaf] holding the peers of the organization of identity `i`.
//! - `NOutOf(n, rules)` becomes a [Group::Combinator] requiring `n` of the compiled `rules`.
//!
//! Policies of several chaincodes invoked by the same transaction are combined with [all_of].

use crate::{group::Group, Peer};
use bytes::Bytes;
use prost::Message;
use thiserror::Error;

pub mod wire;
pub use wire::{Classification, MspRoleType as Role};

/// Errors that can occur when decoding or compiling a policy.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to decode: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("policy has no rule")]
    MissingRule,
    #[error("rule node has no type")]
    MissingRuleType,
    #[error("unknown principal classification: {0}")]
    UnknownClassification(i32),
    #[error("unsupported principal classification: {0:?}")]
    UnsupportedClassification(Classification),
    #[error("unknown role: {0}")]
    UnknownRole(i32),
    #[error("identity index {index} out of bounds ({identities} identities)")]
    IdentityOutOfBounds { index: i32, identities: usize },
    #[error("threshold {n} invalid for {rules} rules")]
    InvalidThreshold { n: i32, rules: usize },
}

/// A principal a policy rule can require a signature from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Organization (MSP) of the principal.
    pub msp_id: String,

    /// Role required within the organization, if the principal names one.
    pub role: Option<Role>,
}

impl Principal {
    /// Returns a principal satisfied by any member of `msp_id`.
    pub fn member(msp_id: impl Into<String>) -> Self {
        Self {
            msp_id: msp_id.into(),
            role: Some(Role::Member),
        }
    }

    fn decode(principal: &wire::MspPrincipal) -> Result<Self, Error> {
        let classification = Classification::try_from(principal.principal_classification)
            .map_err(|_| Error::UnknownClassification(principal.principal_classification))?;
        match classification {
            Classification::Role => {
                let role = wire::MspRole::decode(principal.principal.clone())?;
                let kind = Role::try_from(role.role).map_err(|_| Error::UnknownRole(role.role))?;
                Ok(Self {
                    msp_id: role.msp_identifier,
                    role: Some(kind),
                })
            }
            Classification::OrganizationUnit => {
                let unit = wire::OrganizationUnit::decode(principal.principal.clone())?;
                Ok(Self {
                    msp_id: unit.msp_identifier,
                    role: None,
                })
            }
            Classification::Identity => {
                let identity = wire::SerializedIdentity::decode(principal.principal.clone())?;
                Ok(Self {
                    msp_id: identity.mspid,
                    role: None,
                })
            }
            other => Err(Error::UnsupportedClassification(other)),
        }
    }
}

/// A node of a policy tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    /// Satisfied by a signature of the identity at the given index.
    SignedBy(i32),

    /// Satisfied when `n` of `rules` are satisfied.
    NOutOf { n: i32, rules: Vec<Rule> },
}

impl Rule {
    fn decode(rule: wire::SignaturePolicy) -> Result<Self, Error> {
        match rule.r#type.ok_or(Error::MissingRuleType)? {
            wire::signature_policy::Type::SignedBy(index) => Ok(Rule::SignedBy(index)),
            wire::signature_policy::Type::NOutOf(node) => Ok(Rule::NOutOf {
                n: node.n,
                rules: node
                    .rules
                    .into_iter()
                    .map(Rule::decode)
                    .collect::<Result<_, _>>()?,
            }),
        }
    }

    fn encode(&self) -> wire::SignaturePolicy {
        let r#type = match self {
            Rule::SignedBy(index) => wire::signature_policy::Type::SignedBy(*index),
            Rule::NOutOf { n, rules } => {
                wire::signature_policy::Type::NOutOf(wire::signature_policy::NOutOf {
                    n: *n,
                    rules: rules.iter().map(Rule::encode).collect(),
                })
            }
        };
        wire::SignaturePolicy {
            r#type: Some(r#type),
        }
    }
}

/// A decoded endorsement policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndorsementPolicy {
    pub version: i32,
    pub rule: Rule,
    pub identities: Vec<Principal>,
}

impl EndorsementPolicy {
    /// Decodes a policy from an encoded [wire::SignaturePolicyEnvelope].
    pub fn decode(buf: impl bytes::Buf) -> Result<Self, Error> {
        let envelope = wire::SignaturePolicyEnvelope::decode(buf)?;
        let identities = envelope
            .identities
            .iter()
            .map(Principal::decode)
            .collect::<Result<_, _>>()?;
        let rule = Rule::decode(envelope.rule.ok_or(Error::MissingRule)?)?;
        Ok(Self {
            version: envelope.version,
            rule,
            identities,
        })
    }

    /// Decodes the policy carried by an encoded [wire::ChaincodeData].
    pub fn from_chaincode_data(buf: impl bytes::Buf) -> Result<Self, Error> {
        let data = wire::ChaincodeData::decode(buf)?;
        Self::decode(data.policy)
    }

    /// Encodes the policy as a [wire::SignaturePolicyEnvelope].
    ///
    /// Only principals that name a role can be encoded. Others are encoded as members of their
    /// organization.
    pub fn encode(&self) -> Bytes {
        let identities = self
            .identities
            .iter()
            .map(|principal| wire::MspPrincipal {
                principal_classification: Classification::Role as i32,
                principal: wire::MspRole {
                    msp_identifier: principal.msp_id.clone(),
                    role: principal.role.unwrap_or(Role::Member) as i32,
                }
                .encode_to_vec()
                .into(),
            })
            .collect();
        wire::SignaturePolicyEnvelope {
            version: self.version,
            rule: Some(self.rule.encode()),
            identities,
        }
        .encode_to_vec()
        .into()
    }
}

/// Compiles `policy` into a [Group], using `peers_for_org` to find the peers that can sign on
/// behalf of an organization.
pub fn compile<P: Peer>(
    policy: &EndorsementPolicy,
    peers_for_org: impl Fn(&str) -> Vec<P>,
) -> Result<Group<P>, Error> {
    compile_rule(&policy.rule, &policy.identities, &peers_for_org)
}

fn compile_rule<P: Peer>(
    rule: &Rule,
    identities: &[Principal],
    peers_for_org: &impl Fn(&str) -> Vec<P>,
) -> Result<Group<P>, Error> {
    match rule {
        Rule::SignedBy(index) => {
            let principal = usize::try_from(*index)
                .ok()
                .and_then(|i| identities.get(i))
                .ok_or(Error::IdentityOutOfBounds {
                    index: *index,
                    identities: identities.len(),
                })?;
            Ok(Group::Leaf(peers_for_org(&principal.msp_id)))
        }
        Rule::NOutOf { n, rules } => {
            let threshold = usize::try_from(*n)
                .ok()
                .filter(|threshold| *threshold <= rules.len())
                .ok_or(Error::InvalidThreshold {
                    n: *n,
                    rules: rules.len(),
                })?;
            let children = rules
                .iter()
                .map(|rule| compile_rule(rule, identities, peers_for_org))
                .collect::<Result<_, _>>()?;
            Ok(Group::Combinator {
                children,
                threshold,
            })
        }
    }
}

/// Combines groups so that every one of them must be satisfied.
///
/// A single group is returned unchanged.
pub fn all_of<P: Peer>(mut groups: Vec<Group<P>>) -> Group<P> {
    if groups.len() == 1 {
        if let Some(group) = groups.pop() {
            return group;
        }
    }
    let threshold = groups.len();
    Group::Combinator {
        children: groups,
        threshold,
    }
}

/// Helpers to build policies.
pub mod builder {
    use super::{EndorsementPolicy, Principal, Rule};

    /// Returns a rule satisfied by the identity at `index`.
    pub fn signed_by(index: i32) -> Rule {
        Rule::SignedBy(index)
    }

    /// Returns a rule satisfied when `n` of `rules` are satisfied.
    pub fn n_out_of(n: i32, rules: Vec<Rule>) -> Rule {
        Rule::NOutOf { n, rules }
    }

    /// Returns a policy requiring `n` signatures from distinct organizations of `orgs`.
    pub fn n_of_orgs(n: i32, orgs: &[&str]) -> EndorsementPolicy {
        EndorsementPolicy {
            version: 0,
            rule: n_out_of(n, (0..orgs.len() as i32).map(signed_by).collect()),
            identities: orgs.iter().map(|org| Principal::member(*org)).collect(),
        }
    }
}
