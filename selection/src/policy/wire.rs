//! Protobuf messages describing chaincode metadata and signature policies.

use bytes::Bytes;

/// Chaincode metadata returned by the `getccdata` query.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChaincodeData {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, tag = "3")]
    pub escc: String,
    #[prost(string, tag = "4")]
    pub vscc: String,
    /// Encoded [SignaturePolicyEnvelope].
    #[prost(bytes = "bytes", tag = "5")]
    pub policy: Bytes,
    #[prost(bytes = "bytes", tag = "6")]
    pub data: Bytes,
    #[prost(bytes = "bytes", tag = "7")]
    pub id: Bytes,
    #[prost(bytes = "bytes", tag = "8")]
    pub instantiation_policy: Bytes,
}

/// A signature policy along with the identities its rules refer to.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignaturePolicyEnvelope {
    #[prost(int32, tag = "1")]
    pub version: i32,
    #[prost(message, optional, tag = "2")]
    pub rule: Option<SignaturePolicy>,
    #[prost(message, repeated, tag = "3")]
    pub identities: Vec<MspPrincipal>,
}

/// A node of a signature policy tree.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignaturePolicy {
    #[prost(oneof = "signature_policy::Type", tags = "1, 2")]
    pub r#type: Option<signature_policy::Type>,
}

pub mod signature_policy {
    /// Satisfied when `n` of `rules` are satisfied.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct NOutOf {
        #[prost(int32, tag = "1")]
        pub n: i32,
        #[prost(message, repeated, tag = "2")]
        pub rules: Vec<super::SignaturePolicy>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Type {
        /// Index into the identities of the envelope.
        #[prost(int32, tag = "1")]
        SignedBy(i32),
        #[prost(message, tag = "2")]
        NOutOf(NOutOf),
    }
}

/// A principal, whose meaning depends on its classification.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MspPrincipal {
    #[prost(enumeration = "Classification", tag = "1")]
    pub principal_classification: i32,
    /// Encoded [MspRole], [OrganizationUnit] or [SerializedIdentity].
    #[prost(bytes = "bytes", tag = "2")]
    pub principal: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Classification {
    Role = 0,
    OrganizationUnit = 1,
    Identity = 2,
    Anonymity = 3,
    Combined = 4,
}

/// A role within an organization.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MspRole {
    #[prost(string, tag = "1")]
    pub msp_identifier: String,
    #[prost(enumeration = "MspRoleType", tag = "2")]
    pub role: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MspRoleType {
    Member = 0,
    Admin = 1,
    Client = 2,
    Peer = 3,
    Orderer = 4,
}

/// An organizational unit within an organization.
#[derive(Clone, PartialEq, prost::Message)]
pub struct OrganizationUnit {
    #[prost(string, tag = "1")]
    pub msp_identifier: String,
    #[prost(string, tag = "2")]
    pub organizational_unit_identifier: String,
    #[prost(bytes = "bytes", tag = "3")]
    pub certifiers_identifier: Bytes,
}

/// A specific identity issued by an organization.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SerializedIdentity {
    #[prost(string, tag = "1")]
    pub mspid: String,
    #[prost(bytes = "bytes", tag = "2")]
    pub id_bytes: Bytes,
}
