//! Core types shared across the finalization protocol

use crate::result::DkgResultHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 1-based index of a member within its group
pub type MemberIndex = usize;

/// Identifier of one DKG execution, shared by all members and the chain
pub type RequestId = u64;

/// Chain block height
pub type BlockHeight = u64;

/// Raw signature bytes (65-byte recoverable ECDSA: r || s || v)
pub type SignatureBytes = Vec<u8>;

/// Signatures supporting a single result hash, keyed by signer
pub type Signatures = BTreeMap<MemberIndex, SignatureBytes>;

/// Emitted by the chain whenever a result is submitted for a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSubmittedEvent {
    /// Request the result belongs to
    pub request_id: RequestId,
    /// Member that submitted the result
    pub member_index: MemberIndex,
    /// Hash of the submitted result
    pub result_hash: DkgResultHash,
    /// Group public key carried by the result
    pub group_public_key: Vec<u8>,
    /// Block at which the submission was recorded
    pub block_number: BlockHeight,
}

/// Emitted by the chain whenever a member votes on a submitted result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultVoteEvent {
    pub request_id: RequestId,
    pub member_index: MemberIndex,
    pub result_hash: DkgResultHash,
    pub block_number: BlockHeight,
}
