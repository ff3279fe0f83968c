//! Messages of the result signing phase

use crate::result::DkgResultHash;
use crate::types::{MemberIndex, SignatureBytes};
use serde::{Deserialize, Serialize};

/// A member's signature over the hash of the result it prefers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DkgResultHashSignatureMessage {
    /// 1-based index of the signing member
    pub sender_index: MemberIndex,
    /// Hash of the result the sender prefers
    pub result_hash: DkgResultHash,
    /// Recoverable ECDSA signature over `result_hash`
    pub signature: SignatureBytes,
    /// SEC1-encoded public key the signature verifies against
    pub public_key: Vec<u8>,
}
