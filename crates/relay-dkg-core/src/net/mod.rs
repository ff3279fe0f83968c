//! Group broadcast channel

use crate::signing::DkgResultHashSignatureMessage;
use crate::subscription::EventSubscription;
use crate::types::MemberIndex;
use crate::Result;
use serde::{Deserialize, Serialize};

pub use ::async_trait::async_trait;

/// Wire tag of result hash signature messages
pub const RESULT_HASH_SIGNATURE_TAG: &str = "dkg/result_hash_signature";

/// Messages exchanged between members of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ProtocolMessage {
    #[serde(rename = "dkg/result_hash_signature")]
    ResultHashSignature(DkgResultHashSignatureMessage),
}

impl ProtocolMessage {
    /// Wire tag identifying the message type
    pub fn tag(&self) -> &'static str {
        match self {
            ProtocolMessage::ResultHashSignature(_) => RESULT_HASH_SIGNATURE_TAG,
        }
    }

    /// Sender of the message
    pub fn sender_index(&self) -> MemberIndex {
        match self {
            ProtocolMessage::ResultHashSignature(message) => message.sender_index,
        }
    }
}

/// Broadcast channel shared by the members of one group
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Name of the channel
    fn name(&self) -> &str;

    /// Accept incoming messages carrying `tag`. Messages of unregistered
    /// types are dropped before they reach any receiver of this handle.
    fn register_unmarshaler(&self, tag: &str) -> Result<()>;

    /// Send a message to every member of the group, the sender included
    async fn send(&self, message: &ProtocolMessage) -> Result<()>;

    /// Receive messages sent after this call
    fn recv(&self) -> Result<EventSubscription<ProtocolMessage>>;
}

/// In-memory broadcast hub
pub mod memory;

pub use memory::{MemoryBroadcastHub, MemoryChannel};
