//! In-memory broadcast implementation for testing

use super::{async_trait, BroadcastChannel, ProtocolMessage};
use crate::subscription::EventSubscription;
use crate::{Error, Result};
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{trace, warn};

struct Receiver {
    unmarshalers: Arc<DashSet<String>>,
    sender: mpsc::UnboundedSender<ProtocolMessage>,
}

#[derive(Default)]
struct ChannelState {
    receivers: DashMap<u64, Receiver>,
    next_receiver_id: AtomicU64,
}

/// Process-local broadcast hub handing out named channels.
///
/// Every handle of the same name shares one message fan-out. Messages are
/// JSON-encoded on send and decoded per receiving handle, only if that handle
/// registered the message type.
#[derive(Default)]
pub struct MemoryBroadcastHub {
    channels: DashMap<String, Arc<ChannelState>>,
}

impl MemoryBroadcastHub {
    /// Create a new hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a handle on the named channel
    pub fn channel(&self, name: &str) -> Arc<MemoryChannel> {
        let state = self
            .channels
            .entry(name.to_string())
            .or_default()
            .value()
            .clone();

        Arc::new(MemoryChannel {
            name: name.to_string(),
            state,
            unmarshalers: Arc::new(DashSet::new()),
        })
    }
}

/// One member's handle on a hub channel
pub struct MemoryChannel {
    name: String,
    state: Arc<ChannelState>,
    unmarshalers: Arc<DashSet<String>>,
}

impl MemoryChannel {
    /// Active receivers across all handles of this channel
    pub fn receiver_count(&self) -> usize {
        self.state.receivers.len()
    }
}

fn serialize(message: &ProtocolMessage) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| Error::Serialization(e.to_string()))
}

fn deserialize(bytes: &[u8]) -> Result<ProtocolMessage> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

#[async_trait]
impl BroadcastChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn register_unmarshaler(&self, tag: &str) -> Result<()> {
        if tag.is_empty() {
            return Err(Error::Broadcast("empty message type".into()));
        }
        self.unmarshalers.insert(tag.to_string());
        Ok(())
    }

    async fn send(&self, message: &ProtocolMessage) -> Result<()> {
        let tag = message.tag();
        let bytes = serialize(message)?;

        for receiver in self.state.receivers.iter() {
            if !receiver.unmarshalers.contains(tag) {
                trace!(channel = %self.name, tag, "No unmarshaler registered, dropping");
                continue;
            }
            match deserialize(&bytes) {
                Ok(decoded) => {
                    let _ = receiver.sender.send(decoded);
                }
                Err(e) => warn!(channel = %self.name, tag, error = %e, "Dropping undecodable message"),
            }
        }
        Ok(())
    }

    fn recv(&self) -> Result<EventSubscription<ProtocolMessage>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver_id = self.state.next_receiver_id.fetch_add(1, Ordering::Relaxed);
        self.state.receivers.insert(
            receiver_id,
            Receiver {
                unmarshalers: self.unmarshalers.clone(),
                sender,
            },
        );

        let state = self.state.clone();
        Ok(EventSubscription::new(receiver, move || {
            state.receivers.remove(&receiver_id);
        }))
    }
}
