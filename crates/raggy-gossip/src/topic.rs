//! Per-topic handles for sending and receiving messages

use std::sync::Arc;

use iroh::{EndpointId, SecretKey};
use iroh_gossip::api::{GossipReceiver, GossipSender};
use n0_future::StreamExt;
use raggy_core::GossipMessage;
use tokio::sync::Mutex as TokioMutex;

use crate::error::{GossipError, GossipResult};
use crate::message::{ReceivedMessage, SignedMessage};

/// Identifier of a gossip topic, derived from a human-readable name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicId(pub [u8; 32]);

impl TopicId {
    /// Create a topic ID from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive the topic ID for a named network
    pub fn from_name(name: &str) -> Self {
        Self(*blake3::hash(name.as_bytes()).as_bytes())
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Events received from the gossip network
#[derive(Debug, Clone)]
pub enum TopicEvent {
    /// A new neighbor joined the gossip mesh
    NeighborUp(EndpointId),
    /// A neighbor left the gossip mesh
    NeighborDown(EndpointId),
    /// A verified message from a peer
    Received(ReceivedMessage),
    /// We fell behind and missed some messages
    Lagged,
}

/// Handle for broadcasting on a single gossip topic
#[derive(Clone)]
pub struct TopicHandle {
    topic_id: TopicId,
    sender: Arc<TokioMutex<GossipSender>>,
    secret_key: SecretKey,
}

impl TopicHandle {
    pub(crate) fn new(topic_id: TopicId, sender: GossipSender, secret_key: SecretKey) -> Self {
        Self {
            topic_id,
            sender: Arc::new(TokioMutex::new(sender)),
            secret_key,
        }
    }

    /// Get the topic ID
    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    /// Sign and broadcast a message to all topic subscribers
    pub async fn broadcast(&self, message: &GossipMessage) -> GossipResult<()> {
        let signed = SignedMessage::sign_and_encode(&self.secret_key, message)?;

        self.sender
            .lock()
            .await
            .broadcast(signed.into())
            .await
            .map_err(|e| GossipError::BroadcastFailed(e.to_string()))
    }
}

/// Receiver for events from a gossip topic
pub struct TopicReceiver {
    receiver: GossipReceiver,
}

impl TopicReceiver {
    pub(crate) fn new(receiver: GossipReceiver) -> Self {
        Self { receiver }
    }

    /// Receive the next event from the topic
    ///
    /// Messages that fail verification are logged and skipped. Returns
    /// `None` when the topic is closed.
    pub async fn recv(&mut self) -> Option<GossipResult<TopicEvent>> {
        use iroh_gossip::api::Event as GE;

        loop {
            match self.receiver.try_next().await {
                Ok(Some(GE::NeighborUp(id))) => return Some(Ok(TopicEvent::NeighborUp(id))),
                Ok(Some(GE::NeighborDown(id))) => return Some(Ok(TopicEvent::NeighborDown(id))),
                Ok(Some(GE::Lagged)) => return Some(Ok(TopicEvent::Lagged)),
                Ok(Some(GE::Received(msg))) => {
                    match SignedMessage::verify_and_decode(&msg.content) {
                        Ok(received) => return Some(Ok(TopicEvent::Received(received))),
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping invalid gossip message");
                            continue;
                        }
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some(Err(GossipError::Other(e.to_string()))),
            }
        }
    }

    /// Check if we've joined the gossip mesh
    pub fn is_joined(&self) -> bool {
        self.receiver.is_joined()
    }
}

/// A split topic with separate sender and receiver
pub struct SplitTopic {
    /// Handle for sending messages
    pub sender: TopicHandle,
    /// Receiver for incoming messages
    pub receiver: TopicReceiver,
}
