//! [`MessagingChannel`] backed by a gossip topic

use async_trait::async_trait;
use iroh::{Endpoint, PublicKey};
use raggy_core::{GossipMessage, MessagingChannel, TransportError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::GossipResult;
use crate::node::{GossipConfig, RaggyGossip};
use crate::topic::{SplitTopic, TopicEvent, TopicHandle, TopicReceiver};

/// A node's endpoint on a gossip topic
pub struct GossipChannel {
    sender: TopicHandle,
    receiver: Mutex<TopicReceiver>,
    local_key: PublicKey,
}

impl GossipChannel {
    /// Wrap an already subscribed topic
    pub fn new(split: SplitTopic, local_key: PublicKey) -> Self {
        Self {
            sender: split.sender,
            receiver: Mutex::new(split.receiver),
            local_key,
        }
    }

    /// Spawn gossip on `endpoint` and subscribe to the configured topic
    ///
    /// The caller still has to register [`RaggyGossip::gossip`] with the
    /// endpoint's router so peers can reach it.
    pub async fn join(endpoint: &Endpoint, config: GossipConfig) -> GossipResult<(RaggyGossip, Self)> {
        let mut builder = crate::node::RaggyGossipBuilder::new();
        if let Some(key) = config.secret_key.clone() {
            builder = builder.secret_key(key);
        }
        let gossip = builder.build(endpoint);
        let split = gossip
            .subscribe(config.topic_id(), config.bootstrap.clone())
            .await?;
        let channel = Self::new(split, gossip.endpoint_id());
        Ok((gossip, channel))
    }
}

#[async_trait]
impl MessagingChannel for GossipChannel {
    async fn publish(&self, message: GossipMessage) -> Result<(), TransportError> {
        self.sender.broadcast(&message).await.map_err(Into::into)
    }

    async fn next_message(&self) -> Result<GossipMessage, TransportError> {
        let mut receiver = self.receiver.lock().await;
        loop {
            match receiver.recv().await {
                Some(Ok(TopicEvent::Received(received))) => {
                    if received.from == self.local_key {
                        continue;
                    }
                    return Ok(received.message);
                }
                Some(Ok(TopicEvent::NeighborUp(id))) => {
                    debug!(neighbor = %id.fmt_short(), "Gossip neighbor up");
                }
                Some(Ok(TopicEvent::NeighborDown(id))) => {
                    debug!(neighbor = %id.fmt_short(), "Gossip neighbor down");
                }
                Some(Ok(TopicEvent::Lagged)) => {
                    warn!("Gossip receiver lagged, messages dropped");
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::ChannelClosed),
            }
        }
    }
}
