//! Main gossip node wrapper around iroh-gossip

use dashmap::DashMap;
use iroh::{Endpoint, EndpointId, SecretKey};
use iroh_gossip::net::{GOSSIP_ALPN, Gossip};

use crate::error::{GossipError, GossipResult};
use crate::topic::{SplitTopic, TopicHandle, TopicId, TopicReceiver};

/// Default topic every node subscribes to
pub const DEFAULT_TOPIC: &str = "raggy/main";

/// Configuration for joining a gossip network
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Name of the topic, hashed into a [`TopicId`]
    pub topic: String,
    /// Endpoints to contact when joining the topic
    pub bootstrap: Vec<EndpointId>,
    /// Signing key; generated when absent
    pub secret_key: Option<SecretKey>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            bootstrap: Vec::new(),
            secret_key: None,
        }
    }
}

impl GossipConfig {
    /// Set the topic name
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the bootstrap endpoints
    pub fn with_bootstrap(mut self, bootstrap: Vec<EndpointId>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Set the signing key
    pub fn with_secret_key(mut self, key: SecretKey) -> Self {
        self.secret_key = Some(key);
        self
    }

    /// The topic ID derived from the topic name
    pub fn topic_id(&self) -> TopicId {
        TopicId::from_name(&self.topic)
    }
}

/// Gossip node that manages subscriptions to topics
pub struct RaggyGossip {
    gossip: Gossip,
    secret_key: SecretKey,
    topics: DashMap<TopicId, TopicHandle>,
    endpoint_id: EndpointId,
}

impl RaggyGossip {
    /// Create a new gossip node
    ///
    /// This spawns the gossip protocol handler on the endpoint.
    pub fn new(endpoint: &Endpoint, secret_key: SecretKey) -> Self {
        let gossip = Gossip::builder().spawn(endpoint.clone());
        let endpoint_id = endpoint.id();

        Self {
            gossip,
            secret_key,
            topics: DashMap::new(),
            endpoint_id,
        }
    }

    /// Get the underlying Gossip instance for router registration
    ///
    /// Use this with `Router::builder().accept(GOSSIP_ALPN, gossip.gossip())`
    pub fn gossip(&self) -> &Gossip {
        &self.gossip
    }

    /// Get the ALPN protocol identifier for gossip
    pub fn alpn() -> &'static [u8] {
        GOSSIP_ALPN
    }

    /// Get our endpoint ID
    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint_id
    }

    /// Subscribe to a topic
    ///
    /// Returns a split topic with separate sender and receiver handles.
    pub async fn subscribe(
        &self,
        topic_id: TopicId,
        bootstrap: Vec<EndpointId>,
    ) -> GossipResult<SplitTopic> {
        if self.topics.contains_key(&topic_id) {
            return Err(GossipError::AlreadySubscribed);
        }

        let gossip_topic = self
            .gossip
            .subscribe(topic_id.0.into(), bootstrap)
            .await
            .map_err(|e| GossipError::SubscribeFailed(e.to_string()))?;

        let (sender, receiver) = gossip_topic.split();

        let handle = TopicHandle::new(topic_id, sender, self.secret_key.clone());
        self.topics.insert(topic_id, handle.clone());

        tracing::debug!(endpoint = %self.endpoint_id.fmt_short(), "Subscribed to gossip topic");

        Ok(SplitTopic {
            sender: handle,
            receiver: TopicReceiver::new(receiver),
        })
    }

    /// Forget a topic; the subscription closes once its handles are dropped
    pub fn unsubscribe(&self, topic_id: TopicId) {
        self.topics.remove(&topic_id);
    }

    /// Check if subscribed to a topic
    pub fn is_subscribed(&self, topic_id: TopicId) -> bool {
        self.topics.contains_key(&topic_id)
    }
}

/// Builder for creating a RaggyGossip instance
#[derive(Default)]
pub struct RaggyGossipBuilder {
    secret_key: Option<SecretKey>,
}

impl RaggyGossipBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the secret key for signing messages
    pub fn secret_key(mut self, key: SecretKey) -> Self {
        self.secret_key = Some(key);
        self
    }

    /// Build the gossip node
    pub fn build(self, endpoint: &Endpoint) -> RaggyGossip {
        let secret_key = self
            .secret_key
            .unwrap_or_else(|| SecretKey::generate(&mut rand::rng()));
        RaggyGossip::new(endpoint, secret_key)
    }
}
