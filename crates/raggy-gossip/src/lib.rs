//! # Raggy Gossip
//!
//! Topic-based gossip transport for the Raggy trust network, built on
//! iroh-gossip.
//!
//! [`GossipChannel`] implements [`raggy_core::MessagingChannel`], so node
//! subsystems publish heartbeats, ticket shares, rail announcements and
//! defederation notices over real networking without knowing about iroh.
//! Every message is signed by the sending endpoint; tampered or malformed
//! payloads are logged and dropped by the receiver.
//!
//! ## Example
//!
//! ```rust,ignore
//! use raggy_gossip::{GossipChannel, GossipConfig, RaggyGossip};
//! use iroh::protocol::Router;
//!
//! let endpoint = iroh::Endpoint::builder().bind().await?;
//! let config = GossipConfig::default().with_bootstrap(peers);
//! let (gossip, channel) = GossipChannel::join(&endpoint, config).await?;
//!
//! let router = Router::builder(endpoint.clone())
//!     .accept(RaggyGossip::alpn(), gossip.gossip().clone())
//!     .spawn();
//!
//! channel.publish(GossipMessage::heartbeat(node_id)).await?;
//! ```

pub mod channel;
pub mod error;
pub mod message;
pub mod node;
pub mod topic;

// Re-exports
pub use channel::GossipChannel;
pub use error::{GossipError, GossipResult};
pub use message::{ReceivedMessage, SignedMessage, WireMessage};
pub use node::{DEFAULT_TOPIC, GossipConfig, RaggyGossip, RaggyGossipBuilder};
pub use topic::{SplitTopic, TopicEvent, TopicHandle, TopicId, TopicReceiver};

// Re-export iroh-gossip ALPN for router registration
pub use iroh_gossip::net::GOSSIP_ALPN;
