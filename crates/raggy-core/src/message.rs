//! Gossip message schema
//!
//! Every message a node publishes on the [`MessagingChannel`](crate::MessagingChannel)
//! is one of these variants. Tickets travel in their text form so a message
//! stays readable in logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::identity::NodeId;

/// Structured messages exchanged between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Periodic liveness signal
    Heartbeat {
        node_id: NodeId,
        timestamp: DateTime<Utc>,
    },

    /// Invitation to replicate the sender's state document
    TicketShare { node_id: NodeId, ticket: String },

    /// A rail was created; the target may redeem the write ticket to co-own it
    RailCreated {
        source_id: NodeId,
        target_id: NodeId,
        ticket: String,
    },

    /// The issuer zeroed its trust in an entity
    Defederation {
        issuer: NodeId,
        entity_id: NodeId,
        reason: String,
    },

    /// A node started and announces itself
    NodeJoin {
        node_id: NodeId,
        ticket: Option<String>,
    },
}

impl GossipMessage {
    /// Create a heartbeat stamped with the current time
    pub fn heartbeat(node_id: NodeId) -> Self {
        Self::Heartbeat {
            node_id,
            timestamp: Utc::now(),
        }
    }

    /// The message type name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::TicketShare { .. } => "ticket_share",
            Self::RailCreated { .. } => "rail_created",
            Self::Defederation { .. } => "defederation",
            Self::NodeJoin { .. } => "node_join",
        }
    }

    /// The node that originated this message
    pub fn origin(&self) -> &NodeId {
        match self {
            Self::Heartbeat { node_id, .. } => node_id,
            Self::TicketShare { node_id, .. } => node_id,
            Self::RailCreated { source_id, .. } => source_id,
            Self::Defederation { issuer, .. } => issuer,
            Self::NodeJoin { node_id, .. } => node_id,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        postcard::to_allocvec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}
