//! Collaborator traits
//!
//! Node subsystems never talk to a concrete document product or transport.
//! They hold these trait objects, which lets the same logic run against
//! the in-memory implementations in [`crate::memory`] and against real
//! gossip networking.
//!
//! ## Key Traits
//!
//! - [`DocumentStore`]: creates, looks up, and redeems tickets for documents
//! - [`DocHandle`]: byte-level access to a single replicated document
//! - [`MessagingChannel`]: best-effort pub/sub for [`GossipMessage`]s

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::identity::DocId;
use crate::message::GossipMessage;
use crate::ticket::{ShareMode, Ticket};

/// Shared handle to an open document
pub type DocRef = Arc<dyn DocHandle>;

/// Access to one replicated key/value document
///
/// Replication between handles of the same document is last-writer-wins
/// per key.
#[async_trait]
pub trait DocHandle: Send + Sync {
    /// The document's identifier
    fn id(&self) -> DocId;

    /// Whether this handle may write
    fn is_writable(&self) -> bool;

    /// Store `value` under `key`
    ///
    /// Fails with [`TransportError::ReadOnly`] on a handle redeemed from a
    /// read ticket.
    async fn set_bytes(&self, key: &[u8], value: Vec<u8>) -> Result<(), TransportError>;

    /// Read the value stored under `key`
    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TransportError>;

    /// Mint a ticket another node can redeem to join this document
    async fn share(&self, mode: ShareMode) -> Result<Ticket, TransportError>;
}

/// Content-addressed store of replicable documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a new, empty, writable document
    async fn create(&self) -> Result<DocRef, TransportError>;

    /// Open a document this store already holds
    async fn get(&self, id: &DocId) -> Result<Option<DocRef>, TransportError>;

    /// Redeem a ticket, replicating the document into this store
    async fn import_from_ticket(&self, ticket: &Ticket) -> Result<DocRef, TransportError>;
}

/// Publish/subscribe transport for small structured messages
///
/// Delivery is best effort with no ordering guarantee across senders.
#[async_trait]
pub trait MessagingChannel: Send + Sync {
    /// Publish a message to every other subscriber
    async fn publish(&self, message: GossipMessage) -> Result<(), TransportError>;

    /// Wait for the next message from another node
    async fn next_message(&self) -> Result<GossipMessage, TransportError>;
}
