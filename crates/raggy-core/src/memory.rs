//! In-memory document store and messaging channel
//!
//! Provides in-process implementations of [`DocumentStore`] and
//! [`MessagingChannel`] for exercising sync and trust logic without real
//! network connections. Every store and channel created from the same
//! [`MemoryNetwork`] can see each other: a ticket minted by one store can be
//! redeemed by any other, and a message published on one channel reaches
//! every other channel.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use raggy_core::{MemoryNetwork, NodeId};
//!
//! let network = MemoryNetwork::new();
//! let store_a = network.store();
//! let store_b = network.store();
//! let channel_a = network.channel(NodeId::from("A"));
//!
//! let doc = store_a.create().await?;
//! let ticket = doc.share(ShareMode::Read).await?;
//! let replica = store_b.import_from_ticket(&ticket).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast};
use tracing::{trace, warn};

use crate::error::TransportError;
use crate::identity::{DocId, NodeId};
use crate::message::GossipMessage;
use crate::ticket::{ShareMode, Ticket};
use crate::traits::{DocHandle, DocRef, DocumentStore, MessagingChannel};

/// Shared content of one document, visible to every handle
#[derive(Debug)]
struct MemoryDocData {
    id: DocId,
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

/// Shared registry of documents and the message hub
#[derive(Clone)]
pub struct MemoryNetwork {
    docs: Arc<DashMap<DocId, Arc<MemoryDocData>>>,
    hub: MemoryChannelHub,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create an empty network
    pub fn new() -> Self {
        Self::with_channel_capacity(1024)
    }

    /// Create an empty network whose channels buffer `capacity` messages
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            docs: Arc::new(DashMap::new()),
            hub: MemoryChannelHub::new(capacity),
        }
    }

    /// Create a document store attached to this network
    pub fn store(&self) -> Arc<MemoryDocumentStore> {
        Arc::new(MemoryDocumentStore {
            network: self.clone(),
            local: DashMap::new(),
        })
    }

    /// Create a messaging channel for `node_id`
    pub fn channel(&self, node_id: NodeId) -> Arc<MemoryChannel> {
        Arc::new(self.hub.channel(node_id))
    }

    /// The message hub shared by this network's channels
    pub fn hub(&self) -> &MemoryChannelHub {
        &self.hub
    }

    /// Number of documents created across every store
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    /// Drop a document from the network, simulating data loss
    ///
    /// Handles that are already open keep working; new redemptions fail.
    pub fn remove_document(&self, id: &DocId) -> bool {
        self.docs.remove(id).is_some()
    }
}

/// A handle to an in-memory document
pub struct MemoryDocHandle {
    data: Arc<MemoryDocData>,
    writable: bool,
}

impl MemoryDocHandle {
    /// Snapshot of every key in the document
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.data.entries.read().keys().cloned().collect()
    }
}

#[async_trait]
impl DocHandle for MemoryDocHandle {
    fn id(&self) -> DocId {
        self.data.id
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    async fn set_bytes(&self, key: &[u8], value: Vec<u8>) -> Result<(), TransportError> {
        if !self.writable {
            return Err(TransportError::ReadOnly(self.data.id.short_hex()));
        }
        self.data.entries.write().insert(key.to_vec(), value);
        Ok(())
    }

    async fn get_bytes(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.data.entries.read().get(key).cloned())
    }

    async fn share(&self, mode: ShareMode) -> Result<Ticket, TransportError> {
        if mode == ShareMode::Write && !self.writable {
            return Err(TransportError::ReadOnly(self.data.id.short_hex()));
        }
        Ok(Ticket::new(self.data.id, mode))
    }
}

/// A node's view of the [`MemoryNetwork`]
///
/// `get` only returns documents this store created or redeemed.
pub struct MemoryDocumentStore {
    network: MemoryNetwork,
    local: DashMap<DocId, DocRef>,
}

impl MemoryDocumentStore {
    /// Number of documents this store holds
    pub fn len(&self) -> usize {
        self.local.len()
    }

    /// Whether this store holds no documents
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    /// Whether this store holds `id`
    pub fn contains(&self, id: &DocId) -> bool {
        self.local.contains_key(id)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self) -> Result<DocRef, TransportError> {
        let id = DocId::generate();
        let data = Arc::new(MemoryDocData {
            id,
            entries: RwLock::new(HashMap::new()),
        });
        self.network.docs.insert(id, data.clone());

        let handle: DocRef = Arc::new(MemoryDocHandle {
            data,
            writable: true,
        });
        self.local.insert(id, handle.clone());
        trace!(doc = %id.short_hex(), "Created document");
        Ok(handle)
    }

    async fn get(&self, id: &DocId) -> Result<Option<DocRef>, TransportError> {
        Ok(self.local.get(id).map(|h| h.value().clone()))
    }

    async fn import_from_ticket(&self, ticket: &Ticket) -> Result<DocRef, TransportError> {
        if let Some(existing) = self.local.get(&ticket.doc_id) {
            if existing.is_writable() || !ticket.is_writable() {
                return Ok(existing.value().clone());
            }
        }

        let data = self
            .network
            .docs
            .get(&ticket.doc_id)
            .map(|d| d.value().clone())
            .ok_or_else(|| TransportError::DocumentNotFound(ticket.doc_id.short_hex()))?;

        let handle: DocRef = Arc::new(MemoryDocHandle {
            data,
            writable: ticket.is_writable(),
        });
        self.local.insert(ticket.doc_id, handle.clone());
        trace!(doc = %ticket.doc_id.short_hex(), mode = %ticket.mode, "Redeemed ticket");
        Ok(handle)
    }
}

/// Broadcast hub connecting in-memory channels
#[derive(Clone)]
pub struct MemoryChannelHub {
    tx: broadcast::Sender<(NodeId, GossipMessage)>,
}

impl MemoryChannelHub {
    /// Create a hub buffering `capacity` messages per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe a new channel for `node_id`
    ///
    /// The channel only receives messages published after it was created.
    pub fn channel(&self, node_id: NodeId) -> MemoryChannel {
        MemoryChannel {
            node_id,
            tx: self.tx.clone(),
            rx: Mutex::new(self.tx.subscribe()),
            offline: AtomicBool::new(false),
        }
    }
}

/// An in-memory [`MessagingChannel`] endpoint
///
/// Never delivers a node's own messages back to it.
pub struct MemoryChannel {
    node_id: NodeId,
    tx: broadcast::Sender<(NodeId, GossipMessage)>,
    rx: Mutex<broadcast::Receiver<(NodeId, GossipMessage)>>,
    offline: AtomicBool,
}

impl MemoryChannel {
    /// The node this endpoint belongs to
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Make every subsequent publish fail (or succeed again)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessagingChannel for MemoryChannel {
    async fn publish(&self, message: GossipMessage) -> Result<(), TransportError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("channel offline".into()));
        }
        // A send with no other subscribers is not a failure
        let _ = self.tx.send((self.node_id.clone(), message));
        Ok(())
    }

    async fn next_message(&self) -> Result<GossipMessage, TransportError> {
        let mut rx = self.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok((sender, _)) if sender == self.node_id => continue,
                Ok((_, message)) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(node = %self.node_id, skipped, "Channel lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(TransportError::ChannelClosed);
                }
            }
        }
    }
}
