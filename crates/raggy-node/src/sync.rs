//! Peer discovery and document replication
//!
//! The sync engine is the only consumer of the node's messaging channel.
//! Ticket shares trigger a join; every other message is handed to the
//! registered [`MessageObserver`]s.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use raggy_core::{
    CodecError, DocId, DocumentStore, EventBus, GossipMessage, MessagingChannel, NodeId,
    STATE_KEY, TICKET_KEYS, Ticket, decode_record, names,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JoinError, NodeError, NodeResult};
use crate::peer_state::{PeerSnapshot, PeerState};
use crate::task::TaskHandle;

/// A subsystem that reacts to non-ticket gossip messages
#[async_trait]
pub trait MessageObserver: Send + Sync {
    /// Handle one inbound message; messages of no interest return `Ok(())`
    async fn observe(&self, message: &GossipMessage) -> NodeResult<()>;
}

/// Observability record for one join operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub bytes_synced: u64,
    pub docs_synced: usize,
}

impl SyncMetrics {
    fn begin() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            bytes_synced: 0,
            docs_synced: 0,
        }
    }
}

/// Discovers peers through tickets and replicates their state
pub struct SyncEngine {
    node_id: NodeId,
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn MessagingChannel>,
    peers: Arc<PeerState>,
    events: EventBus,
    observers: RwLock<Vec<Arc<dyn MessageObserver>>>,
    metrics: DashMap<DocId, SyncMetrics>,
    backoff: Duration,
}

impl SyncEngine {
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn DocumentStore>,
        channel: Arc<dyn MessagingChannel>,
        peers: Arc<PeerState>,
        events: EventBus,
        backoff: Duration,
    ) -> Self {
        Self {
            node_id,
            store,
            channel,
            peers,
            events,
            observers: RwLock::new(Vec::new()),
            metrics: DashMap::new(),
            backoff,
        }
    }

    /// Route non-ticket messages to `observer` as well
    pub fn add_observer(&self, observer: Arc<dyn MessageObserver>) {
        self.observers.write().push(observer);
    }

    /// Metrics of the last join through a ticket for `doc_id`
    pub fn metrics(&self, doc_id: &DocId) -> Option<SyncMetrics> {
        self.metrics.get(doc_id).map(|m| m.clone())
    }

    /// Redeem a bootstrap ticket and replicate everything it leads to
    ///
    /// Emits `node_joined` on success and `join_error` on failure.
    pub async fn join_network(&self, ticket: &Ticket) -> Result<SyncMetrics, JoinError> {
        let clock = Instant::now();
        let mut metrics = SyncMetrics::begin();

        match self.replicate(ticket, &mut metrics).await {
            Ok(()) => {
                metrics.finished_at = Some(Utc::now());
                let sync_time = clock.elapsed().as_secs_f64();
                self.metrics.insert(ticket.doc_id, metrics.clone());

                info!(
                    doc = %ticket.doc_id.short_hex(),
                    docs = metrics.docs_synced,
                    bytes = metrics.bytes_synced,
                    "Joined network"
                );
                self.events
                    .emit(
                        names::NODE_JOINED,
                        json!({
                            "sync_time": sync_time,
                            "docs_synced": metrics.docs_synced,
                            "bytes_synced": metrics.bytes_synced,
                        }),
                        &self.node_id,
                    )
                    .await;
                Ok(metrics)
            }
            Err(e) => {
                self.metrics.insert(ticket.doc_id, metrics);
                warn!(doc = %ticket.doc_id.short_hex(), error = %e, "Join failed");
                self.events
                    .emit(
                        names::JOIN_ERROR,
                        json!({ "error": e.to_string() }),
                        &self.node_id,
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Walk the ticket graph breadth-first, visiting each document once
    async fn replicate(&self, root: &Ticket, metrics: &mut SyncMetrics) -> Result<(), JoinError> {
        let mut pending = VecDeque::from([*root]);
        let mut visited: HashSet<DocId> = HashSet::new();

        while let Some(ticket) = pending.pop_front() {
            if !visited.insert(ticket.doc_id) {
                continue;
            }

            let doc = self
                .store
                .import_from_ticket(&ticket)
                .await
                .map_err(JoinError::Redeem)?;
            metrics.docs_synced += 1;

            if let Some(bytes) = doc.get_bytes(STATE_KEY).await.map_err(JoinError::Read)? {
                metrics.bytes_synced += bytes.len() as u64;
                let snapshot: PeerSnapshot = decode_record(&bytes).map_err(JoinError::State)?;
                let peer = snapshot.node_id.clone();
                if self.peers.merge(snapshot) {
                    debug!(peer = %peer.short_id(), "Discovered peer");
                }
            }

            for key in TICKET_KEYS {
                let Some(bytes) = doc.get_bytes(key).await.map_err(JoinError::Read)? else {
                    continue;
                };
                metrics.bytes_synced += bytes.len() as u64;
                let text = std::str::from_utf8(&bytes)
                    .map_err(|e| JoinError::InvalidTicket(CodecError::Decode(e.to_string())))?;
                let embedded = Ticket::parse(text).map_err(JoinError::InvalidTicket)?;
                if !visited.contains(&embedded.doc_id) {
                    pending.push_back(embedded);
                }
            }
        }

        Ok(())
    }

    /// Handle one inbound message
    pub async fn dispatch(&self, message: GossipMessage) -> NodeResult<()> {
        if let GossipMessage::TicketShare { node_id, ticket } = &message {
            if node_id == &self.node_id {
                return Ok(());
            }
            let ticket = Ticket::parse(ticket)?;
            self.join_network(&ticket).await?;
            return Ok(());
        }

        let observers: Vec<Arc<dyn MessageObserver>> = self.observers.read().clone();
        let mut first_error = None;
        for observer in observers {
            if let Err(e) = observer.observe(&message).await {
                warn!(kind = message.kind(), error = %e, "Observer failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Spawn the receive loop
    ///
    /// Failures are reported as `sync_error` and followed by one backoff
    /// interval; the loop only ends on cancellation.
    pub fn start_sync(self: &Arc<Self>) -> TaskHandle {
        let engine = Arc::clone(self);
        let span = raggy_logging::node_span(&self.node_id, "sync");
        TaskHandle::spawn("sync", span, move |token| async move {
            engine.run(token).await;
        })
    }

    async fn run(&self, token: CancellationToken) {
        info!("Sync loop started");

        loop {
            let received = tokio::select! {
                _ = token.cancelled() => break,
                received = self.channel.next_message() => received,
            };

            let outcome = match received {
                Ok(message) => self.dispatch(message).await,
                Err(e) => Err(NodeError::from(e)),
            };

            if let Err(e) = outcome {
                self.report(&e).await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.backoff) => {}
                }
            }
        }

        info!("Sync loop stopped");
    }

    async fn report(&self, error: &NodeError) {
        warn!(error = %error, "Sync iteration failed");
        self.events
            .emit(
                names::SYNC_ERROR,
                json!({ "error": error.to_string() }),
                &self.node_id,
            )
            .await;
    }
}
