//! # Raggy Node
//!
//! A peer in the Raggy trust network.
//!
//! [`RaggyNode`] wires together:
//! - Peer discovery and replication through capability tickets ([`SyncEngine`])
//! - Heartbeats and dead-peer eviction ([`LivenessMonitor`])
//! - The directed trust graph ([`VeracitySystem`])
//! - Trust scores and defederation ([`CooperationEngine`])
//! - Entropy scoring ([`CognitionEngine`]) feeding the replication queue ([`PriorityQueue`])
//! - Modeled realities of entities and rules ([`RealityLayer`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use raggy_core::{MemoryNetwork, NodeId};
//! use raggy_node::{NodeConfig, RaggyNode};
//!
//! let network = MemoryNetwork::new();
//! let alice = RaggyNode::new(
//!     NodeId::from("alice"),
//!     NodeConfig::default(),
//!     network.store(),
//!     network.channel(NodeId::from("alice")),
//! );
//! alice.start().await?;
//!
//! // Hand the ticket to another node out of band, or gossip it
//! let ticket = alice.ticket().await?;
//! alice.share_ticket().await?;
//! ```

mod config;
mod error;
pub mod cognition;
pub mod cooperation;
pub mod liveness;
pub mod peer_state;
pub mod priority;
pub mod reality;
pub mod sync;
pub mod task;
pub mod veracity;

pub use cognition::{CognitionEngine, Thought, ThoughtRecords, connection_entropy};
pub use config::{ConfigUpdate, NodeConfig};
pub use cooperation::{CooperationEngine, Relationship, RelationshipRecords};
pub use error::{JoinError, NodeError, NodeResult};
pub use liveness::{LivenessMonitor, LivenessState};
pub use peer_state::{PeerSnapshot, PeerState};
pub use priority::{DrainReport, PriorityItem, PriorityQueue};
pub use reality::{Attribute, Entity, Reality, RealityLayer, RealityRecords};
pub use sync::{MessageObserver, SyncEngine, SyncMetrics};
pub use task::TaskHandle;
pub use veracity::{Dimension, EdgeWeights, RailUpdate, VeracityRail, VeracitySystem};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use raggy_core::{
    DocRef, DocumentStore, EventBus, GossipMessage, MAIN_READ_KEY, MessagingChannel, NodeId,
    STATE_KEY, ShareMode, Ticket, encode_record,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A Raggy peer
///
/// Construct with [`new`](Self::new), then call [`start`](Self::start)
/// before using any network-facing operation.
pub struct RaggyNode {
    node_id: NodeId,
    /// Distinguishes this session in logs when a node id is reused
    instance_id: Uuid,
    config: NodeConfig,
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn MessagingChannel>,
    events: EventBus,
    peers: Arc<PeerState>,
    sync: Arc<SyncEngine>,
    liveness: Arc<LivenessMonitor>,
    veracity: Arc<VeracitySystem>,
    cooperation: Arc<CooperationEngine>,
    cognition: Arc<CognitionEngine>,
    priority: Arc<PriorityQueue>,
    reality: Arc<RealityLayer>,
    /// State document (None until started)
    state_doc: RwLock<Option<DocRef>>,
    tasks: Mutex<Vec<TaskHandle>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl RaggyNode {
    /// Create a node; nothing runs until [`start`](Self::start)
    pub fn new(
        node_id: NodeId,
        config: NodeConfig,
        store: Arc<dyn DocumentStore>,
        channel: Arc<dyn MessagingChannel>,
    ) -> Self {
        let events =
            EventBus::with_history_limit(config.event_channel_capacity, config.event_history_limit);
        let peers = Arc::new(PeerState::new(node_id.clone()));

        let sync = Arc::new(SyncEngine::new(
            node_id.clone(),
            store.clone(),
            channel.clone(),
            peers.clone(),
            events.clone(),
            config.sync_backoff,
        ));
        let liveness = Arc::new(LivenessMonitor::new(
            node_id.clone(),
            channel.clone(),
            peers.clone(),
            events.clone(),
            config.heartbeat_interval,
            config.liveness_window,
        ));
        let veracity = Arc::new(VeracitySystem::new(
            node_id.clone(),
            store.clone(),
            channel.clone(),
            events.clone(),
        ));
        let cooperation = Arc::new(
            CooperationEngine::new(node_id.clone(), store.clone(), channel.clone(), events.clone())
                .with_limits(config.max_trust_delta, config.graph_trust_step)
                .with_follow_peer_defederation(config.follow_peer_defederation),
        );
        let cognition = Arc::new(CognitionEngine::new(
            node_id.clone(),
            store.clone(),
            events.clone(),
            config.cognition_interval,
        ));
        let priority = Arc::new(PriorityQueue::new(
            node_id.clone(),
            store.clone(),
            events.clone(),
        ));

        let reality = Arc::new(RealityLayer::new(node_id.clone(), store.clone()));

        sync.add_observer(liveness.clone());
        sync.add_observer(veracity.clone());
        sync.add_observer(cooperation.clone());

        let instance_id = Uuid::new_v4();
        info!(node = %node_id, instance = %instance_id, "Node created");

        Self {
            node_id,
            instance_id,
            config,
            store,
            channel,
            events,
            peers,
            sync,
            liveness,
            veracity,
            cooperation,
            cognition,
            priority,
            reality,
            state_doc: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Create documents, start background loops and announce the node
    ///
    /// Loop spans are created inside this span, so they carry the instance id.
    #[instrument(skip(self), fields(node = %self.node_id, instance = %self.instance_id))]
    pub async fn start(&self) -> NodeResult<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(NodeError::LivenessStopped);
        }
        self.config.validate()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        let state_doc = match self.create_documents().await {
            Ok(doc) => doc,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        *self.state_doc.write() = Some(state_doc.clone());

        let mut tasks = vec![self.liveness.start()?, self.sync.start_sync()];
        if self.config.enable_cognition {
            let weights: Arc<dyn EdgeWeights> = self.veracity.clone();
            tasks.push(
                self.cognition
                    .start_thinking(weights, Some(self.priority.clone())),
            );
        }
        if self.config.enable_priority_drain {
            tasks.push(self.priority.start());
        }
        let names: Vec<&'static str> = tasks.iter().map(|t| t.name()).collect();
        self.tasks.lock().extend(tasks);

        let ticket = state_doc.share(ShareMode::Read).await?;
        self.channel
            .publish(GossipMessage::NodeJoin {
                node_id: self.node_id.clone(),
                ticket: Some(ticket.to_string()),
            })
            .await?;

        info!(tasks = ?names, doc = %state_doc.id().short_hex(), "Node started");
        Ok(())
    }

    /// Initialize subsystem documents and write the state document
    async fn create_documents(&self) -> NodeResult<DocRef> {
        let relationships = self.cooperation.initialize().await?;
        let thoughts = self.cognition.initialize().await?;
        let realities = self.reality.initialize().await?;

        let state_doc = self.store.create().await?;
        let snapshot = PeerSnapshot::new(
            self.node_id.clone(),
            vec![relationships.id(), thoughts.id(), realities.id()],
        );
        state_doc
            .set_bytes(STATE_KEY, encode_record(&snapshot)?)
            .await?;

        let relationships_ticket = relationships.share(ShareMode::Read).await?;
        state_doc
            .set_bytes(MAIN_READ_KEY, relationships_ticket.to_string().into_bytes())
            .await?;
        Ok(state_doc)
    }

    /// Stop every background loop
    ///
    /// Liveness cannot be restarted afterwards, so neither can the node.
    #[instrument(skip(self), fields(node = %self.node_id, instance = %self.instance_id))]
    pub async fn stop(&self) -> NodeResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.liveness.stop();
        self.priority.stop();

        let tasks: Vec<TaskHandle> = self.tasks.lock().drain(..).collect();
        let mut first_error = None;
        for task in tasks {
            if let Err(e) = task.stop().await {
                warn!(error = %e, "Task did not stop cleanly");
                first_error.get_or_insert(e);
            }
        }

        info!("Node stopped");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn require_started(&self) -> NodeResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(NodeError::NotInitialized)
        }
    }

    fn state_doc(&self) -> NodeResult<DocRef> {
        self.require_started()?;
        self.state_doc.read().clone().ok_or(NodeError::NotInitialized)
    }

    /// Read ticket for this node's state document
    pub async fn ticket(&self) -> NodeResult<Ticket> {
        Ok(self.state_doc()?.share(ShareMode::Read).await?)
    }

    /// Gossip this node's ticket so peers join it
    pub async fn share_ticket(&self) -> NodeResult<Ticket> {
        let ticket = self.ticket().await?;
        self.channel
            .publish(GossipMessage::TicketShare {
                node_id: self.node_id.clone(),
                ticket: ticket.to_string(),
            })
            .await?;
        Ok(ticket)
    }

    /// Join the network reachable from `ticket`
    pub async fn join_network(&self, ticket: &Ticket) -> NodeResult<SyncMetrics> {
        self.require_started()?;
        Ok(self.sync.join_network(ticket).await?)
    }

    pub async fn create_rail(
        &self,
        target: NodeId,
        dimensions: BTreeMap<Dimension, f64>,
    ) -> NodeResult<VeracityRail> {
        self.require_started()?;
        self.veracity.create_rail(target, dimensions).await
    }

    pub async fn update_rail(
        &self,
        target: &NodeId,
        update: RailUpdate,
    ) -> NodeResult<Option<VeracityRail>> {
        self.require_started()?;
        self.veracity.update_rail(target, update).await
    }

    pub async fn defederate(&self, entity: &NodeId, reason: &str) -> NodeResult<Relationship> {
        self.require_started()?;
        self.cooperation.defederate(entity, reason).await
    }

    /// Credit relationships with the current rail weights
    pub async fn reconcile_trust(&self) -> NodeResult<usize> {
        self.cooperation
            .reconcile_with_graph(&*self.veracity)
            .await
    }

    pub fn id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn peers(&self) -> &Arc<PeerState> {
        &self.peers
    }

    pub fn sync(&self) -> &Arc<SyncEngine> {
        &self.sync
    }

    pub fn liveness(&self) -> &Arc<LivenessMonitor> {
        &self.liveness
    }

    pub fn veracity(&self) -> &Arc<VeracitySystem> {
        &self.veracity
    }

    pub fn cooperation(&self) -> &Arc<CooperationEngine> {
        &self.cooperation
    }

    pub fn cognition(&self) -> &Arc<CognitionEngine> {
        &self.cognition
    }

    pub fn priority(&self) -> &Arc<PriorityQueue> {
        &self.priority
    }

    pub fn reality(&self) -> &Arc<RealityLayer> {
        &self.reality
    }
}
