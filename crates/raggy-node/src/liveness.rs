//! Heartbeat publication and dead-peer eviction

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use raggy_core::{EventBus, GossipMessage, MessagingChannel, NodeId, names};
use serde_json::json;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::peer_state::PeerState;
use crate::sync::MessageObserver;
use crate::task::TaskHandle;

/// Lifecycle of a [`LivenessMonitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    Idle,
    Alive,
    /// Terminal
    Stopped,
}

/// Publishes heartbeats and evicts peers that stop sending them
pub struct LivenessMonitor {
    node_id: NodeId,
    channel: Arc<dyn MessagingChannel>,
    peers: Arc<PeerState>,
    events: EventBus,
    heartbeat_interval: Duration,
    window: Duration,
    state: Mutex<LivenessState>,
    token: CancellationToken,
}

impl LivenessMonitor {
    pub fn new(
        node_id: NodeId,
        channel: Arc<dyn MessagingChannel>,
        peers: Arc<PeerState>,
        events: EventBus,
        heartbeat_interval: Duration,
        window: Duration,
    ) -> Self {
        Self {
            node_id,
            channel,
            peers,
            events,
            heartbeat_interval,
            window,
            state: Mutex::new(LivenessState::Idle),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> LivenessState {
        *self.state.lock()
    }

    /// Start heartbeating and sweeping
    pub fn start(self: &Arc<Self>) -> NodeResult<TaskHandle> {
        {
            let mut state = self.state.lock();
            match *state {
                LivenessState::Stopped => return Err(NodeError::LivenessStopped),
                LivenessState::Alive => return Err(NodeError::AlreadyStarted),
                LivenessState::Idle => *state = LivenessState::Alive,
            }
        }

        let monitor = Arc::clone(self);
        let span = raggy_logging::node_span(&self.node_id, "liveness");
        Ok(TaskHandle::spawn_with_token(
            "liveness",
            span,
            self.token.clone(),
            move |token| async move { monitor.run(token).await },
        ))
    }

    /// Stop for good; a later `start` fails
    pub fn stop(&self) {
        *self.state.lock() = LivenessState::Stopped;
        self.token.cancel();
    }

    async fn run(&self, token: CancellationToken) {
        info!(
            interval_ms = self.heartbeat_interval.as_millis() as u64,
            window_ms = self.window.as_millis() as u64,
            "Liveness monitor started"
        );

        let mut interval = tokio::time::interval(self.heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    self.beat().await;
                    self.sweep().await;
                }
            }
        }

        info!("Liveness monitor stopped");
    }

    /// Publish one heartbeat; failures are reported and swallowed
    pub async fn beat(&self) {
        let heartbeat = GossipMessage::heartbeat(self.node_id.clone());
        if let Err(e) = self.channel.publish(heartbeat).await {
            warn!(error = %e, "Heartbeat publish failed");
            self.events
                .emit(
                    names::HEARTBEAT_ERROR,
                    json!({ "error": e.to_string() }),
                    &self.node_id,
                )
                .await;
        }
    }

    /// Evict every peer silent for longer than the window
    ///
    /// Returns the evicted identities.
    pub async fn sweep(&self) -> Vec<NodeId> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        for peer in self.peers.expired(self.window, now) {
            if self.peers.remove_if_stale(&peer, self.window, now) {
                self.announce_death(&peer).await;
                evicted.push(peer);
            }
        }

        evicted
    }

    /// Remove a peer declared dead; returns false if it was already gone
    pub async fn handle_node_death(&self, peer: &NodeId) -> bool {
        if self.peers.remove(peer).is_none() {
            return false;
        }
        self.announce_death(peer).await;
        true
    }

    async fn announce_death(&self, peer: &NodeId) {
        info!(peer = %peer.short_id(), "Peer declared dead");
        self.events
            .emit(
                names::NODE_DEATH,
                json!({ "node_id": peer.as_str() }),
                &self.node_id,
            )
            .await;
    }
}

#[async_trait]
impl MessageObserver for LivenessMonitor {
    async fn observe(&self, message: &GossipMessage) -> NodeResult<()> {
        let (peer, last_seen) = match message {
            GossipMessage::Heartbeat { node_id, timestamp } => (node_id, *timestamp),
            GossipMessage::NodeJoin { node_id, .. } => (node_id, Utc::now()),
            _ => return Ok(()),
        };

        if !self.peers.touch(peer, last_seen) {
            debug!(peer = %peer.short_id(), kind = message.kind(), "Ignoring liveness from unknown peer");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use raggy_core::MemoryNetwork;

    use super::*;
    use crate::peer_state::PeerSnapshot;

    fn monitor(network: &MemoryNetwork) -> (Arc<LivenessMonitor>, Arc<raggy_core::MemoryChannel>) {
        let id = NodeId::from("A");
        let channel = network.channel(id.clone());
        let monitor = Arc::new(LivenessMonitor::new(
            id.clone(),
            channel.clone(),
            Arc::new(PeerState::new(id)),
            EventBus::default(),
            Duration::from_secs(1),
            Duration::from_secs(3),
        ));
        (monitor, channel)
    }

    #[tokio::test]
    async fn test_state_machine() {
        let network = MemoryNetwork::new();
        let (monitor, _) = monitor(&network);
        assert_eq!(monitor.state(), LivenessState::Idle);

        let handle = monitor.start().unwrap();
        assert_eq!(monitor.state(), LivenessState::Alive);
        assert!(matches!(monitor.start(), Err(NodeError::AlreadyStarted)));

        monitor.stop();
        handle.stop().await.unwrap();
        assert_eq!(monitor.state(), LivenessState::Stopped);
        assert!(matches!(monitor.start(), Err(NodeError::LivenessStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_dies_exactly_once() {
        let network = MemoryNetwork::new();
        let (monitor, _) = monitor(&network);
        monitor
            .peers
            .merge(PeerSnapshot::new(NodeId::from("B"), Vec::new()));

        let handle = monitor.start().unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!monitor.peers.contains(&NodeId::from("B")));
        let deaths = monitor.events.history_of(names::NODE_DEATH);
        assert_eq!(deaths.len(), 1);
        assert_eq!(deaths[0].data["node_id"], "B");

        assert!(!monitor.handle_node_death(&NodeId::from("B")).await);
        assert_eq!(monitor.events.history_of(names::NODE_DEATH).len(), 1);

        monitor.stop();
        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeats_keep_peer_alive() {
        let network = MemoryNetwork::new();
        let (monitor, _) = monitor(&network);
        let b = NodeId::from("B");
        monitor.peers.merge(PeerSnapshot::new(b.clone(), Vec::new()));

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(2)).await;
            monitor
                .observe(&GossipMessage::heartbeat(b.clone()))
                .await
                .unwrap();
            assert!(monitor.sweep().await.is_empty());
        }
        assert!(monitor.peers.contains(&b));
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_peer_is_ignored() {
        let network = MemoryNetwork::new();
        let (monitor, _) = monitor(&network);

        monitor
            .observe(&GossipMessage::heartbeat(NodeId::from("B")))
            .await
            .unwrap();
        monitor
            .observe(&GossipMessage::NodeJoin {
                node_id: NodeId::from("C"),
                ticket: None,
            })
            .await
            .unwrap();
        assert!(monitor.peers.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_emits_heartbeat_error() {
        let network = MemoryNetwork::new();
        let (monitor, channel) = monitor(&network);
        channel.set_offline(true);

        monitor.beat().await;
        monitor.beat().await;
        assert_eq!(monitor.events.history_of(names::HEARTBEAT_ERROR).len(), 2);
    }

    #[tokio::test]
    async fn test_handle_node_death() {
        let network = MemoryNetwork::new();
        let (monitor, _) = monitor(&network);
        monitor
            .peers
            .merge(PeerSnapshot::new(NodeId::from("B"), Vec::new()));

        assert!(monitor.handle_node_death(&NodeId::from("B")).await);
        assert!(!monitor.handle_node_death(&NodeId::from("B")).await);
        assert_eq!(monitor.events.history_of(names::NODE_DEATH).len(), 1);
    }
}
