//! Configuration for a Raggy node

use std::time::Duration;

use raggy_core::DEFAULT_HISTORY_LIMIT;

use crate::error::{NodeError, NodeResult};

/// Configuration for a [`RaggyNode`](crate::RaggyNode)
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Period between heartbeats and dead-peer sweeps
    pub heartbeat_interval: Duration,
    /// A peer silent for longer than this is considered dead
    pub liveness_window: Duration,
    /// Pause after a failed sync iteration
    pub sync_backoff: Duration,
    /// Period between cognition iterations
    pub cognition_interval: Duration,
    /// Largest trust change a single interaction may apply
    pub max_trust_delta: f64,
    /// Trust gained per unit of rail weight during graph reconciliation
    pub graph_trust_step: f64,
    /// Defederate entities locally when a peer reports defederating them
    pub follow_peer_defederation: bool,
    /// Run the cognition loop on start
    pub enable_cognition: bool,
    /// Run the priority drain loop on start
    pub enable_priority_drain: bool,
    /// Event broadcast channel capacity
    pub event_channel_capacity: usize,
    /// Past events kept by the event bus; older ones are dropped
    pub event_history_limit: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(1),
            liveness_window: Duration::from_secs(3),
            sync_backoff: Duration::from_secs(1),
            cognition_interval: Duration::from_secs(1),
            max_trust_delta: 1.0,
            graph_trust_step: 0.05,
            follow_peer_defederation: false,
            enable_cognition: false,
            enable_priority_drain: true,
            event_channel_capacity: 1024,
            event_history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl NodeConfig {
    /// Set the heartbeat interval
    ///
    /// The liveness window is left as is; set it explicitly when changing
    /// the interval by a large factor.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the liveness window
    pub fn with_liveness_window(mut self, window: Duration) -> Self {
        self.liveness_window = window;
        self
    }

    /// Set the sync backoff
    pub fn with_sync_backoff(mut self, backoff: Duration) -> Self {
        self.sync_backoff = backoff;
        self
    }

    /// Set the cognition interval
    pub fn with_cognition_interval(mut self, interval: Duration) -> Self {
        self.cognition_interval = interval;
        self
    }

    /// Set the per-interaction trust bound
    pub fn with_max_trust_delta(mut self, delta: f64) -> Self {
        self.max_trust_delta = delta;
        self
    }

    /// Set the graph reconciliation step
    pub fn with_graph_trust_step(mut self, step: f64) -> Self {
        self.graph_trust_step = step;
        self
    }

    /// Follow peers' defederation reports
    pub fn with_follow_peer_defederation(mut self, follow: bool) -> Self {
        self.follow_peer_defederation = follow;
        self
    }

    /// Enable or disable the cognition loop
    pub fn with_cognition(mut self, enabled: bool) -> Self {
        self.enable_cognition = enabled;
        self
    }

    /// Enable or disable the priority drain loop
    pub fn with_priority_drain(mut self, enabled: bool) -> Self {
        self.enable_priority_drain = enabled;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Set how many past events the event bus keeps
    pub fn with_event_history_limit(mut self, limit: usize) -> Self {
        self.event_history_limit = limit;
        self
    }

    /// Apply a single update
    pub fn apply(&mut self, update: ConfigUpdate) {
        match update {
            ConfigUpdate::HeartbeatInterval(d) => self.heartbeat_interval = d,
            ConfigUpdate::LivenessWindow(d) => self.liveness_window = d,
            ConfigUpdate::SyncBackoff(d) => self.sync_backoff = d,
            ConfigUpdate::CognitionInterval(d) => self.cognition_interval = d,
            ConfigUpdate::MaxTrustDelta(v) => self.max_trust_delta = v,
            ConfigUpdate::GraphTrustStep(v) => self.graph_trust_step = v,
            ConfigUpdate::FollowPeerDefederation(b) => self.follow_peer_defederation = b,
            ConfigUpdate::EnableCognition(b) => self.enable_cognition = b,
            ConfigUpdate::EnablePriorityDrain(b) => self.enable_priority_drain = b,
        }
    }

    /// Check that every interval is usable and every bound is sane
    pub fn validate(&self) -> NodeResult<()> {
        for (name, d) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("liveness_window", self.liveness_window),
            ("sync_backoff", self.sync_backoff),
            ("cognition_interval", self.cognition_interval),
        ] {
            if d.is_zero() {
                return Err(NodeError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.liveness_window < self.heartbeat_interval {
            return Err(NodeError::Config(
                "liveness_window must be at least one heartbeat_interval".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_trust_delta) {
            return Err(NodeError::Config("max_trust_delta must be within [0, 1]".into()));
        }
        if !self.graph_trust_step.is_finite() || self.graph_trust_step < 0.0 {
            return Err(NodeError::Config("graph_trust_step must be non-negative".into()));
        }
        if self.event_history_limit == 0 {
            return Err(NodeError::Config("event_history_limit must be non-zero".into()));
        }
        Ok(())
    }
}

/// A change to one updatable [`NodeConfig`] field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigUpdate {
    HeartbeatInterval(Duration),
    LivenessWindow(Duration),
    SyncBackoff(Duration),
    CognitionInterval(Duration),
    MaxTrustDelta(f64),
    GraphTrustStep(f64),
    FollowPeerDefederation(bool),
    EnableCognition(bool),
    EnablePriorityDrain(bool),
}

impl ConfigUpdate {
    /// Parse a `key = value` pair
    ///
    /// Durations are given in seconds (fractions allowed).
    pub fn parse(key: &str, value: &str) -> NodeResult<Self> {
        let value = value.trim();
        match key.trim() {
            "heartbeat_interval" => parse_duration(key, value).map(Self::HeartbeatInterval),
            "liveness_window" => parse_duration(key, value).map(Self::LivenessWindow),
            "sync_backoff" => parse_duration(key, value).map(Self::SyncBackoff),
            "cognition_interval" => parse_duration(key, value).map(Self::CognitionInterval),
            "max_trust_delta" => parse_unit(key, value).map(Self::MaxTrustDelta),
            "graph_trust_step" => parse_unit(key, value).map(Self::GraphTrustStep),
            "follow_peer_defederation" => parse_bool(key, value).map(Self::FollowPeerDefederation),
            "enable_cognition" => parse_bool(key, value).map(Self::EnableCognition),
            "enable_priority_drain" => parse_bool(key, value).map(Self::EnablePriorityDrain),
            other => Err(NodeError::UnknownField(other.to_string())),
        }
    }
}

fn parse_duration(key: &str, value: &str) -> NodeResult<Duration> {
    let secs: f64 = value
        .parse()
        .map_err(|_| NodeError::Config(format!("{key}: expected seconds, got {value:?}")))?;
    if secs <= 0.0 {
        return Err(NodeError::Config(format!("{key}: must be positive")));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| NodeError::Config(format!("{key}: {e}")))
}

fn parse_unit(key: &str, value: &str) -> NodeResult<f64> {
    let v: f64 = value
        .parse()
        .map_err(|_| NodeError::Config(format!("{key}: expected a number, got {value:?}")))?;
    if !(0.0..=1.0).contains(&v) {
        return Err(NodeError::Config(format!("{key}: must be within [0, 1]")));
    }
    Ok(v)
}

fn parse_bool(key: &str, value: &str) -> NodeResult<bool> {
    value
        .parse()
        .map_err(|_| NodeError::Config(format!("{key}: expected true or false, got {value:?}")))
}
