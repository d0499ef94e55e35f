//! In-process event bus
//!
//! Subsystems report what happened by emitting named [`Event`]s. Listeners
//! register per event name; every emission is also appended to a bounded
//! history (oldest events are dropped first) and forwarded to broadcast
//! subscribers.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::identity::NodeId;

/// Events kept in history unless configured otherwise
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Names of the events emitted by node subsystems
pub mod names {
    pub const NODE_JOINED: &str = "node_joined";
    pub const JOIN_ERROR: &str = "join_error";
    pub const NODE_DEATH: &str = "node_death";
    pub const SYNC_ERROR: &str = "sync_error";
    pub const HEARTBEAT_ERROR: &str = "heartbeat_error";
    pub const DOC_LOADED: &str = "doc_loaded";
    pub const LOAD_ERROR: &str = "load_error";
    pub const RAIL_RECEIVED: &str = "rail_received";
    pub const DEFEDERATION_REPORTED: &str = "defederation_reported";
    pub const COGNITION_ERROR: &str = "cognition_error";
}

/// A single emitted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name
    pub name: String,
    /// Event payload
    pub data: serde_json::Value,
    /// The node that emitted the event
    pub source: NodeId,
    /// When the event was emitted
    pub timestamp: DateTime<Utc>,
}

/// Handle returned by [`EventBus::on`], used to unregister a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

struct Inner {
    listeners: DashMap<String, Vec<(ListenerId, Handler)>>,
    history: Mutex<VecDeque<Event>>,
    history_limit: usize,
    broadcast_tx: broadcast::Sender<Event>,
    next_id: AtomicU64,
}

/// Publish/subscribe fan-out shared by every subsystem of a node
///
/// Cloning is cheap; clones share listeners and history.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_names", &self.inner.listeners.len())
            .field("history_len", &self.inner.history.lock().len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Create a bus whose broadcast stream buffers `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self::with_history_limit(capacity, DEFAULT_HISTORY_LIMIT)
    }

    /// Create a bus that keeps at most `history_limit` past events
    pub fn with_history_limit(capacity: usize, history_limit: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity.max(1));
        let history_limit = history_limit.max(1);
        Self {
            inner: Arc::new(Inner {
                listeners: DashMap::new(),
                history: Mutex::new(VecDeque::with_capacity(history_limit.min(1024))),
                history_limit,
                broadcast_tx,
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register an async listener for `name`
    pub fn on<F, Fut>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler = Arc::new(move |event| Box::pin(handler(event)));
        self.inner
            .listeners
            .entry(name.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Unregister a listener; returns false if it was not registered
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        let Some(mut handlers) = self.inner.listeners.get_mut(name) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(listener, _)| *listener != id);
        before != handlers.len()
    }

    /// Emit an event and await every listener registered for its name
    pub async fn emit(&self, name: &str, data: serde_json::Value, source: &NodeId) -> Event {
        let event = Event {
            name: name.to_string(),
            data,
            source: source.clone(),
            timestamp: Utc::now(),
        };

        {
            let mut history = self.inner.history.lock();
            if history.len() == self.inner.history_limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No subscribers is fine
        let _ = self.inner.broadcast_tx.send(event.clone());

        let handlers: Vec<Handler> = self
            .inner
            .listeners
            .get(name)
            .map(|entry| entry.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        debug!(
            event = %name,
            node = %source,
            listeners = handlers.len(),
            data = %event.data,
            "Event emitted"
        );

        join_all(handlers.iter().map(|h| h(event.clone()))).await;
        event
    }

    /// Subscribe to every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Snapshot of the retained events, in call order
    pub fn history(&self) -> Vec<Event> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// Most events [`history`](Self::history) retains
    pub fn history_limit(&self) -> usize {
        self.inner.history_limit
    }

    /// Events with the given name, in call order
    pub fn history_of(&self, name: &str) -> Vec<Event> {
        self.inner
            .history
            .lock()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    /// Number of listeners registered for `name`
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.listeners.get(name).map(|h| h.len()).unwrap_or(0)
    }
}
