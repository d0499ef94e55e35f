//! Entropy scoring of cognition items from trust-graph weights
//!
//! An item's entropy is `-Σ w·log2(w)` over its positive connection weights,
//! taken as probability masses without renormalization. The score is a
//! diversity-and-magnitude signal for replication priority, not a true
//! Shannon entropy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use raggy_core::{
    DocId, DocRef, DocumentStore, EventBus, NodeId, Record, RecordKind, THOUGHTS_KEY,
    encode_record, names,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NodeResult;
use crate::priority::PriorityQueue;
use crate::task::TaskHandle;
use crate::veracity::EdgeWeights;

/// A scored item, optionally backed by a document to replicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub id: NodeId,
    pub content: String,
    pub connections: BTreeMap<NodeId, f64>,
    pub entropy: f64,
    pub created_at: DateTime<Utc>,
    pub doc_id: Option<DocId>,
    /// When the entropy was last computed from connections
    pub scored_at: Option<DateTime<Utc>>,
}

impl Thought {
    pub fn new(id: NodeId, content: impl Into<String>, doc_id: Option<DocId>) -> Self {
        Self {
            id,
            content: content.into(),
            connections: BTreeMap::new(),
            entropy: 0.0,
            created_at: Utc::now(),
            doc_id,
            scored_at: None,
        }
    }
}

/// Entropy over positive weights; `None` when there are none
pub fn connection_entropy<'a, I>(weights: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a f64>,
{
    let mut entropy = 0.0;
    let mut any = false;
    for &w in weights {
        if w > 0.0 {
            entropy -= w * w.log2();
            any = true;
        }
    }
    any.then_some(entropy)
}

/// The persisted item list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThoughtRecords(pub Vec<Thought>);

impl Record for ThoughtRecords {
    const KIND: RecordKind = RecordKind::Thoughts;
}

pub struct CognitionEngine {
    node_id: NodeId,
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    thoughts: DashMap<NodeId, Thought>,
    next_id: AtomicU64,
    doc: RwLock<Option<DocRef>>,
    interval: Duration,
}

impl CognitionEngine {
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn DocumentStore>,
        events: EventBus,
        interval: Duration,
    ) -> Self {
        Self {
            node_id,
            store,
            events,
            thoughts: DashMap::new(),
            next_id: AtomicU64::new(0),
            doc: RwLock::new(None),
            interval,
        }
    }

    /// Create the thoughts document and write the current items
    pub async fn initialize(&self) -> NodeResult<DocRef> {
        let existing = self.doc.read().clone();
        if let Some(doc) = existing {
            return Ok(doc);
        }

        let doc = self.store.create().await?;
        *self.doc.write() = Some(doc.clone());
        self.persist().await?;
        Ok(doc)
    }

    /// Add an item with a generated id
    pub async fn add_thought(
        &self,
        content: impl Into<String>,
        doc_id: Option<DocId>,
    ) -> NodeResult<Thought> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = NodeId::new(format!("{}/thought-{n}", self.node_id));
        self.add_thought_with_id(id, content, doc_id).await
    }

    /// Add or replace the item `id`
    ///
    /// Use this when items must line up with rail targets.
    pub async fn add_thought_with_id(
        &self,
        id: NodeId,
        content: impl Into<String>,
        doc_id: Option<DocId>,
    ) -> NodeResult<Thought> {
        let thought = Thought::new(id.clone(), content, doc_id);
        self.thoughts.insert(id, thought.clone());
        self.persist().await?;
        Ok(thought)
    }

    pub fn thought(&self, id: &NodeId) -> Option<Thought> {
        self.thoughts.get(id).map(|t| t.clone())
    }

    /// Every item, ordered by id
    pub fn thoughts(&self) -> Vec<Thought> {
        let mut all: Vec<Thought> = self.thoughts.iter().map(|t| t.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Rebuild every item's connections from the current rail weights
    pub fn evaluate_connections(&self, weights: &dyn EdgeWeights) {
        let ids: Vec<NodeId> = self.thoughts.iter().map(|t| t.key().clone()).collect();
        let scored: Vec<(NodeId, f64)> = ids
            .iter()
            .map(|id| (id.clone(), weights.weight_to(id)))
            .filter(|(_, w)| *w > 0.0)
            .collect();

        for mut thought in self.thoughts.iter_mut() {
            let own = thought.id.clone();
            thought.connections = scored
                .iter()
                .filter(|(other, _)| *other != own)
                .cloned()
                .collect();
        }
    }

    /// Recompute entropy from connections
    ///
    /// Items without a positive connection keep their previous score.
    /// Returns the items whose score changed; an item's first score always
    /// counts as a change, even when it equals the initial 0.0.
    pub fn optimize_entropy(&self) -> Vec<NodeId> {
        let now = Utc::now();
        let mut changed = Vec::new();
        for mut thought in self.thoughts.iter_mut() {
            let Some(entropy) = connection_entropy(thought.connections.values()) else {
                continue;
            };
            let first = thought.scored_at.replace(now).is_none();
            if first || entropy != thought.entropy {
                thought.entropy = entropy;
                changed.push(thought.id.clone());
            }
        }
        changed.sort();
        changed
    }

    /// One evaluate, optimize, enqueue, persist iteration
    ///
    /// Only document-backed items whose score changed are enqueued. Returns
    /// how many were.
    pub async fn think_once(
        &self,
        weights: &dyn EdgeWeights,
        queue: Option<&PriorityQueue>,
    ) -> NodeResult<usize> {
        self.evaluate_connections(weights);
        let changed = self.optimize_entropy();

        let mut enqueued = 0;
        if let Some(queue) = queue {
            for id in &changed {
                let Some((doc_id, entropy)) = self
                    .thoughts
                    .get(id)
                    .and_then(|t| t.doc_id.map(|d| (d, t.entropy)))
                else {
                    continue;
                };
                queue.enqueue(doc_id, entropy)?;
                enqueued += 1;
            }
        }

        self.persist().await?;
        debug!(changed = changed.len(), enqueued, "Cognition iteration finished");
        Ok(enqueued)
    }

    /// Spawn the periodic cognition loop
    pub fn start_thinking(
        self: &Arc<Self>,
        weights: Arc<dyn EdgeWeights>,
        queue: Option<Arc<PriorityQueue>>,
    ) -> TaskHandle {
        let engine = Arc::clone(self);
        let span = raggy_logging::node_span(&self.node_id, "cognition");
        TaskHandle::spawn("cognition", span, move |token| async move {
            engine.run(weights, queue, token).await;
        })
    }

    async fn run(
        &self,
        weights: Arc<dyn EdgeWeights>,
        queue: Option<Arc<PriorityQueue>>,
        token: CancellationToken,
    ) {
        info!(interval_ms = self.interval.as_millis() as u64, "Cognition loop started");
        loop {
            if let Err(e) = self.think_once(weights.as_ref(), queue.as_deref()).await {
                warn!(error = %e, "Cognition iteration failed");
                self.events
                    .emit(
                        names::COGNITION_ERROR,
                        json!({ "error": e.to_string() }),
                        &self.node_id,
                    )
                    .await;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("Cognition loop stopped");
    }

    async fn persist(&self) -> NodeResult<()> {
        let Some(doc) = self.doc.read().clone() else {
            return Ok(());
        };
        let records = ThoughtRecords(self.thoughts());
        doc.set_bytes(THOUGHTS_KEY, encode_record(&records)?).await?;
        Ok(())
    }
}
