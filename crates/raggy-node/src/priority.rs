//! Entropy-ordered replication queue
//!
//! Items pop highest entropy first; equal entropies pop in enqueue order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{self, AtomicBool, AtomicU64};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use raggy_core::{DocId, DocumentStore, EventBus, NodeId, TransportError, names};
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::task::TaskHandle;

/// A pending replication of one document
#[derive(Debug, Clone)]
pub struct PriorityItem {
    pub doc_id: DocId,
    pub entropy: f64,
    pub enqueued_at: DateTime<Utc>,
    /// Enqueue counter; lower values waited longer
    pub seq: u64,
}

impl PartialEq for PriorityItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityItem {}

impl PartialOrd for PriorityItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PriorityItem {
    /// Greater means popped first
    fn cmp(&self, other: &Self) -> Ordering {
        self.entropy
            .total_cmp(&other.entropy)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Outcome of one [`PriorityQueue::drain`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub loaded: Vec<DocId>,
    pub failed: Vec<DocId>,
}

pub struct PriorityQueue {
    node_id: NodeId,
    store: Arc<dyn DocumentStore>,
    events: EventBus,
    heap: Mutex<BinaryHeap<PriorityItem>>,
    next_seq: AtomicU64,
    loading: AtomicBool,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new(node_id: NodeId, store: Arc<dyn DocumentStore>, events: EventBus) -> Self {
        Self {
            node_id,
            store,
            events,
            heap: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            loading: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Queue `doc_id` for replication
    pub fn enqueue(&self, doc_id: DocId, entropy: f64) -> NodeResult<PriorityItem> {
        if !entropy.is_finite() || entropy < 0.0 {
            return Err(NodeError::InvalidEntropy(entropy));
        }

        let item = PriorityItem {
            doc_id,
            entropy,
            enqueued_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, atomic::Ordering::SeqCst),
        };
        self.heap.lock().push(item.clone());
        self.notify.notify_one();

        debug!(doc = %doc_id.short_hex(), entropy, "Enqueued document");
        Ok(item)
    }

    pub fn pop(&self) -> Option<PriorityItem> {
        self.heap.lock().pop()
    }

    pub fn peek(&self) -> Option<PriorityItem> {
        self.heap.lock().peek().cloned()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    /// Whether a drain is in progress
    pub fn is_loading(&self) -> bool {
        self.loading.load(atomic::Ordering::SeqCst)
    }

    /// Ask a running drain to return after its current fetch
    pub fn stop(&self) {
        self.loading.store(false, atomic::Ordering::SeqCst);
    }

    /// Fetch queued documents until the queue is empty or [`stop`](Self::stop) is called
    ///
    /// Failed fetches are reported and dropped.
    pub async fn drain(&self) -> DrainReport {
        self.loading.store(true, atomic::Ordering::SeqCst);
        let mut report = DrainReport::default();

        while self.is_loading() {
            let Some(item) = self.pop() else {
                break;
            };

            let fetched = match self.store.get(&item.doc_id).await {
                Ok(Some(_)) => Ok(()),
                Ok(None) => Err(TransportError::DocumentNotFound(item.doc_id.short_hex())),
                Err(e) => Err(e),
            };

            match fetched {
                Ok(()) => {
                    report.loaded.push(item.doc_id);
                    self.events
                        .emit(
                            names::DOC_LOADED,
                            json!({ "doc_id": item.doc_id.to_string() }),
                            &self.node_id,
                        )
                        .await;
                }
                Err(e) => {
                    warn!(doc = %item.doc_id.short_hex(), error = %e, "Document load failed");
                    report.failed.push(item.doc_id);
                    self.events
                        .emit(
                            names::LOAD_ERROR,
                            json!({
                                "doc_id": item.doc_id.to_string(),
                                "error": e.to_string(),
                            }),
                            &self.node_id,
                        )
                        .await;
                }
            }
        }

        self.loading.store(false, atomic::Ordering::SeqCst);
        debug!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Drain finished"
        );
        report
    }

    /// Spawn a loop that drains whenever something is enqueued
    pub fn start(self: &Arc<Self>) -> TaskHandle {
        let queue = Arc::clone(self);
        let span = raggy_logging::node_span(&self.node_id, "priority");
        TaskHandle::spawn("priority", span, move |token| async move {
            queue.run(token).await;
        })
    }

    async fn run(&self, token: CancellationToken) {
        info!("Priority drain started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.notify.notified() => {
                    self.drain().await;
                }
            }
        }
        info!("Priority drain stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use raggy_core::MemoryNetwork;

    use super::*;

    fn queue(network: &MemoryNetwork) -> (Arc<PriorityQueue>, Arc<raggy_core::MemoryDocumentStore>) {
        let store = network.store();
        let queue = Arc::new(PriorityQueue::new(
            NodeId::from("A"),
            store.clone(),
            EventBus::default(),
        ));
        (queue, store)
    }

    #[test]
    fn test_ordering_prefers_entropy_then_age() {
        let network = MemoryNetwork::new();
        let (q, _) = queue(&network);
        let (d1, d2, d3, d4) = (
            DocId::derive("1"),
            DocId::derive("2"),
            DocId::derive("3"),
            DocId::derive("4"),
        );

        q.enqueue(d1, 0.5).unwrap();
        q.enqueue(d2, 0.9).unwrap();
        q.enqueue(d3, 0.5).unwrap();
        q.enqueue(d4, 0.0).unwrap();

        assert_eq!(q.peek().unwrap().doc_id, d2);
        let order: Vec<DocId> = std::iter::from_fn(|| q.pop()).map(|i| i.doc_id).collect();
        assert_eq!(order, vec![d2, d1, d3, d4]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_enqueue_rejects_bad_entropy() {
        let network = MemoryNetwork::new();
        let (q, _) = queue(&network);
        for bad in [f64::NAN, f64::INFINITY, -0.1] {
            assert!(matches!(
                q.enqueue(DocId::derive("x"), bad),
                Err(NodeError::InvalidEntropy(_))
            ));
        }
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn test_drain_reports_missing_documents_and_continues() {
        let network = MemoryNetwork::new();
        let (q, store) = queue(&network);
        let present = store.create().await.unwrap().id();
        let missing = DocId::derive("missing");

        q.enqueue(missing, 0.9).unwrap();
        q.enqueue(present, 0.1).unwrap();
        let report = q.drain().await;

        assert_eq!(report.loaded, vec![present]);
        assert_eq!(report.failed, vec![missing]);
        assert!(q.is_empty());
        assert!(!q.is_loading());

        let errors = q.events.history_of(names::LOAD_ERROR);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["doc_id"], missing.to_string());
        assert_eq!(q.events.history_of(names::DOC_LOADED).len(), 1);
    }

    #[tokio::test]
    async fn test_stop_halts_drain_between_pops() {
        let network = MemoryNetwork::new();
        let (q, store) = queue(&network);
        for _ in 0..3 {
            q.enqueue(store.create().await.unwrap().id(), 0.5).unwrap();
        }

        let stopper = q.clone();
        q.events.on(names::DOC_LOADED, move |_| {
            let stopper = stopper.clone();
            async move { stopper.stop() }
        });

        let report = q.drain().await;
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn test_background_drain_follows_enqueues() {
        let network = MemoryNetwork::new();
        let (q, store) = queue(&network);
        let handle = q.start();

        let doc = store.create().await.unwrap().id();
        q.enqueue(doc, 0.3).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while q.events.history_of(names::DOC_LOADED).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(q.is_empty());
        handle.stop().await.unwrap();
    }
}
