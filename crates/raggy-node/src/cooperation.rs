//! Per-entity trust scores and defederation
//!
//! Trust only grows through bounded interactions. Defederation zeroes an
//! entity's trust for good and is announced to peers, who record the report
//! and may follow it.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use raggy_core::{
    DocRef, DocumentStore, EventBus, GossipMessage, MessagingChannel, NodeId, RELATIONSHIPS_KEY,
    Record, RecordKind, encode_record, names,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{NodeError, NodeResult};
use crate::sync::MessageObserver;
use crate::veracity::EdgeWeights;

const DEFEDERATED_PREFIX: &str = "defederated:";

/// This node's cooperation record for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub entity_id: NodeId,
    /// Always within [0, 1]
    pub trust_score: f64,
    pub last_interaction: DateTime<Utc>,
    pub interaction_count: u64,
    pub flags: BTreeSet<String>,
}

impl Relationship {
    pub fn new(entity_id: NodeId) -> Self {
        Self {
            entity_id,
            trust_score: 0.0,
            last_interaction: Utc::now(),
            interaction_count: 0,
            flags: BTreeSet::new(),
        }
    }

    pub fn is_defederated(&self) -> bool {
        self.flags.iter().any(|f| f.starts_with(DEFEDERATED_PREFIX))
    }

    fn interact<I>(&mut self, delta: f64, flags: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.trust_score = if self.is_defederated() {
            0.0
        } else {
            (self.trust_score + delta).clamp(0.0, 1.0)
        };
        self.interaction_count += 1;
        self.last_interaction = Utc::now();
        self.flags.extend(flags);
    }
}

/// The persisted relationship table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecords(pub Vec<Relationship>);

impl Record for RelationshipRecords {
    const KIND: RecordKind = RecordKind::Relationships;
}

/// Trust scoring and defederation for the local node
pub struct CooperationEngine {
    node_id: NodeId,
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn MessagingChannel>,
    events: EventBus,
    relationships: DashMap<NodeId, Relationship>,
    doc: RwLock<Option<DocRef>>,
    max_trust_delta: f64,
    graph_trust_step: f64,
    follow_peer_defederation: bool,
}

impl CooperationEngine {
    pub fn new(
        node_id: NodeId,
        store: Arc<dyn DocumentStore>,
        channel: Arc<dyn MessagingChannel>,
        events: EventBus,
    ) -> Self {
        Self {
            node_id,
            store,
            channel,
            events,
            relationships: DashMap::new(),
            doc: RwLock::new(None),
            max_trust_delta: 1.0,
            graph_trust_step: 0.05,
            follow_peer_defederation: false,
        }
    }

    /// Bound per-interaction deltas and the graph reconciliation step
    pub fn with_limits(mut self, max_trust_delta: f64, graph_trust_step: f64) -> Self {
        self.max_trust_delta = max_trust_delta;
        self.graph_trust_step = graph_trust_step;
        self
    }

    pub fn with_follow_peer_defederation(mut self, follow: bool) -> Self {
        self.follow_peer_defederation = follow;
        self
    }

    /// Create the relationships document and write the current table
    ///
    /// Calling it again returns the existing document.
    pub async fn initialize(&self) -> NodeResult<DocRef> {
        let existing = self.doc.read().clone();
        if let Some(doc) = existing {
            return Ok(doc);
        }

        let doc = self.store.create().await?;
        *self.doc.write() = Some(doc.clone());
        self.persist().await?;
        debug!(doc = %doc.id().short_hex(), "Relationships document created");
        Ok(doc)
    }

    /// The relationships document, once initialized
    pub fn document(&self) -> Option<DocRef> {
        self.doc.read().clone()
    }

    /// Create a zero-trust record for `entity` unless one exists
    pub async fn add_relationship(&self, entity: &NodeId) -> NodeResult<Relationship> {
        let mut created = false;
        let relationship = self
            .relationships
            .entry(entity.clone())
            .or_insert_with(|| {
                created = true;
                Relationship::new(entity.clone())
            })
            .clone();

        if created {
            self.persist().await?;
        }
        Ok(relationship)
    }

    /// Record one interaction with a known entity
    ///
    /// The delta is clamped to the configured bound before it is applied.
    /// Returns `None` for unknown entities.
    pub async fn update_relationship<I>(
        &self,
        entity: &NodeId,
        trust_delta: f64,
        flags: I,
    ) -> NodeResult<Option<Relationship>>
    where
        I: IntoIterator<Item = String>,
    {
        if !trust_delta.is_finite() {
            return Err(NodeError::InvalidWeight {
                field: "trust_delta".into(),
                value: trust_delta,
            });
        }
        let delta = trust_delta.clamp(-self.max_trust_delta, self.max_trust_delta);

        let updated = {
            let Some(mut relationship) = self.relationships.get_mut(entity) else {
                return Ok(None);
            };
            relationship.interact(delta, flags);
            relationship.clone()
        };

        self.persist().await?;
        debug!(
            entity = %entity.short_id(),
            trust = updated.trust_score,
            interactions = updated.interaction_count,
            "Relationship updated"
        );
        Ok(Some(updated))
    }

    /// Zero `entity`'s trust for good and announce it
    pub async fn defederate(&self, entity: &NodeId, reason: &str) -> NodeResult<Relationship> {
        let relationship = {
            let mut relationship = self
                .relationships
                .entry(entity.clone())
                .or_insert_with(|| Relationship::new(entity.clone()));
            relationship.trust_score = 0.0;
            relationship
                .flags
                .insert(format!("{DEFEDERATED_PREFIX}{reason}"));
            relationship.clone()
        };

        self.persist().await?;
        self.channel
            .publish(GossipMessage::Defederation {
                issuer: self.node_id.clone(),
                entity_id: entity.clone(),
                reason: reason.to_string(),
            })
            .await?;

        info!(entity = %entity.short_id(), reason, "Entity defederated");
        Ok(relationship)
    }

    pub fn is_defederated(&self, entity: &NodeId) -> bool {
        self.relationships
            .get(entity)
            .is_some_and(|r| r.is_defederated())
    }

    pub fn relationship(&self, entity: &NodeId) -> Option<Relationship> {
        self.relationships.get(entity).map(|r| r.clone())
    }

    /// Every relationship, ordered by entity
    pub fn relationships(&self) -> Vec<Relationship> {
        let mut all: Vec<Relationship> = self.relationships.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        all
    }

    /// Credit every known entity with an outbound rail
    ///
    /// Each rail counts as one interaction worth `weight * graph_trust_step`.
    /// Returns how many relationships changed.
    pub async fn reconcile_with_graph(&self, weights: &dyn EdgeWeights) -> NodeResult<usize> {
        let mut reconciled = 0;
        for target in weights.targets() {
            let weight = weights.weight_to(&target);
            let delta = (weight * self.graph_trust_step).clamp(0.0, self.max_trust_delta);

            let Some(mut relationship) = self.relationships.get_mut(&target) else {
                continue;
            };
            if relationship.is_defederated() {
                continue;
            }
            relationship.interact(delta, std::iter::empty());
            reconciled += 1;
        }

        if reconciled > 0 {
            self.persist().await?;
        }
        debug!(reconciled, "Reconciled trust with graph");
        Ok(reconciled)
    }

    /// Rewrite the relationships document; a no-op before `initialize`
    pub async fn persist(&self) -> NodeResult<()> {
        let Some(doc) = self.doc.read().clone() else {
            return Ok(());
        };
        let records = RelationshipRecords(self.relationships());
        doc.set_bytes(RELATIONSHIPS_KEY, encode_record(&records)?)
            .await?;
        Ok(())
    }

    async fn on_report(&self, issuer: &NodeId, entity: &NodeId, reason: &str) -> NodeResult<()> {
        let known = match self.relationships.get_mut(entity) {
            Some(mut relationship) => {
                relationship
                    .flags
                    .insert(format!("reported:{issuer}:{reason}"));
                true
            }
            None => false,
        };
        if known {
            self.persist().await?;
        }

        info!(issuer = %issuer.short_id(), entity = %entity.short_id(), reason, "Defederation reported");
        self.events
            .emit(
                names::DEFEDERATION_REPORTED,
                json!({
                    "issuer": issuer.as_str(),
                    "entity_id": entity.as_str(),
                    "reason": reason,
                }),
                &self.node_id,
            )
            .await;

        if self.follow_peer_defederation && entity != &self.node_id && !self.is_defederated(entity)
        {
            self.defederate(entity, &format!("peer:{issuer}")).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MessageObserver for CooperationEngine {
    async fn observe(&self, message: &GossipMessage) -> NodeResult<()> {
        match message {
            GossipMessage::Defederation {
                issuer,
                entity_id,
                reason,
            } if issuer != &self.node_id => self.on_report(issuer, entity_id, reason).await,
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use raggy_core::{MemoryNetwork, ShareMode, decode_record};

    use super::*;

    fn engine(network: &MemoryNetwork, id: &str) -> CooperationEngine {
        let node_id = NodeId::from(id);
        CooperationEngine::new(
            node_id.clone(),
            network.store(),
            network.channel(node_id),
            EventBus::default(),
        )
    }

    struct FixedWeights(Vec<(NodeId, f64)>);

    impl EdgeWeights for FixedWeights {
        fn weight_to(&self, target: &NodeId) -> f64 {
            self.0
                .iter()
                .find(|(id, _)| id == target)
                .map(|(_, w)| *w)
                .unwrap_or(0.0)
        }

        fn targets(&self) -> Vec<NodeId> {
            self.0.iter().map(|(id, _)| id.clone()).collect()
        }
    }

    #[tokio::test]
    async fn test_add_relationship_is_idempotent() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "A");
        let x = NodeId::from("X");

        let first = coop.add_relationship(&x).await.unwrap();
        coop.update_relationship(&x, 0.3, Vec::new()).await.unwrap();
        let second = coop.add_relationship(&x).await.unwrap();

        assert_eq!(first.trust_score, 0.0);
        assert!((second.trust_score - 0.3).abs() < 1e-9);
        assert_eq!(second.interaction_count, 1);
    }

    #[tokio::test]
    async fn test_trust_stays_in_unit_interval() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "A");
        let x = NodeId::from("X");
        coop.add_relationship(&x).await.unwrap();

        for delta in [5.0, 0.7, -0.2, -40.0, f64::MAX, f64::MIN] {
            let r = coop
                .update_relationship(&x, delta, Vec::new())
                .await
                .unwrap()
                .unwrap();
            assert!((0.0..=1.0).contains(&r.trust_score));
        }

        assert!(matches!(
            coop.update_relationship(&x, f64::NAN, Vec::new()).await,
            Err(NodeError::InvalidWeight { .. })
        ));
    }

    #[tokio::test]
    async fn test_delta_is_bounded_per_interaction() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "A").with_limits(0.1, 0.05);
        let x = NodeId::from("X");
        coop.add_relationship(&x).await.unwrap();

        let r = coop
            .update_relationship(&x, 1.0, vec!["burst".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert!((r.trust_score - 0.1).abs() < 1e-9);
        assert!(r.flags.contains("burst"));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_a_miss() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "A");
        let r = coop
            .update_relationship(&NodeId::from("nobody"), 0.1, Vec::new())
            .await
            .unwrap();
        assert!(r.is_none());
    }

    #[tokio::test]
    async fn test_defederate_is_idempotent_and_sticky() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "A");
        let x = NodeId::from("X");
        coop.add_relationship(&x).await.unwrap();
        coop.update_relationship(&x, 0.4, Vec::new()).await.unwrap();

        coop.defederate(&x, "abuse").await.unwrap();
        let r = coop.defederate(&x, "abuse").await.unwrap();
        assert_eq!(r.trust_score, 0.0);
        assert_eq!(
            r.flags.iter().filter(|f| *f == "defederated:abuse").count(),
            1
        );
        assert!(coop.is_defederated(&x));

        let r = coop
            .update_relationship(&x, 0.5, Vec::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.trust_score, 0.0);
    }

    #[tokio::test]
    async fn test_defederate_is_broadcast() {
        let network = MemoryNetwork::new();
        let listener = network.channel(NodeId::from("L"));
        let coop = engine(&network, "A");

        coop.defederate(&NodeId::from("X"), "spam").await.unwrap();
        let msg = listener.next_message().await.unwrap();
        assert_eq!(
            msg,
            GossipMessage::Defederation {
                issuer: NodeId::from("A"),
                entity_id: NodeId::from("X"),
                reason: "spam".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_peer_report_is_recorded() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "B");
        let x = NodeId::from("X");
        coop.add_relationship(&x).await.unwrap();

        coop.observe(&GossipMessage::Defederation {
            issuer: NodeId::from("A"),
            entity_id: x.clone(),
            reason: "abuse".into(),
        })
        .await
        .unwrap();

        let r = coop.relationship(&x).unwrap();
        assert!(r.flags.contains("reported:A:abuse"));
        assert!(!r.is_defederated());
        assert_eq!(coop.events.history_of(names::DEFEDERATION_REPORTED).len(), 1);
    }

    #[tokio::test]
    async fn test_following_peer_defederation() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "B").with_follow_peer_defederation(true);
        let x = NodeId::from("X");
        let report = GossipMessage::Defederation {
            issuer: NodeId::from("A"),
            entity_id: x.clone(),
            reason: "abuse".into(),
        };

        coop.observe(&report).await.unwrap();
        coop.observe(&report).await.unwrap();

        let r = coop.relationship(&x).unwrap();
        assert!(r.flags.contains("defederated:peer:A"));
        assert_eq!(r.flags.iter().filter(|f| f.starts_with("defederated:")).count(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_with_graph() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "A");
        let (b, c, d) = (NodeId::from("B"), NodeId::from("C"), NodeId::from("D"));
        coop.add_relationship(&b).await.unwrap();
        coop.add_relationship(&c).await.unwrap();
        coop.defederate(&c, "abuse").await.unwrap();

        let weights = FixedWeights(vec![(b.clone(), 0.8), (c.clone(), 1.0), (d.clone(), 1.0)]);
        assert_eq!(coop.reconcile_with_graph(&weights).await.unwrap(), 1);

        let r = coop.relationship(&b).unwrap();
        assert!((r.trust_score - 0.04).abs() < 1e-9);
        assert_eq!(r.interaction_count, 1);
        assert_eq!(coop.relationship(&c).unwrap().trust_score, 0.0);
        assert!(coop.relationship(&d).is_none());
    }

    #[tokio::test]
    async fn test_mutations_rewrite_document() {
        let network = MemoryNetwork::new();
        let coop = engine(&network, "A");
        coop.add_relationship(&NodeId::from("early")).await.unwrap();

        let doc = coop.initialize().await.unwrap();
        assert_eq!(coop.initialize().await.unwrap().id(), doc.id());
        coop.add_relationship(&NodeId::from("late")).await.unwrap();

        let reader = network
            .store()
            .import_from_ticket(&doc.share(ShareMode::Read).await.unwrap())
            .await
            .unwrap();
        let bytes = reader.get_bytes(RELATIONSHIPS_KEY).await.unwrap().unwrap();
        let records: RelationshipRecords = decode_record(&bytes).unwrap();
        let ids: Vec<&str> = records.0.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
