//! Directed, multi-dimensional trust edges ("veracity rails")
//!
//! Each outbound rail lives in its own document, shared with the target
//! through a write ticket announced as [`GossipMessage::RailCreated`]. Rails
//! other nodes create toward this node are kept as read-only inbound copies
//! and never touch the outbound table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use raggy_core::{
    CodecError, DocId, DocRef, DocumentStore, EventBus, GossipMessage, MessagingChannel, NodeId,
    RAIL_KEY, Record, RecordKind, ShareMode, Ticket, decode_record, encode_record, names,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{NodeError, NodeResult};
use crate::sync::MessageObserver;

/// Record fields that can never be addressed as dimensions
const RESERVED_FIELDS: &[&str] = &["source_id", "target_id", "updated_at", "doc_id"];

/// One axis of a rail's weight
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    SemanticCloseness,
    PhysicalProximity,
    LogicalProximity,
    CommonGoals,
    Alignment,
    SharedHistory,
    Custom(String),
}

impl Dimension {
    /// Parse a dimension name; `-` and `_` are interchangeable
    ///
    /// Unrecognized names become [`Dimension::Custom`]. Reserved record field
    /// names are rejected.
    pub fn parse(name: &str) -> NodeResult<Self> {
        let normalized = name.trim().replace('-', "_");
        if normalized.is_empty() || RESERVED_FIELDS.contains(&normalized.as_str()) {
            return Err(NodeError::UnknownField(name.to_string()));
        }
        Ok(match normalized.as_str() {
            "semantic_closeness" => Self::SemanticCloseness,
            "physical_proximity" => Self::PhysicalProximity,
            "logical_proximity" => Self::LogicalProximity,
            "common_goals" => Self::CommonGoals,
            "alignment" => Self::Alignment,
            "shared_history" => Self::SharedHistory,
            _ => Self::Custom(normalized),
        })
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SemanticCloseness => f.write_str("semantic_closeness"),
            Self::PhysicalProximity => f.write_str("physical_proximity"),
            Self::LogicalProximity => f.write_str("logical_proximity"),
            Self::CommonGoals => f.write_str("common_goals"),
            Self::Alignment => f.write_str("alignment"),
            Self::SharedHistory => f.write_str("shared_history"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

fn check_weight(dimension: &Dimension, value: f64) -> NodeResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(NodeError::InvalidWeight {
            field: dimension.to_string(),
            value,
        })
    }
}

/// A directed trust edge from `source_id` to `target_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VeracityRail {
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub dimensions: BTreeMap<Dimension, f64>,
    pub updated_at: DateTime<Utc>,
    /// Document holding this rail, once stored
    pub doc_id: Option<DocId>,
}

impl VeracityRail {
    pub fn new(source_id: NodeId, target_id: NodeId, dimensions: BTreeMap<Dimension, f64>) -> Self {
        Self {
            source_id,
            target_id,
            dimensions,
            updated_at: Utc::now(),
            doc_id: None,
        }
    }

    /// Unweighted mean of the populated dimensions, 0.0 when there are none
    pub fn total_weight(&self) -> f64 {
        if self.dimensions.is_empty() {
            return 0.0;
        }
        self.dimensions.values().sum::<f64>() / self.dimensions.len() as f64
    }
}

impl Record for VeracityRail {
    const KIND: RecordKind = RecordKind::Rail;
}

/// A partial change to a rail's dimensions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RailUpdate {
    changes: BTreeMap<Dimension, f64>,
}

impl RailUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, dimension: Dimension, weight: f64) -> Self {
        self.changes.insert(dimension, weight);
        self
    }

    /// Build an update from string keys
    pub fn from_pairs<'a, I>(pairs: I) -> NodeResult<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut update = Self::new();
        for (key, weight) in pairs {
            let dimension = Dimension::parse(key)?;
            check_weight(&dimension, weight)?;
            update.changes.insert(dimension, weight);
        }
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn validate(&self) -> NodeResult<()> {
        self.changes
            .iter()
            .try_for_each(|(dimension, weight)| check_weight(dimension, *weight))
    }
}

/// Read access to the local node's outbound edge weights
pub trait EdgeWeights: Send + Sync {
    /// Total weight of the rail toward `target`, 0.0 when there is none
    fn weight_to(&self, target: &NodeId) -> f64;

    /// Every target with an outbound rail
    fn targets(&self) -> Vec<NodeId>;
}

/// The local node's view of the trust graph
pub struct VeracitySystem {
    node_id: NodeId,
    store: Arc<dyn DocumentStore>,
    channel: Arc<dyn MessagingChannel>,
    events: EventBus,
    outbound: DashMap<NodeId, VeracityRail>,
    docs: DashMap<NodeId, DocRef>,
    inbound: DashMap<NodeId, VeracityRail>,
}

impl VeracitySystem {
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
            outbound: DashMap::new(),
            docs: DashMap::new(),
            inbound: DashMap::new(),
        }
    }

    /// Create or replace the rail toward `target` and announce it
    ///
    /// The rail becomes visible through [`get_rail`](Self::get_rail) only once
    /// it is stored and announced; on failure the previous rail stays in place.
    pub async fn create_rail(
        &self,
        target: NodeId,
        dimensions: BTreeMap<Dimension, f64>,
    ) -> NodeResult<VeracityRail> {
        for (dimension, weight) in &dimensions {
            check_weight(dimension, *weight)?;
        }

        let previous = self.get_rail(&target);
        let (doc, created) = self.rail_document(&target).await?;

        let mut rail = VeracityRail::new(self.node_id.clone(), target.clone(), dimensions);
        rail.doc_id = Some(doc.id());

        if let Err(e) = self.write_and_announce(&doc, &rail).await {
            warn!(target = %target.short_id(), error = %e, "Rail creation failed");
            self.roll_back(&target, &doc, created, previous.as_ref()).await;
            return Err(e);
        }
        self.outbound.insert(target.clone(), rail.clone());

        info!(
            target = %target.short_id(),
            weight = rail.total_weight(),
            doc = %doc.id().short_hex(),
            "Rail created"
        );
        Ok(rail)
    }

    /// The document backing rails toward `target`, and whether this call created it
    ///
    /// Concurrent first creations keep whichever document was registered first.
    async fn rail_document(&self, target: &NodeId) -> NodeResult<(DocRef, bool)> {
        if let Some(doc) = self.docs.get(target).map(|d| d.value().clone()) {
            return Ok((doc, false));
        }

        let fresh = self.store.create().await?;
        let doc = self
            .docs
            .entry(target.clone())
            .or_insert_with(|| fresh.clone())
            .value()
            .clone();
        let created = doc.id() == fresh.id();
        if !created {
            debug!(target = %target.short_id(), "Rail document already registered");
        }
        Ok((doc, created))
    }

    async fn write_and_announce(&self, doc: &DocRef, rail: &VeracityRail) -> NodeResult<()> {
        doc.set_bytes(RAIL_KEY, encode_record(rail)?).await?;
        let ticket = doc.share(ShareMode::Write).await?;
        self.channel
            .publish(GossipMessage::RailCreated {
                source_id: self.node_id.clone(),
                target_id: rail.target_id.clone(),
                ticket: ticket.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Undo a failed [`create_rail`](Self::create_rail)
    async fn roll_back(
        &self,
        target: &NodeId,
        doc: &DocRef,
        created: bool,
        previous: Option<&VeracityRail>,
    ) {
        if created {
            self.docs.remove_if(target, |_, d| d.id() == doc.id());
            return;
        }
        let Some(previous) = previous else {
            return;
        };
        let restored = match encode_record(previous) {
            Ok(bytes) => doc.set_bytes(RAIL_KEY, bytes).await.map_err(NodeError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = restored {
            warn!(target = %target.short_id(), error = %e, "Could not restore previous rail");
        }
    }

    /// Merge `update` into the rail toward `target`
    ///
    /// Returns `None` when there is no such rail.
    pub async fn update_rail(
        &self,
        target: &NodeId,
        update: RailUpdate,
    ) -> NodeResult<Option<VeracityRail>> {
        update.validate()?;

        let rail = {
            let Some(mut rail) = self.outbound.get_mut(target) else {
                return Ok(None);
            };
            rail.dimensions.extend(update.changes);
            rail.updated_at = Utc::now();
            rail.clone()
        };

        let doc = self.docs.get(target).map(|d| d.value().clone());
        if let Some(doc) = doc {
            doc.set_bytes(RAIL_KEY, encode_record(&rail)?).await?;
        }

        debug!(target = %target.short_id(), weight = rail.total_weight(), "Rail updated");
        Ok(Some(rail))
    }

    pub fn get_rail(&self, target: &NodeId) -> Option<VeracityRail> {
        self.outbound.get(target).map(|r| r.clone())
    }

    /// Every outbound rail, ordered by target
    pub fn rails(&self) -> Vec<VeracityRail> {
        let mut rails: Vec<VeracityRail> = self.outbound.iter().map(|r| r.clone()).collect();
        rails.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        rails
    }

    /// The rail `source` created toward this node, if received
    pub fn inbound_rail(&self, source: &NodeId) -> Option<VeracityRail> {
        self.inbound.get(source).map(|r| r.clone())
    }

    /// Every inbound rail, ordered by source
    pub fn inbound_rails(&self) -> Vec<VeracityRail> {
        let mut rails: Vec<VeracityRail> = self.inbound.iter().map(|r| r.clone()).collect();
        rails.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        rails
    }

    async fn receive(&self, source: &NodeId, ticket: &str) -> NodeResult<()> {
        let ticket = Ticket::parse(ticket)?;
        let doc = self.store.import_from_ticket(&ticket).await?;
        let bytes = doc
            .get_bytes(RAIL_KEY)
            .await?
            .ok_or_else(|| CodecError::Decode("rail document holds no rail".into()))?;
        let rail: VeracityRail = decode_record(&bytes)?;

        if &rail.source_id != source || rail.target_id != self.node_id {
            warn!(
                announced = %source.short_id(),
                stored = %rail.source_id.short_id(),
                "Ignoring rail whose endpoints do not match its announcement"
            );
            return Ok(());
        }

        let total_weight = rail.total_weight();
        self.inbound.insert(source.clone(), rail);

        info!(source = %source.short_id(), weight = total_weight, "Rail received");
        self.events
            .emit(
                names::RAIL_RECEIVED,
                json!({ "source_id": source.as_str(), "total_weight": total_weight }),
                &self.node_id,
            )
            .await;
        Ok(())
    }
}

impl EdgeWeights for VeracitySystem {
    fn weight_to(&self, target: &NodeId) -> f64 {
        self.outbound
            .get(target)
            .map(|r| r.total_weight())
            .unwrap_or(0.0)
    }

    fn targets(&self) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = self.outbound.iter().map(|r| r.key().clone()).collect();
        targets.sort();
        targets
    }
}

#[async_trait]
impl MessageObserver for VeracitySystem {
    async fn observe(&self, message: &GossipMessage) -> NodeResult<()> {
        match message {
            GossipMessage::RailCreated {
                source_id,
                target_id,
                ticket,
            } if target_id == &self.node_id && source_id != &self.node_id => {
                self.receive(source_id, ticket).await
            }
            _ => Ok(()),
        }
    }
}
