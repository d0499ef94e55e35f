//! Modeled realities: named sets of entities with attributes, weighted
//! relationships and rules
//!
//! Realities are persisted to one document, rewritten after every change,
//! and can be merged in from a peer's document through a ticket.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use raggy_core::{
    DocRef, DocumentStore, NodeId, REALITIES_KEY, Record, RecordKind, Ticket, decode_record,
    encode_record,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{NodeError, NodeResult};

/// A typed attribute or rule value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Attribute {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl From<&str> for Attribute {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Attribute {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for Attribute {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Attribute {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: NodeId,
    pub attributes: BTreeMap<String, Attribute>,
    /// Weights toward other entities of the same reality, within [0, 1]
    pub relationships: BTreeMap<NodeId, f64>,
}

impl Entity {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reality {
    pub id: String,
    pub name: String,
    pub entities: BTreeMap<NodeId, Entity>,
    pub rules: BTreeMap<String, Attribute>,
    /// Bumped by every change; the newer copy wins a merge
    pub updated_at: DateTime<Utc>,
}

impl Reality {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entities: BTreeMap::new(),
            rules: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

/// The persisted reality list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealityRecords(pub Vec<Reality>);

impl Record for RealityRecords {
    const KIND: RecordKind = RecordKind::Realities;
}

pub struct RealityLayer {
    node_id: NodeId,
    store: Arc<dyn DocumentStore>,
    realities: DashMap<String, Reality>,
    next_id: AtomicU64,
    doc: RwLock<Option<DocRef>>,
}

impl RealityLayer {
    pub fn new(node_id: NodeId, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            node_id,
            store,
            realities: DashMap::new(),
            next_id: AtomicU64::new(0),
            doc: RwLock::new(None),
        }
    }

    /// Create the realities document and write the current set
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
        debug!(doc = %doc.id().short_hex(), "Realities document created");
        Ok(doc)
    }

    pub fn document(&self) -> Option<DocRef> {
        self.doc.read().clone()
    }

    pub async fn create_reality(&self, name: impl Into<String>) -> NodeResult<Reality> {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let reality = Reality::new(format!("{}/reality-{n}", self.node_id), name);
        self.realities.insert(reality.id.clone(), reality.clone());
        self.persist().await?;

        info!(reality = %reality.id, name = %reality.name, "Reality created");
        Ok(reality)
    }

    pub fn reality(&self, id: &str) -> Option<Reality> {
        self.realities.get(id).map(|r| r.clone())
    }

    /// Every reality, ordered by id
    pub fn realities(&self) -> Vec<Reality> {
        let mut all: Vec<Reality> = self.realities.iter().map(|r| r.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Add `entity` to a reality unless present
    ///
    /// Returns `None` when the reality does not exist.
    pub async fn add_entity(&self, reality_id: &str, entity: &NodeId) -> NodeResult<Option<Entity>> {
        self.modify(reality_id, |reality| {
            Some(
                reality
                    .entities
                    .entry(entity.clone())
                    .or_insert_with(|| Entity::new(entity.clone()))
                    .clone(),
            )
        })
        .await
    }

    /// Set one attribute of an existing entity
    pub async fn set_attribute(
        &self,
        reality_id: &str,
        entity: &NodeId,
        key: &str,
        value: impl Into<Attribute>,
    ) -> NodeResult<Option<Entity>> {
        let key = checked_key(key)?;
        let value = value.into();
        self.modify(reality_id, |reality| {
            let entity = reality.entities.get_mut(entity)?;
            entity.attributes.insert(key, value);
            Some(entity.clone())
        })
        .await
    }

    /// Weight the relationship from `from` to `to`; both must belong to the reality
    pub async fn relate(
        &self,
        reality_id: &str,
        from: &NodeId,
        to: &NodeId,
        weight: f64,
    ) -> NodeResult<Option<Entity>> {
        if !weight.is_finite() || !(0.0..=1.0).contains(&weight) {
            return Err(NodeError::InvalidWeight {
                field: format!("{from}->{to}"),
                value: weight,
            });
        }

        self.modify(reality_id, |reality| {
            if !reality.entities.contains_key(to) {
                return None;
            }
            let entity = reality.entities.get_mut(from)?;
            entity.relationships.insert(to.clone(), weight);
            Some(entity.clone())
        })
        .await
    }

    /// Set a rule; returns false when the reality does not exist
    pub async fn set_rule(
        &self,
        reality_id: &str,
        key: &str,
        value: impl Into<Attribute>,
    ) -> NodeResult<bool> {
        let key = checked_key(key)?;
        let value = value.into();
        let set = self
            .modify(reality_id, |reality| {
                reality.rules.insert(key, value);
                Some(())
            })
            .await?;
        Ok(set.is_some())
    }

    /// Merge the realities stored in the document behind `ticket`
    ///
    /// A reality is taken when it is unknown here or its copy is newer.
    /// Returns how many were taken.
    pub async fn load(&self, ticket: &Ticket) -> NodeResult<usize> {
        let doc = self.store.import_from_ticket(ticket).await?;
        let Some(bytes) = doc.get_bytes(REALITIES_KEY).await? else {
            return Ok(0);
        };
        let RealityRecords(incoming) = decode_record(&bytes)?;

        let mut taken = 0;
        for reality in incoming {
            match self.realities.entry(reality.id.clone()) {
                Entry::Occupied(mut current) => {
                    if reality.updated_at > current.get().updated_at {
                        current.insert(reality);
                        taken += 1;
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(reality);
                    taken += 1;
                }
            }
        }

        if taken > 0 {
            self.persist().await?;
        }
        debug!(doc = %ticket.doc_id.short_hex(), taken, "Realities loaded");
        Ok(taken)
    }

    /// Rewrite the realities document; a no-op before `initialize`
    pub async fn persist(&self) -> NodeResult<()> {
        let Some(doc) = self.doc.read().clone() else {
            return Ok(());
        };
        let records = RealityRecords(self.realities());
        doc.set_bytes(REALITIES_KEY, encode_record(&records)?).await?;
        Ok(())
    }

    /// Apply `change` to one reality, then persist if it reported a change
    async fn modify<T, F>(&self, reality_id: &str, change: F) -> NodeResult<Option<T>>
    where
        F: FnOnce(&mut Reality) -> Option<T>,
    {
        let outcome = {
            let Some(mut reality) = self.realities.get_mut(reality_id) else {
                return Ok(None);
            };
            let outcome = change(reality.value_mut());
            if outcome.is_some() {
                reality.updated_at = Utc::now();
            }
            outcome
        };

        if outcome.is_some() {
            self.persist().await?;
        }
        Ok(outcome)
    }
}

fn checked_key(key: &str) -> NodeResult<String> {
    let key = key.trim();
    if key.is_empty() {
        return Err(NodeError::UnknownField(key.to_string()));
    }
    Ok(key.to_string())
}

#[cfg(test)]
mod tests {
    use raggy_core::{MemoryNetwork, ShareMode};

    use super::*;

    fn layer(network: &MemoryNetwork, id: &str) -> RealityLayer {
        RealityLayer::new(NodeId::from(id), network.store())
    }

    #[tokio::test]
    async fn test_entities_attributes_and_relationships() {
        let network = MemoryNetwork::new();
        let realities = layer(&network, "A");
        let world = realities.create_reality("garden").await.unwrap();
        let (tree, bird) = (NodeId::from("tree"), NodeId::from("bird"));

        realities.add_entity(&world.id, &tree).await.unwrap().unwrap();
        realities.add_entity(&world.id, &bird).await.unwrap().unwrap();
        realities
            .set_attribute(&world.id, &tree, "height", 12.5)
            .await
            .unwrap();
        let tree_entity = realities
            .relate(&world.id, &tree, &bird, 0.8)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(tree_entity.attributes["height"], Attribute::Number(12.5));
        assert_eq!(tree_entity.relationships[&bird], 0.8);
        assert!(realities.set_rule(&world.id, "seasons", true).await.unwrap());

        // Adding again keeps what the entity already has
        let again = realities.add_entity(&world.id, &tree).await.unwrap().unwrap();
        assert_eq!(again, tree_entity);

        let stored = realities.reality(&world.id).unwrap();
        assert_eq!(stored.entities.len(), 2);
        assert_eq!(stored.rules["seasons"], Attribute::Flag(true));
        assert!(stored.updated_at >= world.updated_at);
    }

    #[tokio::test]
    async fn test_missing_targets_are_lookup_misses() {
        let network = MemoryNetwork::new();
        let realities = layer(&network, "A");
        let world = realities.create_reality("empty").await.unwrap();
        let ghost = NodeId::from("ghost");

        assert!(realities.add_entity("nowhere", &ghost).await.unwrap().is_none());
        assert!(
            realities
                .set_attribute(&world.id, &ghost, "color", "grey")
                .await
                .unwrap()
                .is_none()
        );
        assert!(!realities.set_rule("nowhere", "gravity", 9.8).await.unwrap());

        realities.add_entity(&world.id, &NodeId::from("a")).await.unwrap();
        assert!(
            realities
                .relate(&world.id, &NodeId::from("a"), &ghost, 0.5)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_invalid_weights_and_keys_are_rejected() {
        let network = MemoryNetwork::new();
        let realities = layer(&network, "A");
        let world = realities.create_reality("w").await.unwrap();
        let a = NodeId::from("a");

        for bad in [1.5, -0.1, f64::NAN] {
            assert!(matches!(
                realities.relate(&world.id, &a, &a, bad).await,
                Err(NodeError::InvalidWeight { .. })
            ));
        }
        assert!(matches!(
            realities.set_rule(&world.id, "  ", 1.0).await,
            Err(NodeError::UnknownField(_))
        ));
    }

    #[tokio::test]
    async fn test_persisted_realities_load_into_another_layer() {
        let network = MemoryNetwork::new();
        let a = layer(&network, "A");
        let doc = a.initialize().await.unwrap();
        let world = a.create_reality("shared").await.unwrap();
        a.add_entity(&world.id, &NodeId::from("river")).await.unwrap();
        a.set_attribute(&world.id, &NodeId::from("river"), "name", "Aare")
            .await
            .unwrap();

        let b = layer(&network, "B");
        let ticket = doc.share(ShareMode::Read).await.unwrap();
        assert_eq!(b.load(&ticket).await.unwrap(), 1);
        assert_eq!(b.reality(&world.id), a.reality(&world.id));

        // Nothing newer on a second load
        assert_eq!(b.load(&ticket).await.unwrap(), 0);

        a.set_rule(&world.id, "flows", true).await.unwrap();
        assert_eq!(b.load(&ticket).await.unwrap(), 1);
        assert_eq!(
            b.reality(&world.id).unwrap().rules["flows"],
            Attribute::Flag(true)
        );
    }

    #[tokio::test]
    async fn test_document_decodes_only_as_realities() {
        let network = MemoryNetwork::new();
        let a = layer(&network, "A");
        let doc = a.initialize().await.unwrap();
        a.create_reality("one").await.unwrap();

        let bytes = doc.get_bytes(REALITIES_KEY).await.unwrap().unwrap();
        let records: RealityRecords = decode_record(&bytes).unwrap();
        assert_eq!(records.0.len(), 1);
        assert!(decode_record::<crate::ThoughtRecords>(&bytes).is_err());
    }
}
