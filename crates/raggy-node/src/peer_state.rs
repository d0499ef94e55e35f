//! Known peers and their liveness
//!
//! Only the sync engine adds peers and only the liveness monitor removes
//! them, so the mutators here are crate-private.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use raggy_core::{DocId, NodeId, Record, RecordKind};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A node's published view of itself, stored under the `state` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    pub node_id: NodeId,
    pub last_seen: DateTime<Utc>,
    pub docs: Vec<DocId>,
}

impl PeerSnapshot {
    pub fn new(node_id: NodeId, docs: Vec<DocId>) -> Self {
        Self {
            node_id,
            last_seen: Utc::now(),
            docs,
        }
    }

    /// Fold a newer observation of the same peer into this one
    fn merge(&mut self, other: PeerSnapshot) {
        if other.last_seen > self.last_seen {
            self.last_seen = other.last_seen;
        }
        for doc in other.docs {
            if !self.docs.contains(&doc) {
                self.docs.push(doc);
            }
        }
    }
}

impl Record for PeerSnapshot {
    const KIND: RecordKind = RecordKind::NodeState;
}

#[derive(Debug, Clone)]
struct PeerEntry {
    snapshot: PeerSnapshot,
    observed_at: Instant,
}

/// Table of peers this node has joined, keyed by identity
#[derive(Debug)]
pub struct PeerState {
    local_id: NodeId,
    peers: DashMap<NodeId, PeerEntry>,
}

impl PeerState {
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            peers: DashMap::new(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn get(&self, id: &NodeId) -> Option<PeerSnapshot> {
        self.peers.get(id).map(|e| e.snapshot.clone())
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Identities of every known peer, sorted
    pub fn peer_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// When this node last heard from `id`
    pub fn observed_at(&self, id: &NodeId) -> Option<Instant> {
        self.peers.get(id).map(|e| e.observed_at)
    }

    /// Insert or merge a snapshot; returns true when the peer is new
    ///
    /// The local node's own snapshot is ignored.
    pub(crate) fn merge(&self, snapshot: PeerSnapshot) -> bool {
        if snapshot.node_id == self.local_id {
            return false;
        }

        let now = Instant::now();
        match self.peers.entry(snapshot.node_id.clone()) {
            Entry::Occupied(mut entry) => {
                let entry = entry.get_mut();
                entry.snapshot.merge(snapshot);
                entry.observed_at = now;
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(PeerEntry {
                    snapshot,
                    observed_at: now,
                });
                true
            }
        }
    }

    /// Refresh a known peer; unknown peers are left absent
    pub(crate) fn touch(&self, id: &NodeId, last_seen: DateTime<Utc>) -> bool {
        match self.peers.get_mut(id) {
            Some(mut entry) => {
                if last_seen > entry.snapshot.last_seen {
                    entry.snapshot.last_seen = last_seen;
                }
                entry.observed_at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Peers not heard from within `window` as of `now`
    pub(crate) fn expired(&self, window: Duration, now: Instant) -> Vec<NodeId> {
        self.peers
            .iter()
            .filter(|e| now.duration_since(e.observed_at) > window)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Remove `id` if it is still stale; a refresh in between keeps it
    pub(crate) fn remove_if_stale(&self, id: &NodeId, window: Duration, now: Instant) -> bool {
        self.peers
            .remove_if(id, |_, e| now.duration_since(e.observed_at) > window)
            .is_some()
    }

    pub(crate) fn remove(&self, id: &NodeId) -> Option<PeerSnapshot> {
        self.peers.remove(id).map(|(_, e)| e.snapshot)
    }
}
