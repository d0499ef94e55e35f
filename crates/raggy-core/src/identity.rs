//! Node and document identifiers
//!
//! - [`NodeId`]: opaque string identity of a node, also used for any other
//!   entity referenced by the trust graph (rail targets, relationship
//!   subjects, cognition items)
//! - [`DocId`]: 32-byte content address of a replicated document

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Identity of a node or graph entity
///
/// Unique per node and stable for its process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a new identity from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        self.0.chars().take(12).collect()
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a replicated document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub [u8; 32]);

impl DocId {
    /// Create a document ID from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random document ID
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Derive a deterministic document ID from a label
    pub fn derive(label: &str) -> Self {
        Self(*blake3::hash(label.as_bytes()).as_bytes())
    }

    /// Get the underlying bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get a short hex form (for logging)
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for DocId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CodecError::Decode(e.to_string()))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            CodecError::Decode(format!("expected 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_short_id() {
        let id = NodeId::new("bootstrap-node-0001");
        assert_eq!(id.to_string(), "bootstrap-node-0001");
        assert_eq!(id.short_id(), "bootstrap-no");
        assert_eq!(NodeId::from("a"), NodeId::new("a".to_string()));
    }

    #[test]
    fn test_doc_id_hex_roundtrip() {
        let id = DocId::generate();
        let parsed: DocId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_doc_id_derive_is_deterministic() {
        assert_eq!(DocId::derive("doc1"), DocId::derive("doc1"));
        assert_ne!(DocId::derive("doc1"), DocId::derive("doc2"));
    }

    #[test]
    fn test_doc_id_rejects_wrong_length() {
        assert!("abcd".parse::<DocId>().is_err());
        assert!("not hex".parse::<DocId>().is_err());
    }
}
