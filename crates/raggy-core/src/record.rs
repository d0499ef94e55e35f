//! Versioned, kind-tagged encoding for persisted records
//!
//! Every value a node writes into a replicated document goes through
//! [`encode_record`]. The envelope names the record kind so a value written
//! as one kind can never be decoded as another.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::CodecError;

/// Document key holding a node's state snapshot
pub const STATE_KEY: &[u8] = b"state";
/// Document key holding a read ticket for a companion document
pub const MAIN_READ_KEY: &[u8] = b"main_read";
/// Document key holding a write ticket for a companion document
pub const MAIN_WRITE_KEY: &[u8] = b"main_write";
/// Document key holding a veracity rail
pub const RAIL_KEY: &[u8] = b"rail";
/// Document key holding the relationship table
pub const RELATIONSHIPS_KEY: &[u8] = b"relationships";
/// Document key holding cognition items
pub const THOUGHTS_KEY: &[u8] = b"thoughts";
/// Document key holding modeled realities
pub const REALITIES_KEY: &[u8] = b"realities";

/// Keys whose values are tickets the sync engine follows
pub const TICKET_KEYS: &[&[u8]] = &[MAIN_READ_KEY, MAIN_WRITE_KEY];

/// Closed set of persisted record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    NodeState,
    Rail,
    Relationships,
    Thoughts,
    Realities,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeState => write!(f, "node_state"),
            Self::Rail => write!(f, "rail"),
            Self::Relationships => write!(f, "relationships"),
            Self::Thoughts => write!(f, "thoughts"),
            Self::Realities => write!(f, "realities"),
        }
    }
}

/// A value with a fixed schema that may be stored in a document
pub trait Record: Serialize + DeserializeOwned {
    /// The kind tag written into the envelope
    const KIND: RecordKind;
}

/// Wire format for persisted records (versioned for future compatibility)
#[derive(Debug, Serialize, Deserialize)]
pub enum RecordEnvelope {
    /// Version 0 format
    V0 {
        /// Kind of the encoded payload
        kind: RecordKind,
        /// Postcard-encoded record
        payload: Vec<u8>,
    },
}

impl RecordEnvelope {
    /// Kind of the enclosed record
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::V0 { kind, .. } => *kind,
        }
    }
}

/// Encode a record into its enveloped byte form
pub fn encode_record<R: Record>(record: &R) -> Result<Vec<u8>, CodecError> {
    let payload = postcard::to_allocvec(record).map_err(|e| CodecError::Encode(e.to_string()))?;
    let envelope = RecordEnvelope::V0 {
        kind: R::KIND,
        payload,
    };
    postcard::to_allocvec(&envelope).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decode a record, checking the envelope's kind tag
pub fn decode_record<R: Record>(bytes: &[u8]) -> Result<R, CodecError> {
    let envelope: RecordEnvelope =
        postcard::from_bytes(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;

    let RecordEnvelope::V0 { kind, payload } = envelope;
    if kind != R::KIND {
        return Err(CodecError::KindMismatch {
            expected: R::KIND.to_string(),
            actual: kind.to_string(),
        });
    }

    postcard::from_bytes(&payload).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        weight: f64,
    }

    impl Record for Sample {
        const KIND: RecordKind = RecordKind::Rail;
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct OtherSample {
        count: u32,
    }

    impl Record for OtherSample {
        const KIND: RecordKind = RecordKind::Thoughts;
    }

    #[test]
    fn test_record_roundtrip() {
        let sample = Sample {
            name: "edge".to_string(),
            weight: 0.25,
        };
        let bytes = encode_record(&sample).unwrap();
        let decoded: Sample = decode_record(&bytes).unwrap();
        assert_eq!(decoded, sample);
    }

    #[test]
    fn test_kind_mismatch_is_rejected() {
        let bytes = encode_record(&OtherSample { count: 3 }).unwrap();
        let err = decode_record::<Sample>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::KindMismatch { .. }));
    }

    #[test]
    fn test_arbitrary_text_is_not_a_record() {
        let err = decode_record::<Sample>(b"{'name': 'edge', 'weight': 0.25}").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_) | CodecError::KindMismatch { .. }));
    }
}
