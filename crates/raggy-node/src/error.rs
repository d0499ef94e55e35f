//! Error types for Raggy nodes

use raggy_core::{CodecError, TransportError};
use thiserror::Error;

/// Failures of a `join_network` call
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JoinError {
    /// The ticket could not be redeemed
    #[error("Failed to redeem ticket: {0}")]
    Redeem(TransportError),

    /// A joined document could not be read
    #[error("Failed to read document: {0}")]
    Read(TransportError),

    /// The document's state record is malformed
    #[error("Invalid state record: {0}")]
    State(CodecError),

    /// An embedded ticket is malformed
    #[error("Invalid embedded ticket: {0}")]
    InvalidTicket(CodecError),
}

/// Errors that can occur in a Raggy node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Operation requires a started node
    #[error("Node not initialized")]
    NotInitialized,

    /// Node already started
    #[error("Node already started")]
    AlreadyStarted,

    /// The liveness monitor was stopped and cannot restart
    #[error("Liveness monitor stopped")]
    LivenessStopped,

    /// Document store or messaging channel failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Joining a peer's document failed
    #[error("Join failed: {0}")]
    Join(#[from] JoinError),

    /// Encoding or decoding failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A weight is non-finite or outside [0, 1]
    #[error("Invalid weight for {field}: {value}")]
    InvalidWeight { field: String, value: f64 },

    /// An entropy score is non-finite or negative
    #[error("Invalid entropy: {0}")]
    InvalidEntropy(f64),

    /// A key does not name an updatable field
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A background task panicked or could not be joined
    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert!(NodeError::NotInitialized.to_string().contains("not initialized"));

        let err = NodeError::InvalidWeight {
            field: "alignment".into(),
            value: 1.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("alignment"));
        assert!(msg.contains("1.5"));
    }

    #[test]
    fn test_join_error_conversion() {
        let err: NodeError =
            JoinError::Redeem(TransportError::DocumentNotFound("ab12".into())).into();
        assert!(matches!(err, NodeError::Join(JoinError::Redeem(_))));
        assert!(err.to_string().contains("ab12"));
    }
}
