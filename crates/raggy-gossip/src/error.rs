//! Error types for raggy-gossip

use raggy_core::TransportError;
use thiserror::Error;

/// Errors that can occur in the gossip layer
#[derive(Debug, Error)]
pub enum GossipError {
    /// Failed to subscribe to topic
    #[error("failed to subscribe to topic: {0}")]
    SubscribeFailed(String),

    /// Failed to broadcast message
    #[error("failed to broadcast message: {0}")]
    BroadcastFailed(String),

    /// Failed to encode message
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),

    /// Failed to decode message
    #[error("failed to decode message: {0}")]
    DecodeFailed(String),

    /// Signature verification failed
    #[error("signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// Already subscribed to topic
    #[error("already subscribed to topic")]
    AlreadySubscribed,

    /// Channel closed
    #[error("channel closed")]
    ChannelClosed,

    /// Generic gossip error
    #[error("gossip error: {0}")]
    Other(String),
}

impl From<postcard::Error> for GossipError {
    fn from(e: postcard::Error) -> Self {
        GossipError::EncodeFailed(e.to_string())
    }
}

impl From<GossipError> for TransportError {
    fn from(e: GossipError) -> Self {
        match e {
            GossipError::BroadcastFailed(_) | GossipError::EncodeFailed(_) => {
                TransportError::PublishFailed(e.to_string())
            }
            GossipError::DecodeFailed(_) | GossipError::SignatureVerificationFailed(_) => {
                TransportError::ReceiveFailed(e.to_string())
            }
            GossipError::ChannelClosed => TransportError::ChannelClosed,
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// Result type for gossip operations
pub type GossipResult<T> = Result<T, GossipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        let err: TransportError = GossipError::BroadcastFailed("no peers".into()).into();
        assert!(matches!(err, TransportError::PublishFailed(_)));
        assert!(err.to_string().contains("no peers"));

        let err: TransportError = GossipError::ChannelClosed.into();
        assert_eq!(err, TransportError::ChannelClosed);

        let err: TransportError = GossipError::AlreadySubscribed.into();
        assert!(matches!(err, TransportError::Other(_)));
    }
}
