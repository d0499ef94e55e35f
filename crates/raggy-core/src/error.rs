//! Error types shared across the Raggy stack

use thiserror::Error;

/// Failures of the Document Store or Messaging Channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Document is read-only: {0}")]
    ReadOnly(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Transport failure: {0}")]
    Other(String),
}

/// Errors raised while encoding or decoding persisted records and tickets
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),

    #[error("Record kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: String, actual: String },

    #[error("Invalid ticket: {0}")]
    InvalidTicket(String),
}

impl From<postcard::Error> for CodecError {
    fn from(e: postcard::Error) -> Self {
        CodecError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::DocumentNotFound("abc123".to_string());
        assert!(format!("{}", err).contains("Document not found"));
        assert!(format!("{}", err).contains("abc123"));

        assert!(format!("{}", TransportError::ChannelClosed).contains("closed"));

        let err = TransportError::ReadOnly("doc".to_string());
        assert!(format!("{}", err).contains("read-only"));
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::KindMismatch {
            expected: "rail".to_string(),
            actual: "node_state".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("rail"));
        assert!(msg.contains("node_state"));

        let err = CodecError::InvalidTicket("bad base64".to_string());
        assert!(format!("{}", err).contains("bad base64"));
    }

    #[test]
    fn test_postcard_failures_become_decode_errors() {
        let err: CodecError = postcard::from_bytes::<u64>(&[]).unwrap_err().into();
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(format!("{}", err).contains("Decoding failed"));
    }
}
