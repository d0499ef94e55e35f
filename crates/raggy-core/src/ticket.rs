//! Capability tickets for joining replicated documents.
//!
//! Tickets travel as text inside gossip messages and document values.
//!
//! # Format
//!
//! ```text
//! raggy:doc:<base64-encoded-postcard-ticket>
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::identity::DocId;

/// The URI scheme prefix for document tickets.
const TICKET_PREFIX: &str = "raggy:doc:";

/// Access scope granted by a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareMode {
    /// The holder may replicate and read the document
    Read,
    /// The holder may also write to the document
    Write,
}

impl fmt::Display for ShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// A capability token redeemable against a [`DocumentStore`](crate::DocumentStore)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    /// The document this ticket grants access to
    pub doc_id: DocId,
    /// Access scope
    pub mode: ShareMode,
}

impl Ticket {
    /// Create a new ticket
    pub fn new(doc_id: DocId, mode: ShareMode) -> Self {
        Self { doc_id, mode }
    }

    /// Whether the ticket grants write access
    pub fn is_writable(&self) -> bool {
        self.mode == ShareMode::Write
    }

    /// Convert to raw base64-encoded form
    pub fn to_base64(&self) -> Result<String, CodecError> {
        let bytes = postcard::to_allocvec(self).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Parse a ticket from text
    ///
    /// Accepts both the full URI format (`raggy:doc:...`) and raw
    /// base64-encoded tickets.
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        let s = s.trim();

        let base64_part = if let Some(stripped) = s.strip_prefix(TICKET_PREFIX) {
            stripped
        } else if s.starts_with("raggy:") {
            return Err(CodecError::InvalidTicket(
                "Unknown ticket type (expected 'doc')".to_string(),
            ));
        } else {
            s
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(base64_part)
            .map_err(|e| CodecError::InvalidTicket(e.to_string()))?;

        postcard::from_bytes(&bytes)
            .map_err(|e| CodecError::InvalidTicket(format!("Invalid ticket data: {}", e)))
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_base64().map_err(|_| fmt::Error)?;
        write!(f, "{}{}", TICKET_PREFIX, encoded)
    }
}

impl FromStr for Ticket {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_uri_roundtrip() {
        let ticket = Ticket::new(DocId::generate(), ShareMode::Write);
        let text = ticket.to_string();
        assert!(text.starts_with(TICKET_PREFIX));

        let parsed: Ticket = text.parse().unwrap();
        assert_eq!(parsed, ticket);
        assert!(parsed.is_writable());
    }

    #[test]
    fn test_ticket_parses_raw_base64() {
        let ticket = Ticket::new(DocId::derive("state"), ShareMode::Read);
        let raw = ticket.to_base64().unwrap();
        assert_eq!(Ticket::parse(&raw).unwrap(), ticket);
    }

    #[test]
    fn test_ticket_rejects_unknown_kind() {
        let err = Ticket::parse("raggy:realm:AAAA").unwrap_err();
        assert!(matches!(err, CodecError::InvalidTicket(_)));
    }

    #[test]
    fn test_ticket_rejects_garbage() {
        assert!(Ticket::parse("raggy:doc:!!!not-base64!!!").is_err());
        assert!(Ticket::parse("").is_err());
    }
}
