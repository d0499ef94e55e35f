//! Signed message encoding for gossip broadcast
//!
//! Every [`GossipMessage`] is wrapped in a versioned [`WireMessage`] and
//! signed with the sender's endpoint key before it leaves the node.

use iroh::{PublicKey, SecretKey, Signature};
use raggy_core::GossipMessage;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{GossipError, GossipResult};

/// A signed message ready for gossip broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedMessage {
    /// Public key of the sender
    pub from: PublicKey,
    /// Serialized [`WireMessage`]
    pub data: Vec<u8>,
    /// Signature over the data
    pub signature: Signature,
}

impl SignedMessage {
    /// Sign and encode a message for broadcast
    pub fn sign_and_encode(secret_key: &SecretKey, message: &GossipMessage) -> GossipResult<Vec<u8>> {
        let timestamp_micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;

        let wire_message = WireMessage::V0 {
            timestamp_micros,
            payload: message
                .to_bytes()
                .map_err(|e| GossipError::EncodeFailed(e.to_string()))?,
        };

        let data = postcard::to_allocvec(&wire_message)?;
        let signature = secret_key.sign(&data);

        let signed = SignedMessage {
            from: secret_key.public(),
            data,
            signature,
        };

        postcard::to_allocvec(&signed).map_err(Into::into)
    }

    /// Verify the signature and decode the enclosed message
    pub fn verify_and_decode(bytes: &[u8]) -> GossipResult<ReceivedMessage> {
        let signed: SignedMessage =
            postcard::from_bytes(bytes).map_err(|e| GossipError::DecodeFailed(e.to_string()))?;

        signed
            .from
            .verify(&signed.data, &signed.signature)
            .map_err(|e| GossipError::SignatureVerificationFailed(e.to_string()))?;

        let wire_message: WireMessage = postcard::from_bytes(&signed.data)
            .map_err(|e| GossipError::DecodeFailed(e.to_string()))?;

        let WireMessage::V0 {
            timestamp_micros,
            payload,
        } = wire_message;

        let message = GossipMessage::from_bytes(&payload)
            .map_err(|e| GossipError::DecodeFailed(e.to_string()))?;

        Ok(ReceivedMessage {
            from: signed.from,
            timestamp_micros,
            message,
        })
    }
}

/// Wire format for gossip messages (versioned for future compatibility)
#[derive(Debug, Serialize, Deserialize)]
pub enum WireMessage {
    /// Version 0 format
    V0 {
        /// Send time in microseconds since UNIX epoch
        timestamp_micros: u64,
        /// Postcard-encoded [`GossipMessage`]
        payload: Vec<u8>,
    },
}

/// A received and verified message
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Public key of the sender
    pub from: PublicKey,
    /// Send time in microseconds since UNIX epoch
    pub timestamp_micros: u64,
    /// The decoded message
    pub message: GossipMessage,
}
