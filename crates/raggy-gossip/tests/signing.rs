//! Signing and wire-format tests for raggy-gossip
//!
//! These run without network access.

use iroh::SecretKey;
use raggy_core::{DocId, GossipMessage, NodeId, ShareMode, Ticket};
use raggy_gossip::{GossipError, SignedMessage, WireMessage};

fn all_messages() -> Vec<GossipMessage> {
    let ticket = Ticket::new(DocId::derive("rail"), ShareMode::Write).to_string();
    vec![
        GossipMessage::heartbeat(NodeId::from("A")),
        GossipMessage::TicketShare {
            node_id: NodeId::from("A"),
            ticket: ticket.clone(),
        },
        GossipMessage::RailCreated {
            source_id: NodeId::from("A"),
            target_id: NodeId::from("B"),
            ticket,
        },
        GossipMessage::Defederation {
            issuer: NodeId::from("A"),
            entity_id: NodeId::from("X"),
            reason: "abuse".to_string(),
        },
        GossipMessage::NodeJoin {
            node_id: NodeId::from("C"),
            ticket: None,
        },
    ]
}

#[test]
fn test_every_message_kind_survives_signing() {
    let secret_key = SecretKey::generate(&mut rand::rng());

    for message in all_messages() {
        let encoded = SignedMessage::sign_and_encode(&secret_key, &message)
            .unwrap_or_else(|e| panic!("Failed to sign {}: {}", message.kind(), e));
        let received = SignedMessage::verify_and_decode(&encoded)
            .unwrap_or_else(|e| panic!("Failed to verify {}: {}", message.kind(), e));

        assert_eq!(received.from, secret_key.public());
        assert_eq!(received.message.kind(), message.kind());
        assert_eq!(received.message, message);
    }
}

#[test]
fn test_signature_verification_failure() {
    let secret_key = SecretKey::generate(&mut rand::rng());
    let mut failures = 0;

    let messages = all_messages();
    for message in &messages {
        let mut encoded = SignedMessage::sign_and_encode(&secret_key, message).unwrap();

        // Flip a byte inside the signed data
        let tamper_idx = encoded.len() / 2;
        encoded[tamper_idx] ^= 0xFF;

        if SignedMessage::verify_and_decode(&encoded).is_err() {
            failures += 1;
        }
    }

    assert_eq!(failures, messages.len(), "Failed to detect some tampered messages");
}

#[test]
fn test_resigned_payload_with_foreign_key_is_rejected() {
    let honest = SecretKey::generate(&mut rand::rng());
    let forger = SecretKey::generate(&mut rand::rng());
    let message = GossipMessage::heartbeat(NodeId::from("A"));

    let encoded = SignedMessage::sign_and_encode(&honest, &message).unwrap();
    let mut signed: SignedMessage = postcard::from_bytes(&encoded).unwrap();

    // Keep the honest sender but swap in a signature from another key
    signed.signature = forger.sign(&signed.data);
    let forged = postcard::to_allocvec(&signed).unwrap();

    let err = SignedMessage::verify_and_decode(&forged).unwrap_err();
    assert!(matches!(err, GossipError::SignatureVerificationFailed(_)));
}

#[test]
fn test_signed_non_message_payload_is_rejected() {
    let secret_key = SecretKey::generate(&mut rand::rng());

    let wire = WireMessage::V0 {
        timestamp_micros: 1,
        payload: b"print('hello')".to_vec(),
    };
    let data = postcard::to_allocvec(&wire).unwrap();
    let signed = SignedMessage {
        from: secret_key.public(),
        signature: secret_key.sign(&data),
        data,
    };
    let bytes = postcard::to_allocvec(&signed).unwrap();

    let err = SignedMessage::verify_and_decode(&bytes).unwrap_err();
    assert!(matches!(err, GossipError::DecodeFailed(_)));
}

#[test]
fn test_encoding_overhead_is_bounded() {
    let secret_key = SecretKey::generate(&mut rand::rng());
    let message = GossipMessage::heartbeat(NodeId::from("A"));

    let payload_len = message.to_bytes().unwrap().len();
    let encoded = SignedMessage::sign_and_encode(&secret_key, &message).unwrap();

    // Public key, signature and envelope headers
    assert!(encoded.len() > payload_len + 64);
    assert!(encoded.len() < payload_len + 256);
}
