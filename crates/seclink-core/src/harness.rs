//! Test harness for seclink core functionality.
//!
//! Provides an in-memory recording transport and a scripted remote peer
//! that plays the server side of the handshake, used by the integration
//! tests and the demo binary.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use seclink_crypto::exchange::{KeyExchange, SHARED_KEY_SIZE};
use seclink_crypto::utils::constant_time_compare;

use crate::channel::SecureChannel;
use crate::transport::{Transport, TransportError};
use crate::wire::{self, Envelope, HandshakeOffer, HandshakeProof};

/// In-memory transport that records every emitted event.
pub struct RecordingTransport {
    id: String,
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// All `(event, payload)` pairs emitted so far.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("lock").clone()
    }

    /// The most recent payload emitted on `event`, if any.
    pub fn last_on(&self, event: &str) -> Option<String> {
        self.sent
            .lock()
            .expect("lock")
            .iter()
            .rev()
            .find(|(e, _)| e == event)
            .map(|(_, p)| p.clone())
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.sent.lock().expect("lock"))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn emit(&self, event: &str, payload: &str) -> Result<(), TransportError> {
        self.sent
            .lock()
            .expect("lock")
            .push((event.to_string(), payload.to_string()));
        Ok(())
    }
}

/// Scripted remote peer playing the handshake-initiating side.
pub struct ScriptedPeer {
    exchange: KeyExchange,
}

impl ScriptedPeer {
    pub fn new() -> Self {
        let mut exchange = KeyExchange::new();
        exchange.initialize();
        Self { exchange }
    }

    /// The offer payload that opens the handshake.
    pub fn offer(&self) -> String {
        serde_json::to_string(&HandshakeOffer {
            public_key: B64.encode(self.exchange.public_key()),
        })
        .expect("json")
    }

    /// Consume the channel's public-key reply and derive the secret.
    pub fn accept_reply(&mut self, reply_b64: &str) {
        let channel_pub = B64.decode(reply_b64.trim()).expect("base64 reply");
        self.exchange.finish(&channel_pub).expect("finish");
    }

    pub fn shared_key(&self) -> &[u8; SHARED_KEY_SIZE] {
        self.exchange.shared_key().expect("shared key derived")
    }

    /// Open the channel's proof envelope and return the claimed proof.
    pub fn open_proof(&self, sealed: &str) -> HandshakeProof {
        let envelope = wire::open(self.shared_key(), sealed).expect("proof envelope");
        assert_eq!(envelope.event_name, wire::HANDSHAKE_FINISH_EVENT);
        serde_json::from_str(&envelope.payload).expect("proof payload")
    }

    /// Build the confirmation this peer reflects back after verifying
    /// the channel's proof.
    pub fn confirm(&self, socket_id: &str) -> String {
        self.confirm_with_secret(socket_id, self.shared_key())
    }

    /// Confirmation carrying an arbitrary claimed secret, for exercising
    /// the mismatch path.
    pub fn confirm_with_secret(&self, socket_id: &str, secret: &[u8]) -> String {
        let proof = HandshakeProof {
            socket_id: socket_id.to_string(),
            shared_secret: B64.encode(secret),
        };
        let envelope = Envelope {
            event_name: wire::HANDSHAKE_FINISH_EVENT.to_string(),
            payload: serde_json::to_string(&proof).expect("json"),
        };
        wire::seal(self.shared_key(), &envelope).expect("seal")
    }

    /// Seal an application envelope as the remote side would.
    pub fn seal_event(&self, event_name: &str, payload_json: &str) -> String {
        let envelope = Envelope {
            event_name: event_name.to_string(),
            payload: payload_json.to_string(),
        };
        wire::seal(self.shared_key(), &envelope).expect("seal")
    }

    /// Open an application envelope the channel emitted.
    pub fn open_event(&self, sealed: &str) -> Envelope {
        wire::open(self.shared_key(), sealed).expect("open")
    }
}

impl Default for ScriptedPeer {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive a complete handshake between a channel and a scripted peer.
///
/// 1. Peer sends its offer
/// 2. Channel replies with its public key; peer derives the secret
/// 3. Channel proves possession in a sealed envelope; peer verifies it
/// 4. Peer reflects the confirmation; channel marks the share finished
pub async fn run_handshake(
    channel: &mut SecureChannel,
    peer: &mut ScriptedPeer,
    transport: &RecordingTransport,
    now_unix: u64,
) {
    channel
        .handle_event(wire::HANDSHAKE_EVENT, &peer.offer(), now_unix)
        .await;

    let reply = transport
        .last_on(wire::HANDSHAKE_EVENT)
        .expect("channel replied with its public key");
    peer.accept_reply(&reply);

    let proof_sealed = transport
        .last_on(wire::HANDSHAKE_FINISH_EVENT)
        .expect("channel sent its proof envelope");
    let proof = peer.open_proof(&proof_sealed);

    let claimed = B64.decode(proof.shared_secret.trim()).expect("base64 secret");
    assert!(
        constant_time_compare(&claimed, peer.shared_key()),
        "channel proof must carry the derived secret"
    );

    let confirm = peer.confirm(&proof.socket_id);
    channel
        .handle_event(wire::HANDSHAKE_FINISH_EVENT, &confirm, now_unix)
        .await;
}
