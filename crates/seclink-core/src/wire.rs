//! Wire format for the secure channel protocol.
//!
//! Everything on the wire is JSON carried as opaque strings over the
//! transport's named events. Binary fields (public keys, shared secrets,
//! encrypted buffers) are base64-encoded. Application messages travel as
//! an [`Envelope`] encrypted under the shared key and base64-encoded.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use seclink_crypto::cipher::{self, CipherError};

/// Outer event carrying the server's handshake offer and the client's
/// public-key reply.
pub const HANDSHAKE_EVENT: &str = "handshake";

/// Outer event carrying the encrypted handshake proof in both directions.
pub const HANDSHAKE_FINISH_EVENT: &str = "handshake-finish";

/// Outer event carrying application envelopes once the handshake is done.
pub const SECURE_EVENT: &str = "enc";

/// Error type for envelope sealing and opening.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("encryption failed: {0}")]
    Encrypt(#[from] CipherError),
    #[error("decryption failed")]
    DecryptFailed,
}

/// Inner message carried inside an encrypted buffer.
///
/// The outer transport event name is a routing constant; `event_name`
/// here is the application-level name resolved against the dispatch
/// registry after decryption. `payload` is a JSON document kept as a
/// string and decoded against the handler's declared parameter shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "eventName")]
    pub event_name: String,
    pub payload: String,
}

/// Handshake offer: the remote side's public key, base64-encoded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeOffer {
    #[serde(rename = "pub")]
    pub public_key: String,
}

/// Handshake proof: the first encrypted message, proving possession of
/// the derived secret by carrying it under its own encryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeProof {
    #[serde(rename = "socketId")]
    pub socket_id: String,
    #[serde(rename = "sharedSecret")]
    pub shared_secret: String,
}

/// Seal an envelope: JSON-encode, encrypt under `key`, base64-encode.
pub fn seal(key: &[u8], envelope: &Envelope) -> Result<String, EnvelopeError> {
    let json = serde_json::to_vec(envelope)?;
    let blob = cipher::encrypt(key, &json)?;
    Ok(B64.encode(blob))
}

/// Open a sealed envelope: base64-decode, decrypt under `key`, parse.
///
/// A bad base64 payload, truncated buffer, padding mismatch, or invalid
/// JSON all surface as errors here; nothing panics on forged input.
pub fn open(key: &[u8], payload_b64: &str) -> Result<Envelope, EnvelopeError> {
    let blob = B64.decode(payload_b64.trim())?;
    let plaintext = cipher::decrypt(key, &blob).ok_or(EnvelopeError::DecryptFailed)?;
    Ok(serde_json::from_slice(&plaintext)?)
}
