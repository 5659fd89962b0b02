//! Error types for seclink core.
//!
//! The taxonomy follows the protocol's error design: argument errors are
//! explicit variants carried to the caller, cryptographic and format
//! errors fail closed at the point of decryption, and protocol-state
//! errors are logged no-ops at the channel layer. Nothing here unwinds
//! into the transport's dispatch loop.

use thiserror::Error;

use seclink_crypto::cipher::CipherError;
use seclink_crypto::exchange::ExchangeError;

use crate::registry::DispatchError;
use crate::transport::TransportError;
use crate::wire::EnvelopeError;

/// Unified error type for secure channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Key exchange error
    #[error("key exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Cipher error
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    /// Envelope seal/open error
    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Transport emit error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Dispatch error
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Operation requires a derived shared key
    #[error("no shared key derived")]
    NoSharedKey,

    /// Encrypted traffic received before the key share finished
    #[error("key share not finished")]
    NotReady,

    /// Handshake proof failed verification
    #[error("handshake proof rejected: {0}")]
    ProofRejected(&'static str),

    /// A handshake step completed against a reset channel
    #[error("stale handshake generation")]
    StaleGeneration,
}
