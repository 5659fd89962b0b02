//! Transport boundary for seclink channels.
//!
//! The transport is an external collaborator: a connection object that
//! delivers opaque payloads on named events and exposes a stable
//! per-connection id. Reliability, reconnection, and multiplexing are
//! owned by the transport, not by this crate. Inbound events reach a
//! channel through [`crate::channel::SecureChannel::handle_event`],
//! called by whatever glue subscribes to the transport.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from the transport seam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,
    #[error("emit failed: {0}")]
    EmitFailed(String),
}

/// Named-event publish side of a connection.
///
/// One implementation per transport (socket library, in-memory test
/// double). Payloads are opaque strings to the transport; the channel
/// layer decides what they contain.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable identifier the transport assigned to this connection.
    fn id(&self) -> &str;

    /// Publish `payload` on the named event.
    async fn emit(&self, event: &str, payload: &str) -> Result<(), TransportError>;
}
