//! Secure channel state machine.
//!
//! One `SecureChannel` is one independently-keyed conversation bound to
//! a transport connection. The remote side opens the handshake:
//!
//! ```text
//! Remote                                        Channel
//!   │  "handshake" {pub: b64(remote_pub)}          │
//!   │ ────────────────────────────────────────────►│ new exchange,
//!   │                                              │ generate key pair
//!   │  "handshake" b64(own_pub)                    │
//!   │ ◄────────────────────────────────────────────│ derive secret
//!   │  "handshake-finish" sealed proof             │
//!   │ ◄────────────────────────────────────────────│ prove possession
//!   │  "handshake-finish" sealed confirmation      │
//!   │ ────────────────────────────────────────────►│ verify id + secret,
//!   │                                              │ mark finished
//!   │ ═══════════ "enc" envelopes both ways ══════ │
//! ```
//!
//! All state mutation goes through `&mut self`, so a channel must be
//! driven by a single logical task; the transport glue calls
//! [`SecureChannel::handle_event`] for each inbound event in delivery
//! order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Serialize;
use tracing::{debug, warn};

use seclink_crypto::exchange::KeyExchange;
use seclink_crypto::utils::constant_time_compare;

use crate::errors::ChannelError;
use crate::registry::{DispatchError, EventRegistry};
use crate::transport::Transport;
use crate::wire::{self, Envelope, EnvelopeError, HandshakeOffer, HandshakeProof};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a secure channel.
///
/// Replaces the usual global channel manager: every channel gets its
/// context injected at construction.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Outer transport event application envelopes are published on.
    pub secure_event: String,
    /// Deadline for completing the handshake, in seconds from the offer
    /// arriving. `None` leaves a hung handshake in place forever.
    pub handshake_timeout_secs: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            secure_event: wire::SECURE_EVENT.to_string(),
            handshake_timeout_secs: None,
        }
    }
}

// ============================================================================
// Channel Statistics
// ============================================================================

/// Counters for inbound secure-message handling.
#[derive(Debug, Default)]
pub struct ChannelStats {
    received: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    decrypt_failures: AtomicU64,
    unregistered: AtomicU64,
    handler_errors: AtomicU64,
}

impl ChannelStats {
    /// Get a snapshot of current counters.
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            decrypt_failures: self.decrypt_failures.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
        }
    }

    fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_decrypt_failures(&self) {
        self.decrypt_failures.fetch_add(1, Ordering::Relaxed);
        self.inc_dropped();
    }

    fn inc_unregistered(&self) {
        self.unregistered.fetch_add(1, Ordering::Relaxed);
        self.inc_dropped();
    }

    fn inc_handler_errors(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
        self.inc_dropped();
    }
}

/// Snapshot of channel counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub decrypt_failures: u64,
    pub unregistered: u64,
    pub handler_errors: u64,
}

// ============================================================================
// Secure Channel
// ============================================================================

/// Handshake and envelope state machine over a named-event transport.
pub struct SecureChannel {
    transport: Arc<dyn Transport>,
    registry: EventRegistry,
    config: ChannelConfig,
    exchange: KeyExchange,
    /// Bumped on every reset and on every new handshake; steps that
    /// complete against an older generation are discarded.
    generation: u64,
    handshake_started_at: Option<u64>,
    stats: Arc<ChannelStats>,
}

impl SecureChannel {
    pub fn new(transport: Arc<dyn Transport>, registry: EventRegistry) -> Self {
        Self::with_config(transport, registry, ChannelConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        registry: EventRegistry,
        config: ChannelConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
            exchange: KeyExchange::new(),
            generation: 0,
            handshake_started_at: None,
            stats: Arc::new(ChannelStats::default()),
        }
    }

    /// Whether the handshake's terminal step was reached. This is the
    /// gate for inbound application traffic.
    pub fn is_ready(&self) -> bool {
        self.exchange.key_share_finished()
    }

    /// Whether both sides have been observed holding the same secret.
    /// Sticky: stays `true` once latched.
    pub fn is_exchanged(&mut self) -> bool {
        self.exchange.is_exchanged()
    }

    pub fn stats(&self) -> &Arc<ChannelStats> {
        &self.stats
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Tear down all key material. Handshake steps still in flight for
    /// the old generation are ignored when they complete.
    pub fn reset(&mut self) {
        self.exchange.reset();
        self.generation = self.generation.wrapping_add(1);
        self.handshake_started_at = None;
        debug!(generation = self.generation, "channel reset");
    }

    /// Reset the exchange if an in-flight handshake has exceeded the
    /// configured deadline. Returns `true` if a reset happened.
    ///
    /// The protocol itself enforces no timeout; a connection layer that
    /// wants one calls this on its own clock ticks.
    pub fn check_handshake_deadline(&mut self, now_unix: u64) -> bool {
        let Some(timeout) = self.config.handshake_timeout_secs else {
            return false;
        };
        let Some(started) = self.handshake_started_at else {
            return false;
        };
        if self.exchange.key_share_finished() {
            self.handshake_started_at = None;
            return false;
        }
        if now_unix.saturating_sub(started) >= timeout {
            warn!(started, now_unix, "handshake deadline exceeded, resetting");
            self.reset();
            true
        } else {
            false
        }
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Route one inbound transport event.
    ///
    /// Every failure path is logged and dropped here; nothing unwinds
    /// back into the transport's delivery loop. `now_unix` timestamps
    /// the start of a handshake for deadline tracking.
    pub async fn handle_event(&mut self, event: &str, payload: &str, now_unix: u64) {
        let result = match event {
            wire::HANDSHAKE_EVENT => self.handle_handshake_offer(payload, now_unix).await,
            wire::HANDSHAKE_FINISH_EVENT => self.handle_handshake_proof(payload).await,
            ev if ev == self.config.secure_event => self.handle_secure(payload).await,
            other => {
                debug!(event = other, "ignoring unrelated transport event");
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(event, error = %e, "dropped inbound event");
        }
    }

    /// Handshake offer: the remote side announces its public key.
    ///
    /// Starts a fresh exchange, replies with our own public key on the
    /// same event, derives the shared secret, then proves possession of
    /// it by sending the first sealed envelope.
    async fn handle_handshake_offer(
        &mut self,
        payload: &str,
        now_unix: u64,
    ) -> Result<(), ChannelError> {
        let offer: HandshakeOffer =
            serde_json::from_str(payload).map_err(EnvelopeError::Json)?;
        let remote_pub = B64
            .decode(offer.public_key.trim())
            .map_err(EnvelopeError::Base64)?;

        // A new offer always starts a new exchange; whatever was in
        // flight before belongs to a previous generation.
        self.exchange.reset();
        self.exchange.initialize();
        self.generation = self.generation.wrapping_add(1);
        self.handshake_started_at = Some(now_unix);
        let generation = self.generation;

        debug!(
            generation,
            remote_pub = %hex::encode(&remote_pub[..remote_pub.len().min(8)]),
            "handshake offer received"
        );

        let own_pub_b64 = B64.encode(self.exchange.public_key());
        self.transport
            .emit(wire::HANDSHAKE_EVENT, &own_pub_b64)
            .await?;
        if generation != self.generation {
            return Err(ChannelError::StaleGeneration);
        }

        self.exchange.finish(&remote_pub)?;

        let proof = HandshakeProof {
            socket_id: self.transport.id().to_string(),
            shared_secret: B64.encode(
                self.exchange.shared_key().ok_or(ChannelError::NoSharedKey)?,
            ),
        };
        self.send_secure_on(wire::HANDSHAKE_FINISH_EVENT, &proof, wire::HANDSHAKE_FINISH_EVENT)
            .await?;
        if generation != self.generation {
            return Err(ChannelError::StaleGeneration);
        }
        Ok(())
    }

    /// Handshake confirmation: the remote side reflects the proof back.
    ///
    /// Decrypted with the derived shared key alone — the finished gate
    /// does not apply here, since this very step sets it. Verification
    /// failure leaves the channel unauthenticated; there is no retry,
    /// the connection layer reconnects instead.
    async fn handle_handshake_proof(&mut self, payload: &str) -> Result<(), ChannelError> {
        let key = *self.exchange.shared_key().ok_or(ChannelError::NoSharedKey)?;

        let envelope = wire::open(&key, payload).map_err(|e| {
            self.stats.inc_decrypt_failures();
            e
        })?;
        if envelope.event_name != wire::HANDSHAKE_FINISH_EVENT {
            return Err(ChannelError::ProofRejected("unexpected inner event"));
        }

        let proof: HandshakeProof =
            serde_json::from_str(&envelope.payload).map_err(EnvelopeError::Json)?;
        let claimed = B64
            .decode(proof.shared_secret.trim())
            .map_err(EnvelopeError::Base64)?;

        if proof.socket_id != self.transport.id() {
            return Err(ChannelError::ProofRejected("socket id mismatch"));
        }
        if !constant_time_compare(&claimed, &key) {
            return Err(ChannelError::ProofRejected("shared secret mismatch"));
        }

        self.exchange.set_target_shared_key(&claimed);
        self.exchange.set_key_share_finished();
        self.handshake_started_at = None;
        debug!(generation = self.generation, "handshake complete");
        Ok(())
    }

    /// Application envelope on the secure event.
    async fn handle_secure(&mut self, payload: &str) -> Result<(), ChannelError> {
        self.stats.inc_received();

        if !self.exchange.key_share_finished() {
            self.stats.inc_dropped();
            return Err(ChannelError::NotReady);
        }
        let key = *self.exchange.shared_key().ok_or(ChannelError::NoSharedKey)?;

        let envelope = wire::open(&key, payload).map_err(|e| {
            self.stats.inc_decrypt_failures();
            e
        })?;

        match self
            .registry
            .dispatch(&envelope.event_name, &envelope.payload)
            .await
        {
            Ok(()) => {
                self.stats.inc_dispatched();
                Ok(())
            }
            Err(e @ DispatchError::NoHandler(_)) => {
                self.stats.inc_unregistered();
                Err(e.into())
            }
            Err(e @ DispatchError::Handler(_)) => {
                self.stats.inc_handler_errors();
                Err(e.into())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Seal `payload` into an envelope under the shared key and publish
    /// it on the configured secure event.
    ///
    /// A channel without a derived key logs and sends nothing; callers
    /// are not expected to handle that as an error.
    pub async fn send_secure<T: Serialize>(
        &self,
        event_name: &str,
        payload: &T,
    ) -> Result<(), ChannelError> {
        let root = self.config.secure_event.clone();
        self.send_secure_on(event_name, payload, &root).await
    }

    /// [`send_secure`](Self::send_secure) with an explicit outer event.
    pub async fn send_secure_on<T: Serialize>(
        &self,
        event_name: &str,
        payload: &T,
        root_event: &str,
    ) -> Result<(), ChannelError> {
        let Some(key) = self.exchange.shared_key() else {
            warn!(event = event_name, "send refused: no shared key derived");
            return Ok(());
        };

        let envelope = Envelope {
            event_name: event_name.to_string(),
            payload: serde_json::to_string(payload).map_err(EnvelopeError::Json)?,
        };
        let sealed = wire::seal(key, &envelope)?;
        self.transport.emit(root_event, &sealed).await?;
        debug!(event = event_name, root = root_event, "sealed envelope sent");
        Ok(())
    }
}
