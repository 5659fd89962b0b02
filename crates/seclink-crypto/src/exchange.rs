//! Key exchange module.
//!
//! Elliptic-curve Diffie-Hellman over NIST P-256 with an explicit
//! lifecycle: a fresh ephemeral key pair per channel, a shared secret
//! derived from the peer's public key, and a peer-claimed copy of the
//! secret that is compared byte-for-byte before the exchange is
//! considered complete.
//!
//! The shared secret is the ECDH output's 32-byte x-coordinate, used
//! directly as the AES-256 key on both ends. No KDF is applied; the
//! fixed-width encoding makes the key length deterministic.

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand_core::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::cipher::{self, CipherError};
use crate::utils::constant_time_compare;

/// Byte length of the derived shared secret (P-256 field element).
pub const SHARED_KEY_SIZE: usize = 32;

/// Error type for key exchange operations.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("peer public key is empty")]
    EmptyPeerKey,
    #[error("peer public key is not a valid P-256 point")]
    InvalidPeerKey,
    #[error("key exchange not initialized")]
    NotInitialized,
}

/// Completion latch for the exchange.
///
/// The only transition anywhere is `NotExchanged -> Exchanged`; once the
/// two secrets have been observed equal, later mutation of either key
/// never reverts the latch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    NotExchanged,
    Exchanged,
}

/// Derived symmetric key, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; SHARED_KEY_SIZE]);

impl SharedKey {
    /// Raw key bytes. Never log or persist these.
    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey([REDACTED])")
    }
}

/// Ephemeral P-256 key agreement state for one channel.
///
/// Lifecycle: `new` (uninitialized) -> `initialize` (key pair generated)
/// -> `finish` (shared secret derived) -> latched once the peer-claimed
/// secret matches. `key_share_finished` is an independent flag marking
/// the handshake's terminal step; decrypt gating uses it, not the latch.
pub struct KeyExchange {
    secret: Option<EphemeralSecret>,
    /// Uncompressed SEC1 point encoding; empty until initialized.
    public_key: Vec<u8>,
    my_shared: Option<SharedKey>,
    /// Peer-claimed secret, received over the wire. Trusted only after
    /// the byte-equality check latches the exchange.
    target_shared: Option<Zeroizing<Vec<u8>>>,
    state: ExchangeState,
    key_share_finished: bool,
}

impl KeyExchange {
    /// Create an uninitialized exchange with no key material.
    pub fn new() -> Self {
        Self {
            secret: None,
            public_key: Vec::new(),
            my_shared: None,
            target_shared: None,
            state: ExchangeState::NotExchanged,
            key_share_finished: false,
        }
    }

    /// Generate a fresh ephemeral P-256 key pair.
    ///
    /// The private scalar stays inside the agreement object and is never
    /// exposed; only the uncompressed public point is retained for
    /// transmission.
    pub fn initialize(&mut self) {
        let secret = EphemeralSecret::random(&mut OsRng);
        self.public_key = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        self.secret = Some(secret);
    }

    /// Derive the shared secret from the peer's public key.
    ///
    /// # Errors
    /// - `EmptyPeerKey` if `peer_public` is empty
    /// - `NotInitialized` before [`initialize`](Self::initialize)
    /// - `InvalidPeerKey` if the bytes do not decode to a P-256 point
    pub fn finish(&mut self, peer_public: &[u8]) -> Result<(), ExchangeError> {
        if peer_public.is_empty() {
            return Err(ExchangeError::EmptyPeerKey);
        }
        let secret = self.secret.as_ref().ok_or(ExchangeError::NotInitialized)?;
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| ExchangeError::InvalidPeerKey)?;

        let shared = secret.diffie_hellman(&peer);
        let mut key = [0u8; SHARED_KEY_SIZE];
        key.copy_from_slice(shared.raw_secret_bytes().as_slice());
        self.my_shared = Some(SharedKey(key));
        self.try_latch();
        Ok(())
    }

    /// Store the peer's claimed copy of the shared secret.
    pub fn set_target_shared_key(&mut self, key: &[u8]) {
        self.target_shared = Some(Zeroizing::new(key.to_vec()));
        self.try_latch();
    }

    /// Mark the handshake's terminal step as reached.
    ///
    /// This is the point at which the channel starts accepting arbitrary
    /// encrypted application traffic.
    pub fn set_key_share_finished(&mut self) {
        self.key_share_finished = true;
    }

    pub fn key_share_finished(&self) -> bool {
        self.key_share_finished
    }

    /// Whether both sides hold the same secret.
    ///
    /// Latches on first observation of equality and stays `true` from
    /// then on, regardless of later key mutation.
    pub fn is_exchanged(&mut self) -> bool {
        self.try_latch();
        self.state == ExchangeState::Exchanged
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    // Sole writer of `state`; only ever moves forward.
    fn try_latch(&mut self) {
        if self.state == ExchangeState::Exchanged {
            return;
        }
        if let (Some(mine), Some(theirs)) = (&self.my_shared, &self.target_shared) {
            if constant_time_compare(mine.as_bytes(), theirs) {
                self.state = ExchangeState::Exchanged;
            }
        }
    }

    /// Discard all key material and flags, returning to uninitialized.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Uncompressed SEC1 public-key bytes; empty until initialized.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The derived shared secret, if [`finish`](Self::finish) has run.
    pub fn shared_key(&self) -> Option<&[u8; SHARED_KEY_SIZE]> {
        self.my_shared.as_ref().map(SharedKey::as_bytes)
    }

    /// Encrypt a buffer with a caller-supplied key (normally the shared
    /// secret). See [`cipher::encrypt`].
    pub fn encrypt_message(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        cipher::encrypt(key, plaintext)
    }

    /// Decrypt a buffer with a caller-supplied key. Fails closed; see
    /// [`cipher::decrypt`].
    pub fn decrypt_message(&self, key: &[u8], blob: &[u8]) -> Option<Vec<u8>> {
        cipher::decrypt(key, blob)
    }
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("KeyExchange")
            .field("initialized", &self.secret.is_some())
            .field("derived", &self.my_shared.is_some())
            .field("state", &self.state)
            .field("key_share_finished", &self.key_share_finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized() -> KeyExchange {
        let mut ex = KeyExchange::new();
        ex.initialize();
        ex
    }

    #[test]
    fn test_initialize_produces_uncompressed_point() {
        let ex = initialized();
        // SEC1 uncompressed: 0x04 || x(32) || y(32)
        assert_eq!(ex.public_key().len(), 65);
        assert_eq!(ex.public_key()[0], 0x04);
    }

    #[test]
    fn test_two_parties_agree() {
        let mut alice = initialized();
        let mut bob = initialized();

        let alice_pub = alice.public_key().to_vec();
        let bob_pub = bob.public_key().to_vec();

        alice.finish(&bob_pub).unwrap();
        bob.finish(&alice_pub).unwrap();

        assert_eq!(alice.shared_key().unwrap(), bob.shared_key().unwrap());
        assert_eq!(alice.shared_key().unwrap().len(), SHARED_KEY_SIZE);
    }

    #[test]
    fn test_finish_rejects_empty_peer_key() {
        let mut ex = initialized();
        assert!(matches!(ex.finish(&[]), Err(ExchangeError::EmptyPeerKey)));
    }

    #[test]
    fn test_finish_rejects_junk_peer_key() {
        let mut ex = initialized();
        assert!(matches!(
            ex.finish(&[0xFFu8; 65]),
            Err(ExchangeError::InvalidPeerKey)
        ));
    }

    #[test]
    fn test_finish_before_initialize() {
        let mut ex = KeyExchange::new();
        let peer = initialized();
        assert!(matches!(
            ex.finish(peer.public_key()),
            Err(ExchangeError::NotInitialized)
        ));
    }

    #[test]
    fn test_exchange_latch_is_sticky() {
        let mut alice = initialized();
        let bob = initialized();
        alice.finish(bob.public_key()).unwrap();

        assert!(!alice.is_exchanged());

        let mine = *alice.shared_key().unwrap();
        alice.set_target_shared_key(&mine);
        assert!(alice.is_exchanged());

        // A later bogus claim must not un-latch.
        alice.set_target_shared_key(&[0u8; SHARED_KEY_SIZE]);
        assert!(alice.is_exchanged());
        assert_eq!(alice.state(), ExchangeState::Exchanged);
    }

    #[test]
    fn test_mismatched_target_never_latches() {
        let mut alice = initialized();
        let bob = initialized();
        alice.finish(bob.public_key()).unwrap();

        alice.set_target_shared_key(&[0u8; SHARED_KEY_SIZE]);
        assert!(!alice.is_exchanged());
        assert_eq!(alice.state(), ExchangeState::NotExchanged);
    }

    #[test]
    fn test_key_share_finished_is_independent() {
        let mut ex = initialized();
        assert!(!ex.key_share_finished());

        // The finished flag can be set without the secrets matching.
        ex.set_key_share_finished();
        assert!(ex.key_share_finished());
        assert!(!ex.is_exchanged());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut alice = initialized();
        let bob = initialized();
        alice.finish(bob.public_key()).unwrap();
        let mine = *alice.shared_key().unwrap();
        alice.set_target_shared_key(&mine);
        alice.set_key_share_finished();
        assert!(alice.is_exchanged());

        alice.reset();
        assert!(alice.public_key().is_empty());
        assert!(alice.shared_key().is_none());
        assert!(!alice.key_share_finished());
        assert!(!alice.is_exchanged());
    }

    #[test]
    fn test_message_round_trip_with_shared_key() {
        let mut alice = initialized();
        let mut bob = initialized();
        let alice_pub = alice.public_key().to_vec();
        alice.finish(&bob.public_key().to_vec()).unwrap();
        bob.finish(&alice_pub).unwrap();

        let key = *alice.shared_key().unwrap();
        let blob = alice.encrypt_message(&key, b"over the channel").unwrap();
        let key_b = *bob.shared_key().unwrap();
        let plain = bob.decrypt_message(&key_b, &blob).unwrap();
        assert_eq!(plain.as_slice(), b"over the channel");
    }
}
