//! Seclink Core - secure channel logic over a named-event transport.
//!
//! This crate implements:
//! - The handshake state machine (ECDH offer / reply / proof)
//! - Envelope sealing and opening (encrypt-then-base64 JSON envelopes)
//! - Event dispatch registry for routing decrypted messages
//! - The transport boundary trait
//! - A test harness with an in-memory transport and scripted peer

#![forbid(unsafe_code)]

// Protocol state machine
pub mod channel;

// Services
pub mod registry;
pub mod transport;

// Wire format
pub mod wire;

// Supporting modules
pub mod errors;
pub mod harness;
