//! End-to-end handshake and messaging flow over the test harness.

use std::sync::{Arc, Mutex};

use seclink_core::channel::SecureChannel;
use seclink_core::harness::{run_handshake, RecordingTransport, ScriptedPeer};
use seclink_core::registry::EventRegistry;
use seclink_core::wire;

#[tokio::test]
async fn test_handshake_establishes_channel() {
    let transport = RecordingTransport::new("socket-1");
    let mut peer = ScriptedPeer::new();
    let mut channel = SecureChannel::new(transport.clone(), EventRegistry::empty());

    run_handshake(&mut channel, &mut peer, &transport, 100).await;

    assert!(channel.is_ready());
    assert!(channel.is_exchanged());

    // The channel replied with a 65-byte uncompressed P-256 point.
    let reply = transport.last_on(wire::HANDSHAKE_EVENT).unwrap();
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    let reply_bytes = B64.decode(reply).unwrap();
    assert_eq!(reply_bytes.len(), 65);
    assert_eq!(reply_bytes[0], 0x04);
}

#[tokio::test]
async fn test_inbound_event_dispatched_after_handshake() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let registry = EventRegistry::builder()
        .on("Ping", move |msg: String| {
            sink.lock().expect("lock").push(msg);
            Ok(())
        })
        .build();

    let transport = RecordingTransport::new("socket-1");
    let mut peer = ScriptedPeer::new();
    let mut channel = SecureChannel::new(transport.clone(), registry);

    run_handshake(&mut channel, &mut peer, &transport, 100).await;

    let sealed = peer.seal_event("Ping", "\"hello\"");
    channel.handle_event(wire::SECURE_EVENT, &sealed, 101).await;

    assert_eq!(seen.lock().unwrap().as_slice(), ["hello".to_string()]);
    let stats = channel.stats().snapshot();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn test_outbound_event_readable_by_peer() {
    let transport = RecordingTransport::new("socket-1");
    let mut peer = ScriptedPeer::new();
    let mut channel = SecureChannel::new(transport.clone(), EventRegistry::empty());

    run_handshake(&mut channel, &mut peer, &transport, 100).await;
    transport.take();

    channel.send_secure("Pong", &"made it").await.unwrap();

    let sealed = transport.last_on(wire::SECURE_EVENT).unwrap();
    let envelope = peer.open_event(&sealed);
    assert_eq!(envelope.event_name, "Pong");
    assert_eq!(envelope.payload, "\"made it\"");
}

#[tokio::test]
async fn test_both_directions_after_handshake() {
    let seen: Arc<Mutex<Vec<(String, u32)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let registry = EventRegistry::builder()
        .on("Score", move |(name, points): (String, u32)| {
            sink.lock().expect("lock").push((name, points));
            Ok(())
        })
        .build();

    let transport = RecordingTransport::new("socket-7");
    let mut peer = ScriptedPeer::new();
    let mut channel = SecureChannel::new(transport.clone(), registry);

    run_handshake(&mut channel, &mut peer, &transport, 100).await;

    // Peer -> channel, multi-parameter payload.
    let sealed = peer.seal_event("Score", r#"["alice", 3]"#);
    channel.handle_event(wire::SECURE_EVENT, &sealed, 101).await;
    assert_eq!(seen.lock().unwrap().as_slice(), [("alice".to_string(), 3)]);

    // Channel -> peer.
    channel.send_secure("Score", &("bob", 5u32)).await.unwrap();
    let sealed = transport.last_on(wire::SECURE_EVENT).unwrap();
    let envelope = peer.open_event(&sealed);
    assert_eq!(envelope.event_name, "Score");
    assert_eq!(envelope.payload, r#"["bob",5]"#);
}
