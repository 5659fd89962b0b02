//! Loopback demo: drives a full handshake against an in-process peer,
//! then exchanges encrypted application events in both directions.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use seclink_core::channel::SecureChannel;
use seclink_core::harness::{run_handshake, RecordingTransport, ScriptedPeer};
use seclink_core::registry::EventRegistry;
use seclink_core::wire;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = EventRegistry::builder()
        .on("Ping", |msg: String| {
            println!("channel <- Ping {msg:?}");
            Ok(())
        })
        .build();

    let transport = RecordingTransport::new("demo-socket");
    let mut peer = ScriptedPeer::new();
    let mut channel = SecureChannel::new(transport.clone(), registry);

    // Handshake: peer offers, channel replies and proves, peer confirms.
    run_handshake(&mut channel, &mut peer, &transport, now_unix()).await;

    let reply = transport
        .last_on(wire::HANDSHAKE_EVENT)
        .expect("channel replied");
    let reply_bytes = B64.decode(reply)?;
    println!("channel public key: {}...", hex::encode(&reply_bytes[..8]));
    println!(
        "handshake complete: ready={} exchanged={}",
        channel.is_ready(),
        channel.is_exchanged()
    );

    // Peer -> channel.
    let sealed = peer.seal_event("Ping", "\"hello from the peer\"");
    channel
        .handle_event(wire::SECURE_EVENT, &sealed, now_unix())
        .await;

    // Channel -> peer.
    channel.send_secure("Pong", &"hello back").await?;
    let sealed = transport
        .last_on(wire::SECURE_EVENT)
        .expect("channel sent an envelope");
    let envelope = peer.open_event(&sealed);
    println!("peer    <- {} {}", envelope.event_name, envelope.payload);

    let stats = channel.stats().snapshot();
    println!(
        "stats: received={} dispatched={} dropped={}",
        stats.received, stats.dispatched, stats.dropped
    );

    Ok(())
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
