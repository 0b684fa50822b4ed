//! Example: following a live price feed with ws-event-manager
//!
//! Subscribes to `price` events, joins a group and keeps the subscription
//! alive across reconnects until Ctrl+C.
//!
//! Run with: cargo run --example live_feed -- wss://feed.example.com/ws btc-usd
//! (or set LIVE_FEED_URL / LIVE_FEED_GROUP)

use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ws_event_manager::{
    event_handler, ConnectionManager, ConnectionState, ManagerConfig, TransportConfig, WsTransport,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .or_else(|| std::env::var("LIVE_FEED_URL").ok())
        .unwrap_or_else(|| "ws://127.0.0.1:9000/ws".to_string());
    let group = args
        .next()
        .or_else(|| std::env::var("LIVE_FEED_GROUP").ok())
        .unwrap_or_else(|| "btc-usd".to_string());

    let transport = WsTransport::new(
        TransportConfig::builder(url.as_str())
            .connect_timeout(Duration::from_secs(5))
            .build()?,
    );
    let config = ManagerConfig::builder()
        .max_attempts(5)
        .base_delay(Duration::from_secs(2))
        .build()?;
    let manager = ConnectionManager::new(config, transport);

    manager.subscribe(
        "price",
        event_handler(|payload| info!("price update: {}", payload)),
    )?;

    // Join the group every time the connection (re)opens. The receiver is
    // taken before connecting so the first transition is not missed.
    let mut states = manager.watch_state();
    let joiner = manager.clone();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            match state {
                ConnectionState::Connected => {
                    if let Err(e) = joiner.join_group(&group) {
                        warn!("Failed to join {}: {}", group, e);
                    }
                }
                ConnectionState::GivenUp => warn!("Gave up reconnecting"),
                ConnectionState::Disposed => break,
                _ => {}
            }
        }
    });

    info!("Connecting to {}", url);
    manager.connect()?;

    info!("Running... Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    let snapshot = manager.metrics().snapshot();
    info!("Final metrics:");
    info!("  Connections: {}", snapshot.connections_total);
    info!("  Disconnects: {}", snapshot.disconnects_total);
    info!("  Messages sent: {}", snapshot.messages_sent_total);
    info!("  Messages dropped: {}", snapshot.messages_dropped_total);

    manager.dispose();
    let _ = watcher.await;
    info!("Manager disposed");

    Ok(())
}
