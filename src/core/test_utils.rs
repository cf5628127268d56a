//! Helpers for connection tests over the simulated link.

use crate::{
    config::Config,
    core::stream::Stream,
    socket::{AsyncUdpSocket, ReliableUdpSocket},
    testing::{LinkConditions, SimulatedSocket},
};
use std::sync::Once;
use std::time::Duration;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "rudp=debug".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A config with short timers so failure paths finish quickly.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.reliability.initial_rto = Duration::from_millis(100);
    config.reliability.min_rto = Duration::from_millis(50);
    config.reliability.max_rto = Duration::from_secs(2);
    config.reliability.time_wait = Duration::from_millis(500);
    config
}

/// Performs the handshake over the given socket pair. The first socket
/// connects, the second accepts.
pub async fn connect_over(
    client: SimulatedSocket,
    server: SimulatedSocket,
    config: Config,
) -> (Stream, Stream) {
    let server_addr = server.local_addr().unwrap();
    let client = ReliableUdpSocket::from_socket(client, config.clone());
    let server = ReliableUdpSocket::from_socket(server, config);
    let (client, server) = tokio::join!(client.connect(server_addr), server.accept());
    (client.unwrap(), server.unwrap())
}

pub async fn connected_pair(conditions: LinkConditions, config: Config) -> (Stream, Stream) {
    let (client, server) = SimulatedSocket::pair(conditions);
    connect_over(client, server, config).await
}

/// Reads until end-of-stream.
pub async fn read_all(stream: &mut Stream) -> Vec<u8> {
    let mut received = Vec::new();
    while let Some(chunk) = stream.recv().await.unwrap() {
        received.extend_from_slice(&chunk);
    }
    received
}
