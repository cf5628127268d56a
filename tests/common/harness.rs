//! tests/common/harness.rs
use rudp::{Config, ReliableUdpSocket, Stream};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Once;
use tokio::net::UdpSocket;
use tracing_subscriber::fmt::format::FmtSpan;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "rudp=info".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .init();
    });
}

/// A client and a server socket on loopback, each on an ephemeral port.
pub struct TestHarness {
    pub client: ReliableUdpSocket<UdpSocket>,
    pub server: ReliableUdpSocket<UdpSocket>,
    pub server_addr: SocketAddr,
}

impl TestHarness {
    pub async fn new(config: Config) -> Self {
        init_tracing();
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = ReliableUdpSocket::<UdpSocket>::bind(any, config.clone())
            .await
            .unwrap();
        let client = ReliableUdpSocket::<UdpSocket>::bind(any, config)
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();
        Self {
            client,
            server,
            server_addr,
        }
    }

    /// Runs the handshake and returns `(client, server)` streams.
    pub async fn connect(&self) -> (Stream, Stream) {
        let (client, server) =
            tokio::join!(self.client.connect(self.server_addr), self.server.accept());
        (
            client.expect("client failed to connect"),
            server.expect("server failed to accept"),
        )
    }
}

/// Reads a stream to its end and returns the bytes.
pub async fn read_to_end(stream: &mut Stream) -> Vec<u8> {
    let mut received = Vec::new();
    while let Some(chunk) = stream.recv().await.expect("receive failed") {
        received.extend_from_slice(&chunk);
    }
    received
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
