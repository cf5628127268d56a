//! The socket-level API: binds a datagram socket and opens connections on it.
//!
//! 套接字层API：绑定数据报套接字并在其上建立连接。
mod relay;
pub mod traits;

pub use traits::{AsyncUdpSocket, BindableUdpSocket};

use crate::{
    config::Config,
    core::{
        endpoint::{Endpoint, EndpointChannels, StreamCommand},
        stream::Stream,
    },
    error::{Error, Result},
    packet::{Flags, Segment},
    stats::ConnectionStats,
};
use bytes::Bytes;
use relay::{MAX_DATAGRAM_SIZE, relay_task};
use std::{
    io,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, oneshot, watch},
};
use tracing::{Instrument, debug, info_span, trace};

/// Segments buffered between the relay and the endpoint.
const SEGMENT_CHANNEL_CAPACITY: usize = 1024;

/// A datagram socket that carries one reliable connection at a time.
///
/// `connect` opens a connection actively, `accept` waits for a peer to do
/// so. Once that connection has finished, the socket can be used again.
///
/// 一次承载一个可靠连接的数据报套接字。
/// `connect` 主动建立连接，`accept` 等待对端建立连接。
/// 该连接结束后，套接字可以再次使用。
#[derive(Debug)]
pub struct ReliableUdpSocket<S: AsyncUdpSocket = UdpSocket> {
    socket: Arc<S>,
    config: Config,
    busy: Arc<AtomicBool>,
}

impl<S: BindableUdpSocket> ReliableUdpSocket<S> {
    /// Binds a new socket to `addr`.
    ///
    /// 将新套接字绑定到 `addr`。
    pub async fn bind(addr: SocketAddr, config: Config) -> Result<Self> {
        let socket = S::bind(addr).await?;
        Ok(Self::from_socket(socket, config))
    }
}

impl<S: AsyncUdpSocket> ReliableUdpSocket<S> {
    /// Wraps an existing datagram socket.
    pub fn from_socket(socket: S, config: Config) -> Self {
        Self {
            socket: Arc::new(socket),
            config,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens a connection to `peer` and completes the handshake.
    ///
    /// Fails with [`FailureReason::HandshakeTimeout`](crate::error::FailureReason::HandshakeTimeout)
    /// when the SYN is never answered.
    ///
    /// 向 `peer` 建立连接并完成握手。
    pub async fn connect(&self, peer: SocketAddr) -> Result<Stream> {
        let slot = ConnectionSlot::acquire(&self.busy)?;
        let local = self.local_addr()?;
        debug!(%local, %peer, "Connecting");

        let (channels, handle) = connection_channels();
        let endpoint = Endpoint::connect(
            self.socket.clone(),
            peer,
            self.config.clone(),
            channels.endpoint,
        );
        self.spawn(endpoint, peer, local, channels.relay, slot);
        handle.established(peer).await
    }

    /// Waits for a peer's SYN and completes the handshake with it.
    ///
    /// Anything other than a bare SYN is ignored while waiting.
    ///
    /// 等待对端的SYN并与其完成握手。等待期间忽略除SYN以外的一切。
    pub async fn accept(&self) -> Result<Stream> {
        let slot = ConnectionSlot::acquire(&self.busy)?;
        let local = self.local_addr()?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (syn, peer) = loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            match Segment::decode(&buf[..len]) {
                Ok(segment) if segment.flags == Flags::SYN => break (segment, from),
                Ok(segment) => {
                    trace!(%from, flags = ?segment.flags, "Ignoring segment while listening");
                }
                Err(e) => trace!(%from, error = %e, "Dropping malformed datagram"),
            }
        };
        debug!(%local, %peer, "Accepting connection");

        let (channels, handle) = connection_channels();
        let endpoint = Endpoint::accept(
            self.socket.clone(),
            peer,
            &syn,
            self.config.clone(),
            channels.endpoint,
        );
        self.spawn(endpoint, peer, local, channels.relay, slot);
        handle.established(peer).await
    }

    fn spawn(
        &self,
        endpoint: Endpoint<S>,
        peer: SocketAddr,
        local: SocketAddr,
        relay: RelayChannels,
        slot: ConnectionSlot,
    ) {
        let span = info_span!("connection", %local, %peer);
        tokio::spawn(
            relay_task(self.socket.clone(), peer, relay.segments_tx, relay.dropped, slot)
                .instrument(span.clone()),
        );
        tokio::spawn(endpoint.run().instrument(span));
    }
}

/// Marks the socket as carrying a connection until dropped.
#[derive(Debug)]
pub(crate) struct ConnectionSlot {
    busy: Arc<AtomicBool>,
}

impl ConnectionSlot {
    fn acquire(busy: &Arc<AtomicBool>) -> Result<Self> {
        if busy.swap(true, Ordering::AcqRel) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                "socket already carries a connection",
            )));
        }
        Ok(Self { busy: busy.clone() })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

struct RelayChannels {
    segments_tx: mpsc::Sender<Segment>,
    dropped: Arc<AtomicU64>,
}

struct ConnectionChannels {
    endpoint: EndpointChannels,
    relay: RelayChannels,
}

/// The application's ends of a new connection's channels.
struct StreamHandle {
    commands_tx: mpsc::UnboundedSender<StreamCommand>,
    data_rx: mpsc::UnboundedReceiver<Result<Bytes>>,
    stats_rx: watch::Receiver<ConnectionStats>,
    established_rx: oneshot::Receiver<Result<()>>,
}

impl StreamHandle {
    async fn established(self, peer: SocketAddr) -> Result<Stream> {
        self.established_rx
            .await
            .map_err(|_| Error::ConnectionClosed)??;
        Ok(Stream::new(
            peer,
            self.commands_tx,
            self.data_rx,
            self.stats_rx,
        ))
    }
}

fn connection_channels() -> (ConnectionChannels, StreamHandle) {
    let (segments_tx, segments_rx) = mpsc::channel(SEGMENT_CHANNEL_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (data_tx, data_rx) = mpsc::unbounded_channel();
    let (stats_tx, stats_rx) = watch::channel(ConnectionStats::default());
    let (established_tx, established_rx) = oneshot::channel();
    let dropped = Arc::new(AtomicU64::new(0));

    let channels = ConnectionChannels {
        endpoint: EndpointChannels {
            segments_rx,
            commands_rx,
            data_tx,
            stats_tx,
            established_tx,
            dropped: dropped.clone(),
        },
        relay: RelayChannels {
            segments_tx,
            dropped,
        },
    };
    let handle = StreamHandle {
        commands_tx,
        data_rx,
        stats_rx,
        established_rx,
    };
    (channels, handle)
}
