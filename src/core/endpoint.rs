//! The endpoint of a connection: a single task that owns every piece of
//! connection state.
//!
//! Inbound segments, commands from the [`Stream`](crate::core::stream::Stream)
//! handle and the timers are multiplexed with `tokio::select!`, so the send
//! and receive engines only ever have one writer.
//!
//! 连接的端点：一个拥有全部连接状态的任务。
//! 入站分段、来自 `Stream` 句柄的命令和定时器通过 `tokio::select!` 多路复用，
//! 因此发送和接收引擎始终只有一个写者。

pub mod command;
pub mod state;

pub use command::StreamCommand;
pub use state::ConnectionState;

use crate::{
    config::Config,
    core::reliability::{OutgoingSegment, ReceiveEngine, SendEngine},
    error::{Error, FailureReason, Result},
    packet::{Flags, Segment, SeqNum},
    socket::AsyncUdpSocket,
    stats::ConnectionStats,
};
use bytes::{Buf, Bytes};
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep_until},
};
use tracing::{debug, info, trace, warn};

/// TIME_WAIT lasts at least this many retransmission timeouts, so a FIN
/// resent after a lost final ACK still finds us.
const TIME_WAIT_RTO_MULTIPLE: u32 = 4;

/// The endpoint's side of the channels to the stream handle and the relay.
///
/// 端点一侧连接流句柄和中继任务的通道。
pub(crate) struct EndpointChannels {
    /// Decoded segments from the relay task.
    pub segments_rx: mpsc::Receiver<Segment>,
    pub commands_rx: mpsc::UnboundedReceiver<StreamCommand>,
    /// In-order data for the application; dropped at end of stream.
    pub data_tx: mpsc::UnboundedSender<Result<Bytes>>,
    pub stats_tx: watch::Sender<ConnectionStats>,
    /// Resolved once the handshake completes or fails.
    pub established_tx: oneshot::Sender<Result<()>>,
    /// Datagrams the relay discarded as malformed.
    pub dropped: Arc<AtomicU64>,
}

#[derive(Debug)]
struct PendingWrite {
    data: Bytes,
    done: oneshot::Sender<Result<()>>,
}

/// Represents one end of a reliable connection.
pub(crate) struct Endpoint<S: AsyncUdpSocket> {
    socket: Arc<S>,
    peer: SocketAddr,
    config: Config,
    state: ConnectionState,
    send: SendEngine,
    /// Created once the peer's initial sequence number is known.
    recv: Option<ReceiveEngine>,

    segments_rx: mpsc::Receiver<Segment>,
    commands_rx: mpsc::UnboundedReceiver<StreamCommand>,
    commands_open: bool,
    data_tx: Option<mpsc::UnboundedSender<Result<Bytes>>>,
    stats_tx: watch::Sender<ConnectionStats>,
    established_tx: Option<oneshot::Sender<Result<()>>>,
    dropped: Arc<AtomicU64>,

    pending_writes: VecDeque<PendingWrite>,
    close_waiters: Vec<oneshot::Sender<Result<()>>>,
    close_requested: bool,

    /// The window carried by the last segment we sent.
    advertised_window: u16,
    last_heard: Instant,
    time_wait_until: Option<Instant>,
    stats: ConnectionStats,
}

impl<S: AsyncUdpSocket> Endpoint<S> {
    /// Creates the active side of a connection. The SYN goes out when
    /// [`Endpoint::run`] starts.
    ///
    /// 创建连接的主动方。SYN在 [`Endpoint::run`] 启动时发出。
    pub(crate) fn connect(
        socket: Arc<S>,
        peer: SocketAddr,
        config: Config,
        channels: EndpointChannels,
    ) -> Self {
        Self::new(socket, peer, config, channels, ConnectionState::SynSent, None)
    }

    /// Creates the passive side of a connection from the peer's SYN. The
    /// SYN-ACK goes out when [`Endpoint::run`] starts.
    ///
    /// 根据对端的SYN创建连接的被动方。SYN-ACK在 [`Endpoint::run`] 启动时发出。
    pub(crate) fn accept(
        socket: Arc<S>,
        peer: SocketAddr,
        syn: &Segment,
        config: Config,
        channels: EndpointChannels,
    ) -> Self {
        let recv = ReceiveEngine::new(syn.seq + 1, config.effective_recv_capacity());
        let mut endpoint = Self::new(
            socket,
            peer,
            config,
            channels,
            ConnectionState::SynReceived,
            Some(recv),
        );
        endpoint.send.on_window_update(syn.window);
        endpoint
    }

    fn new(
        socket: Arc<S>,
        peer: SocketAddr,
        config: Config,
        channels: EndpointChannels,
        state: ConnectionState,
        recv: Option<ReceiveEngine>,
    ) -> Self {
        let initial_seq = SeqNum(rand::random());
        Self {
            socket,
            peer,
            send: SendEngine::new(initial_seq, &config),
            config,
            state,
            recv,
            segments_rx: channels.segments_rx,
            commands_rx: channels.commands_rx,
            commands_open: true,
            data_tx: Some(channels.data_tx),
            stats_tx: channels.stats_tx,
            established_tx: Some(channels.established_tx),
            dropped: channels.dropped,
            pending_writes: VecDeque::new(),
            close_waiters: Vec::new(),
            close_requested: false,
            advertised_window: 0,
            last_heard: Instant::now(),
            time_wait_until: None,
            stats: ConnectionStats::default(),
        }
    }

    /// Runs the endpoint's main event loop until the connection is closed.
    pub(crate) async fn run(mut self) {
        let syn = self.send.send_syn(Instant::now());
        if let Err(reason) = self.transmit(syn).await {
            self.fail(reason).await;
            return;
        }

        loop {
            trace!(state = %self.state, "Waiting for events");
            let aux_deadline = self.aux_deadline();

            let outcome = tokio::select! {
                biased;

                // 1. Segments from the network
                segment = self.segments_rx.recv() => match segment {
                    Some(segment) => self.on_segment(segment).await,
                    None => Err(FailureReason::Socket("receive loop ended".into())),
                },

                // 2. Commands from the user stream
                command = self.commands_rx.recv(), if self.commands_open => match command {
                    Some(command) => self.on_command(command).await,
                    None => {
                        trace!("Stream handle gone");
                        self.commands_open = false;
                        Ok(())
                    }
                },

                // 3. Retransmission timer
                _ = self.send.timer().expired() => self.on_retransmission_timeout().await,

                // 4. TIME_WAIT expiry or idle timeout
                _ = sleep_until(aux_deadline.unwrap_or_else(Instant::now)), if aux_deadline.is_some() => {
                    self.on_aux_deadline()
                }
            };

            let outcome = match outcome {
                Ok(()) => self.flush().await,
                Err(reason) => Err(reason),
            };
            if let Err(reason) = outcome {
                self.fail(reason).await;
                break;
            }

            self.publish_stats();
            if self.state == ConnectionState::Closed {
                break;
            }
        }
        self.publish_stats();
    }

    async fn on_segment(&mut self, segment: Segment) -> std::result::Result<(), FailureReason> {
        let now = Instant::now();
        self.last_heard = now;
        self.stats.segments_received += 1;
        trace!(
            seq = %segment.seq,
            ack = %segment.ack,
            flags = ?segment.flags,
            len = segment.payload.len(),
            window = segment.window,
            "Received segment"
        );

        if segment.flags.contains(Flags::RST) {
            if self.state == ConnectionState::TimeWait {
                self.transition(ConnectionState::Closed);
                return Ok(());
            }
            return Err(FailureReason::PeerReset);
        }

        match self.state {
            ConnectionState::SynSent => return self.on_syn_ack(segment, now).await,
            ConnectionState::SynReceived => {
                if !self.on_handshake_ack(&segment).await {
                    return Ok(());
                }
            }
            _ => {}
        }

        if segment.flags.contains(Flags::SYN) {
            // The peer did not get our ACK of its SYN.
            return self.send_ack().await;
        }

        if segment.flags.contains(Flags::ACK) {
            self.process_ack(&segment, now).await?;
        }
        if segment.seq_len() > 0 {
            self.process_data(segment, now).await?;
        }
        Ok(())
    }

    /// SYN_SENT: only a SYN-ACK for our SYN moves the connection forward.
    async fn on_syn_ack(
        &mut self,
        segment: Segment,
        now: Instant,
    ) -> std::result::Result<(), FailureReason> {
        if !segment.flags.contains(Flags::SYN) {
            trace!("Ignoring segment before the handshake completed");
            return Ok(());
        }
        if !segment.flags.contains(Flags::ACK) {
            return Err(FailureReason::MalformedHandshake(
                "simultaneous open is not supported",
            ));
        }
        if segment.ack != self.send.snd_nxt() {
            return Err(FailureReason::MalformedHandshake(
                "SYN-ACK acknowledges an unexpected sequence number",
            ));
        }

        self.recv = Some(ReceiveEngine::new(
            segment.seq + 1,
            self.config.effective_recv_capacity(),
        ));
        self.send.on_ack(segment.ack, segment.window, now);
        self.transition(ConnectionState::Established);
        self.send_ack().await?;
        self.notify_established().await;
        Ok(())
    }

    /// SYN_RECEIVED: returns `true` once the peer has acknowledged our SYN.
    async fn on_handshake_ack(&mut self, segment: &Segment) -> bool {
        if segment.flags.contains(Flags::SYN) {
            trace!("Retransmitted SYN, waiting for our SYN-ACK timer");
            return false;
        }
        if !segment.flags.contains(Flags::ACK) || segment.ack != self.send.snd_nxt() {
            return false;
        }
        self.transition(ConnectionState::Established);
        self.notify_established().await;
        self.state != ConnectionState::Closed
    }

    async fn notify_established(&mut self) {
        info!(peer = %self.peer, "Connection established");
        let delivered = self
            .established_tx
            .take()
            .is_some_and(|tx| tx.send(Ok(())).is_ok());
        if !delivered {
            debug!("Nobody is waiting for this connection, resetting it");
            self.abort().await;
        }
    }

    async fn process_ack(
        &mut self,
        segment: &Segment,
        now: Instant,
    ) -> std::result::Result<(), FailureReason> {
        if segment.seq_len() > 0 && segment.ack == self.send.snd_una() {
            // Data from the peer carrying a stale ACK is not a duplicate.
            self.send.on_window_update(segment.window);
        } else {
            let outcome = self.send.on_ack(segment.ack, segment.window, now);
            if let Some(retransmit) = outcome.fast_retransmit {
                self.transmit(retransmit).await?;
            }
        }

        if self.send.fin_acked() {
            self.on_fin_acked(now);
        }
        Ok(())
    }

    fn on_fin_acked(&mut self, now: Instant) {
        let next = match self.state {
            ConnectionState::FinWait1 => ConnectionState::FinWait2,
            ConnectionState::Closing => {
                self.start_time_wait(now);
                ConnectionState::TimeWait
            }
            ConnectionState::LastAck => ConnectionState::Closed,
            _ => return,
        };
        self.transition(next);
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    async fn process_data(
        &mut self,
        segment: Segment,
        now: Instant,
    ) -> std::result::Result<(), FailureReason> {
        let Some(recv) = self.recv.as_mut() else {
            return Ok(());
        };
        let fin = segment.flags.contains(Flags::FIN);
        let outcome = recv.on_segment(segment.seq, segment.payload, fin);

        if outcome.duplicate {
            self.stats.duplicate_segments += 1;
            if fin && self.state == ConnectionState::TimeWait {
                // Our final ACK was lost; stay around for the next copy too.
                self.start_time_wait(now);
            }
        }
        for chunk in outcome.delivered {
            self.stats.bytes_delivered += chunk.len() as u64;
            if let Some(tx) = &self.data_tx {
                let _ = tx.send(Ok(chunk));
            }
        }

        // Every segment occupying sequence space is acknowledged at once.
        self.send_ack().await?;

        if outcome.fin_reached {
            self.on_peer_fin(now);
        }
        Ok(())
    }

    fn on_peer_fin(&mut self, now: Instant) {
        debug!(state = %self.state, "Peer finished sending");
        // Dropping the sender signals end-of-stream to the reader.
        self.data_tx = None;
        let next = match self.state {
            ConnectionState::Established => ConnectionState::CloseWait,
            ConnectionState::FinWait1 => ConnectionState::Closing,
            ConnectionState::FinWait2 => {
                self.start_time_wait(now);
                ConnectionState::TimeWait
            }
            other => other,
        };
        self.transition(next);
    }

    /// Arms (or re-arms) the TIME_WAIT deadline. It spans several of our
    /// current RTOs, since the peer retransmits its FIN on a similar clock.
    fn start_time_wait(&mut self, now: Instant) {
        let linger = self
            .config
            .reliability
            .time_wait
            .max(self.send.rtt().rto() * TIME_WAIT_RTO_MULTIPLE);
        trace!(?linger, "TIME_WAIT armed");
        self.time_wait_until = Some(now + linger);
    }

    /// Whether reading has reopened a window the peer last saw as too small
    /// to carry a full segment.
    fn window_reopened(&self) -> bool {
        let Some(recv) = &self.recv else {
            return false;
        };
        if recv.fin_reached() {
            return false;
        }
        let capacity = usize::from(self.config.effective_recv_capacity());
        let threshold = self.config.effective_mss().min(capacity / 2).max(1);
        usize::from(self.advertised_window) < threshold && usize::from(recv.window()) >= threshold
    }

    async fn on_command(&mut self, command: StreamCommand) -> std::result::Result<(), FailureReason> {
        match command {
            StreamCommand::Send { data, done } => {
                if !self.state.accepts_writes() || self.close_requested {
                    let _ = done.send(Err(Error::ConnectionClosed));
                } else {
                    self.pending_writes.push_back(PendingWrite { data, done });
                }
            }
            StreamCommand::Close { done } => {
                if self.send.fin_acked() {
                    let _ = done.send(Ok(()));
                } else {
                    self.close_waiters.push(done);
                    if self.state.accepts_writes() {
                        self.close_requested = true;
                    }
                }
            }
            StreamCommand::Consumed { len } => {
                if let Some(recv) = self.recv.as_mut() {
                    recv.on_read(len);
                }
                if self.window_reopened() {
                    trace!(window = ?self.recv.as_ref().map(|r| r.window()), "Window update");
                    self.send_ack().await?;
                }
            }
            StreamCommand::Abort => {
                debug!(state = %self.state, "Stream dropped without close, resetting");
                self.abort().await;
            }
        }
        Ok(())
    }

    async fn on_retransmission_timeout(&mut self) -> std::result::Result<(), FailureReason> {
        match self.send.on_timeout(Instant::now())? {
            Some(segment) => self.transmit(segment).await,
            None => Ok(()),
        }
    }

    fn on_aux_deadline(&mut self) -> std::result::Result<(), FailureReason> {
        let now = Instant::now();
        if let Some(until) = self.time_wait_until {
            if now >= until {
                self.transition(ConnectionState::Closed);
            }
            return Ok(());
        }
        if now >= self.last_heard + self.config.connection.idle_timeout {
            return Err(FailureReason::IdleTimeout);
        }
        Ok(())
    }

    /// The next non-retransmission deadline: end of TIME_WAIT, or the idle
    /// timeout while the connection still waits on its peer.
    fn aux_deadline(&self) -> Option<Instant> {
        if self.time_wait_until.is_some() {
            return self.time_wait_until;
        }
        let waiting_on_peer = !self.state.is_handshaking()
            && (!self.send.is_drained() || self.state.is_closing());
        waiting_on_peer.then(|| self.last_heard + self.config.connection.idle_timeout)
    }

    /// Moves queued writes into the send buffer, starts a requested close
    /// once they are all in, and releases whatever the window allows.
    async fn flush(&mut self) -> std::result::Result<(), FailureReason> {
        while let Some(front) = self.pending_writes.front_mut() {
            let taken = self.send.write(&front.data);
            front.data.advance(taken);
            if !front.data.is_empty() {
                break;
            }
            if let Some(write) = self.pending_writes.pop_front() {
                let _ = write.done.send(Ok(()));
            }
        }

        if self.close_requested && self.pending_writes.is_empty() && !self.send.is_closing() {
            self.send.close();
            let next = match self.state {
                ConnectionState::Established => ConnectionState::FinWait1,
                ConnectionState::CloseWait => ConnectionState::LastAck,
                other => other,
            };
            self.transition(next);
        }

        if self.state.can_transmit() {
            for segment in self.send.poll_transmit(Instant::now()) {
                self.transmit(segment).await?;
            }
        }
        Ok(())
    }

    async fn transmit(&mut self, outgoing: OutgoingSegment) -> std::result::Result<(), FailureReason> {
        let mut flags = outgoing.flags;
        let (ack, window) = match &self.recv {
            Some(recv) => {
                flags |= Flags::ACK;
                (recv.ack_number(), recv.window())
            }
            None => (SeqNum(0), self.config.effective_recv_capacity()),
        };
        self.advertised_window = window;
        if outgoing.retransmission {
            trace!(seq = %outgoing.seq, "Retransmitting segment");
        }
        let segment = Segment::new(outgoing.seq, ack, flags, window, outgoing.payload);
        self.send_segment(&segment).await
    }

    async fn send_ack(&mut self) -> std::result::Result<(), FailureReason> {
        let Some(recv) = &self.recv else {
            return Ok(());
        };
        let segment = Segment::new(
            self.send.snd_nxt(),
            recv.ack_number(),
            Flags::ACK,
            recv.window(),
            Bytes::new(),
        );
        self.advertised_window = segment.window;
        self.send_segment(&segment).await
    }

    async fn send_segment(&mut self, segment: &Segment) -> std::result::Result<(), FailureReason> {
        trace!(
            seq = %segment.seq,
            ack = %segment.ack,
            flags = ?segment.flags,
            len = segment.payload.len(),
            "Sending segment"
        );
        self.stats.segments_sent += 1;
        self.socket
            .send_to(&segment.encode(), self.peer)
            .await
            .map(|_| ())
            .map_err(|e| FailureReason::Socket(e.to_string()))
    }

    async fn send_reset(&mut self) {
        let ack = self.recv.as_ref().map_or(SeqNum(0), |r| r.ack_number());
        let segment = Segment::new(self.send.snd_nxt(), ack, Flags::RST, 0, Bytes::new());
        if let Err(reason) = self.send_segment(&segment).await {
            trace!(%reason, "Failed to send RST");
        }
    }

    /// Resets the connection on behalf of the local application.
    async fn abort(&mut self) {
        self.send_reset().await;
        self.data_tx = None;
        for write in self.pending_writes.drain(..) {
            let _ = write.done.send(Err(Error::ConnectionClosed));
        }
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Err(Error::ConnectionClosed));
        }
        self.transition(ConnectionState::Closed);
    }

    /// Tears the connection down with an error visible to every waiter.
    async fn fail(&mut self, reason: FailureReason) {
        warn!(peer = %self.peer, state = %self.state, %reason, "Connection failed");
        if !matches!(reason, FailureReason::PeerReset | FailureReason::Socket(_)) {
            self.send_reset().await;
        }

        let error = || Error::TransferFailed(reason.clone());
        if let Some(tx) = self.established_tx.take() {
            let _ = tx.send(Err(error()));
        }
        if let Some(tx) = self.data_tx.take() {
            let _ = tx.send(Err(error()));
        }
        for write in self.pending_writes.drain(..) {
            let _ = write.done.send(Err(error()));
        }
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(Err(error()));
        }
        self.transition(ConnectionState::Closed);
        self.publish_stats();
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        if next == ConnectionState::Closed {
            info!(peer = %self.peer, "Connection closed");
        }
    }

    fn publish_stats(&self) {
        let mut snapshot = self.stats.clone();
        snapshot.dropped_datagrams = self.dropped.load(Ordering::Relaxed);
        self.send.record_stats(&mut snapshot);
        self.stats_tx.send_replace(snapshot);
    }
}
