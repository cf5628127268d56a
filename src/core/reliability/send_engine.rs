//! Manages the sending side of a connection: buffering application bytes,
//! slicing them into segments, tracking what is unacknowledged and reacting
//! to ACKs and retransmission timeouts.
//!
//! 管理连接的发送端：缓冲应用字节、将其切分为分段、跟踪未确认的数据，并对ACK和重传超时做出响应。

use super::{rtt::RttEstimator, timer::RetransmissionTimer};
use crate::config::Config;
use crate::congestion::{AckEvent, CongestionControl, DuplicateAckAction, new_controller};
use crate::error::FailureReason;
use crate::packet::{Flags, SeqNum};
use crate::stats::ConnectionStats;
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// What an unacknowledged entry carries.
/// 未确认条目所携带的内容。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Syn,
    Data,
    Fin,
}

/// A segment that has been sent but not yet acknowledged.
#[derive(Debug, Clone)]
struct InFlightSegment {
    seq: SeqNum,
    kind: SegmentKind,
    payload: Bytes,
    sent_at: Instant,
    retransmits: u32,
}

impl InFlightSegment {
    fn seq_len(&self) -> u32 {
        match self.kind {
            SegmentKind::Data => self.payload.len() as u32,
            SegmentKind::Syn | SegmentKind::Fin => 1,
        }
    }

    fn end(&self) -> SeqNum {
        self.seq + self.seq_len()
    }

    fn to_outgoing(&self, retransmission: bool) -> OutgoingSegment {
        let flags = match self.kind {
            SegmentKind::Syn => Flags::SYN,
            SegmentKind::Data => Flags::NONE,
            SegmentKind::Fin => Flags::FIN,
        };
        OutgoingSegment {
            seq: self.seq,
            flags,
            payload: self.payload.clone(),
            retransmission,
        }
    }
}

/// A segment the endpoint should put on the wire. The endpoint fills in the
/// acknowledgment number, the ACK flag and the advertised window.
///
/// 端点应发送到线路上的分段。端点负责填写确认号、ACK标志和通告窗口。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingSegment {
    pub seq: SeqNum,
    pub flags: Flags,
    pub payload: Bytes,
    pub retransmission: bool,
}

/// The result of processing an acknowledgment.
/// 处理一个确认的结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckOutcome {
    /// Bytes of sequence space newly acknowledged.
    /// 新确认的序列空间字节数。
    pub newly_acked: u32,
    /// Set when the ACK was counted as a duplicate.
    pub duplicate: bool,
    /// The oldest unacknowledged segment, when the controller asked for a
    /// fast retransmit.
    /// 当控制器要求快速重传时，最早的未确认分段。
    pub fast_retransmit: Option<OutgoingSegment>,
}

#[derive(Debug, Default, Clone, Copy)]
struct SendCounters {
    bytes_sent: u64,
    retransmissions: u64,
    fast_retransmits: u64,
    timeouts: u64,
}

/// Manages outgoing data for one connection.
///
/// 管理单个连接的发出数据。
#[derive(Debug)]
pub struct SendEngine {
    /// Application bytes waiting to be segmented.
    stream_buffer: BytesMut,
    stream_buffer_capacity: usize,
    /// Unacknowledged segments in sequence order.
    in_flight: VecDeque<InFlightSegment>,
    /// Oldest unacknowledged sequence number.
    snd_una: SeqNum,
    /// Next sequence number to be used.
    snd_nxt: SeqNum,
    mss: usize,
    peer_window: u32,
    congestion: Box<dyn CongestionControl>,
    rtt: RttEstimator,
    timer: RetransmissionTimer,
    max_retransmissions: u32,
    handshake_max_retries: u32,
    fin_requested: bool,
    fin_sent: bool,
    counters: SendCounters,
}

impl SendEngine {
    /// Creates a send engine whose first segment will carry `initial_seq`.
    ///
    /// 创建一个发送引擎，其第一个分段将携带 `initial_seq`。
    pub fn new(initial_seq: SeqNum, config: &Config) -> Self {
        let reliability = &config.reliability;
        Self {
            stream_buffer: BytesMut::new(),
            stream_buffer_capacity: config.connection.send_buffer_capacity_bytes,
            in_flight: VecDeque::new(),
            snd_una: initial_seq,
            snd_nxt: initial_seq,
            mss: config.effective_mss(),
            peer_window: u32::from(u16::MAX),
            congestion: new_controller(config),
            rtt: RttEstimator::new(
                reliability.initial_rto,
                reliability.min_rto,
                reliability.max_rto,
            ),
            timer: RetransmissionTimer::new(),
            max_retransmissions: reliability.max_retransmissions,
            handshake_max_retries: reliability.handshake_max_retries,
            fin_requested: false,
            fin_sent: false,
            counters: SendCounters::default(),
        }
    }

    /// Buffers application data. Returns how many bytes were accepted.
    ///
    /// 缓冲应用数据。返回被接受的字节数。
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let accepted = buf.len().min(self.free_space());
        self.stream_buffer.extend_from_slice(&buf[..accepted]);
        accepted
    }

    /// Space left in the send buffer.
    pub fn free_space(&self) -> usize {
        self.stream_buffer_capacity
            .saturating_sub(self.stream_buffer.len())
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.stream_buffer.is_empty()
    }

    pub fn bytes_in_flight(&self) -> u32 {
        self.snd_nxt - self.snd_una
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn snd_una(&self) -> SeqNum {
        self.snd_una
    }

    pub fn snd_nxt(&self) -> SeqNum {
        self.snd_nxt
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    pub fn congestion(&self) -> &dyn CongestionControl {
        self.congestion.as_ref()
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn timer(&self) -> &RetransmissionTimer {
        &self.timer
    }

    /// The next retransmission deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// Marks the stream as finished. The FIN goes out once every buffered
    /// byte has been sent.
    ///
    /// 将流标记为结束。所有已缓冲字节发送后才会发出FIN。
    pub fn close(&mut self) {
        self.fin_requested = true;
    }

    pub fn is_closing(&self) -> bool {
        self.fin_requested
    }

    /// True once our FIN has been sent and acknowledged.
    pub fn fin_acked(&self) -> bool {
        self.fin_sent && self.in_flight.is_empty()
    }

    /// True when nothing is buffered or waiting for acknowledgment.
    pub fn is_drained(&self) -> bool {
        self.stream_buffer.is_empty() && self.in_flight.is_empty()
    }

    /// Emits the SYN (or the SYN half of a SYN-ACK). It consumes one
    /// sequence number and is retransmitted like any other segment.
    ///
    /// 发出SYN（或SYN-ACK中的SYN部分）。它消耗一个序列号，并像其他分段一样被重传。
    pub fn send_syn(&mut self, now: Instant) -> OutgoingSegment {
        self.push_in_flight(SegmentKind::Syn, Bytes::new(), now)
    }

    /// Applies a window advertisement that did not come with a new ACK.
    ///
    /// 应用一个未伴随新ACK的窗口通告。
    pub fn on_window_update(&mut self, window: u16) {
        let window = u32::from(window);
        if window == self.peer_window {
            return;
        }
        trace!(old = self.peer_window, new = window, "Peer window updated");
        self.peer_window = window;
        self.congestion.on_window_update(window);
        if window > 0 && self.in_flight.is_empty() {
            // Drop a pending zero-window probe deadline.
            self.timer.cancel();
        }
    }

    /// Slices buffered data into segments while the send window allows.
    ///
    /// A segment is only released when it fits entirely in
    /// `min(cwnd, peer window) - bytes in flight`; with nothing in flight a
    /// short segment may be sent so a window smaller than the MSS still
    /// makes progress.
    ///
    /// 在发送窗口允许的情况下将缓冲数据切分为分段。
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<OutgoingSegment> {
        let mut out = Vec::new();
        let window = self.congestion.current_send_window();

        while !self.stream_buffer.is_empty() {
            let available = window.saturating_sub(self.bytes_in_flight()) as usize;
            let mut len = self.stream_buffer.len().min(self.mss);
            if len > available {
                if available > 0 && self.in_flight.is_empty() {
                    len = available;
                } else {
                    break;
                }
            }
            let payload = self.stream_buffer.split_to(len).freeze();
            out.push(self.push_in_flight(SegmentKind::Data, payload, now));
        }

        if self.fin_requested && !self.fin_sent && self.stream_buffer.is_empty() {
            self.fin_sent = true;
            debug!(seq = %self.snd_nxt, "Sending FIN");
            out.push(self.push_in_flight(SegmentKind::Fin, Bytes::new(), now));
        }

        if window == 0 && self.in_flight.is_empty() && !self.stream_buffer.is_empty() {
            trace!("Peer window closed, arming probe timer");
            self.timer.start_if_idle(now + self.rtt.rto());
        }

        if !out.is_empty() {
            trace!(
                count = out.len(),
                in_flight = self.bytes_in_flight(),
                window,
                "Segments released"
            );
        }
        out
    }

    /// Processes a cumulative acknowledgment carried by an incoming segment.
    ///
    /// An ACK that moves `snd_una` forward retires segments, may yield an
    /// RTT sample and grows the window. An ACK equal to `snd_una` while data
    /// is outstanding is a duplicate; the endpoint only passes such ACKs in
    /// from segments that carry no data. Anything older, or acknowledging
    /// unsent data, is ignored.
    ///
    /// 处理传入分段携带的累积确认。
    pub fn on_ack(&mut self, ack: SeqNum, window: u16, now: Instant) -> AckOutcome {
        if ack > self.snd_nxt {
            trace!(%ack, snd_nxt = %self.snd_nxt, "Ignoring ACK for unsent data");
            return AckOutcome::default();
        }
        if ack < self.snd_una {
            return AckOutcome::default();
        }

        let window = u32::from(window);
        if ack > self.snd_una {
            let bytes_acked = ack - self.snd_una;
            let syn_acked = self
                .in_flight
                .front()
                .is_some_and(|s| s.kind == SegmentKind::Syn);
            let rtt_sample = self.retire(ack, now);
            self.snd_una = ack;
            self.peer_window = window;

            if let Some(sample) = rtt_sample {
                self.rtt.update(sample);
            }
            // The SYN's sequence number is not data and does not grow the window.
            let data_acked = bytes_acked - u32::from(syn_acked);
            if data_acked > 0 {
                self.congestion.on_ack(&AckEvent {
                    ack_number: ack,
                    advertised_window: window,
                    bytes_acked: data_acked,
                    rtt: rtt_sample,
                    now,
                });
            } else {
                self.congestion.on_window_update(window);
            }

            if self.in_flight.is_empty() {
                self.timer.cancel();
            } else {
                self.timer.restart_on_ack(now, self.rtt.rto());
            }

            trace!(
                %ack,
                bytes_acked,
                cwnd = self.congestion.congestion_window(),
                state = %self.congestion.state(),
                "New ACK"
            );
            return AckOutcome {
                newly_acked: bytes_acked,
                ..Default::default()
            };
        }

        // The receiver shrinks its window while it buffers out-of-order
        // data, so a changed window does not disqualify a duplicate.
        self.on_window_update(window as u16);
        if window == 0 {
            // A full receiver answering our probe is alive: keep probing.
            if let Some(front) = self.in_flight.front_mut() {
                front.retransmits = 0;
            }
            return AckOutcome::default();
        }
        if self.in_flight.is_empty() {
            return AckOutcome::default();
        }

        let mut outcome = AckOutcome {
            duplicate: true,
            ..Default::default()
        };
        if self.congestion.on_duplicate_ack() == DuplicateAckAction::FastRetransmit {
            if let Some(front) = self.in_flight.front_mut() {
                front.retransmits += 1;
                front.sent_at = now;
                self.counters.retransmissions += 1;
                self.counters.fast_retransmits += 1;
                debug!(
                    seq = %front.seq,
                    cwnd = self.congestion.congestion_window(),
                    "Fast retransmit"
                );
                outcome.fast_retransmit = Some(front.to_outgoing(true));
            }
        }
        outcome
    }

    /// Handles expiry of the retransmission timer.
    ///
    /// Only the oldest unacknowledged segment is resent. With nothing in
    /// flight but a closed peer window, a one-byte probe is sent instead.
    ///
    /// 处理重传定时器到期。仅重发最早的未确认分段。
    /// 如果没有在途数据但对端窗口已关闭，则发送一个单字节探测。
    pub fn on_timeout(
        &mut self,
        now: Instant,
    ) -> Result<Option<OutgoingSegment>, FailureReason> {
        self.timer.cancel();

        let Some(front) = self.in_flight.front_mut() else {
            if self.congestion.current_send_window() == 0 && !self.stream_buffer.is_empty() {
                let payload = self.stream_buffer.split_to(1).freeze();
                self.rtt.backoff();
                debug!(seq = %self.snd_nxt, "Sending zero-window probe");
                return Ok(Some(self.push_in_flight(SegmentKind::Data, payload, now)));
            }
            return Ok(None);
        };

        let limit = match front.kind {
            SegmentKind::Syn => self.handshake_max_retries,
            _ => self.max_retransmissions,
        };
        if front.retransmits >= limit {
            warn!(
                seq = %front.seq,
                retransmits = front.retransmits,
                "Retransmission limit reached"
            );
            return Err(match front.kind {
                SegmentKind::Syn => FailureReason::HandshakeTimeout,
                _ => FailureReason::RetransmissionLimitExceeded {
                    seq: front.seq.get(),
                },
            });
        }

        front.retransmits += 1;
        front.sent_at = now;
        let segment = front.to_outgoing(true);
        let is_syn = front.kind == SegmentKind::Syn;

        self.counters.retransmissions += 1;
        self.counters.timeouts += 1;
        if !is_syn {
            self.congestion.on_timeout();
        }
        self.rtt.backoff();
        self.timer.start(now + self.rtt.rto());

        debug!(
            seq = %segment.seq,
            rto = ?self.rtt.rto(),
            cwnd = self.congestion.congestion_window(),
            "Retransmission timeout"
        );
        Ok(Some(segment))
    }

    /// Writes the send-side counters into `stats`.
    pub fn record_stats(&self, stats: &mut ConnectionStats) {
        stats.bytes_sent = self.counters.bytes_sent;
        stats.retransmissions = self.counters.retransmissions;
        stats.fast_retransmits = self.counters.fast_retransmits;
        stats.timeouts = self.counters.timeouts;
        stats.congestion_window = self.congestion.congestion_window();
        stats.slow_start_threshold = self.congestion.slow_start_threshold();
        stats.congestion_state = self.congestion.state();
        stats.srtt = self.rtt.srtt();
        stats.rto = self.rtt.rto();
    }

    fn push_in_flight(&mut self, kind: SegmentKind, payload: Bytes, now: Instant) -> OutgoingSegment {
        let entry = InFlightSegment {
            seq: self.snd_nxt,
            kind,
            payload,
            sent_at: now,
            retransmits: 0,
        };
        self.snd_nxt += entry.seq_len();
        if kind == SegmentKind::Data {
            self.counters.bytes_sent += entry.payload.len() as u64;
        }
        self.timer.start_if_idle(now + self.rtt.rto());
        let segment = entry.to_outgoing(false);
        self.in_flight.push_back(entry);
        segment
    }

    /// Drops every segment fully covered by `ack` and trims a partially
    /// covered one. Returns an RTT sample unless a retransmitted segment was
    /// among those retired.
    fn retire(&mut self, ack: SeqNum, now: Instant) -> Option<Duration> {
        let mut sample = None;
        let mut ambiguous = false;

        while let Some(front) = self.in_flight.front_mut() {
            if front.end() <= ack {
                if front.retransmits > 0 {
                    ambiguous = true;
                } else {
                    sample = Some(now.saturating_duration_since(front.sent_at));
                }
                self.in_flight.pop_front();
            } else {
                if front.kind == SegmentKind::Data && front.seq < ack {
                    let covered = (ack - front.seq) as usize;
                    front.payload = front.payload.slice(covered..);
                    front.seq = ack;
                }
                break;
            }
        }

        if ambiguous { None } else { sample }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion::CongestionState;

    const MSS: usize = 1000;
    const ISN: u32 = 5000;

    fn config() -> Config {
        let mut config = Config::default();
        config.connection.mss = MSS;
        config.connection.send_buffer_capacity_bytes = 64 * 1024;
        config.congestion_control.initial_ssthresh = 64 * 1024;
        config.reliability.initial_rto = Duration::from_millis(500);
        config.reliability.min_rto = Duration::from_millis(100);
        config.reliability.max_rto = Duration::from_secs(10);
        config
    }

    fn engine(config: &Config) -> SendEngine {
        SendEngine::new(SeqNum(ISN), config)
    }

    #[test]
    fn test_write_respects_buffer_capacity() {
        let mut config = config();
        config.connection.send_buffer_capacity_bytes = 1500;
        let mut engine = engine(&config);

        assert_eq!(engine.write(&[1; 1000]), 1000);
        assert_eq!(engine.write(&[2; 1000]), 500);
        assert_eq!(engine.free_space(), 0);
        assert_eq!(engine.write(&[3; 10]), 0);
    }

    #[test]
    fn test_transmit_is_limited_by_congestion_window() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[7; 5000]);

        // Initial window is a single segment.
        let first = engine.poll_transmit(now);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].seq, SeqNum(ISN));
        assert_eq!(first[0].payload.len(), MSS);
        assert!(engine.poll_transmit(now).is_empty());
        assert!(engine.timer().is_armed());

        // Slow start: one ACK opens room for two more segments.
        let outcome = engine.on_ack(SeqNum(ISN + 1000), u16::MAX, now + Duration::from_millis(10));
        assert_eq!(outcome.newly_acked, 1000);
        let next = engine.poll_transmit(now);
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].seq, SeqNum(ISN + 1000));
        assert_eq!(next[1].seq, SeqNum(ISN + 2000));
        assert_eq!(engine.bytes_in_flight(), 2000);
    }

    #[test]
    fn test_segment_must_fit_peer_window() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 1000]);
        engine.poll_transmit(now);
        engine.on_ack(SeqNum(ISN + 1000), 1500, now);

        engine.write(&[2; 3000]);
        let out = engine.poll_transmit(now);
        // cwnd is 2000 but the peer only takes 1500: one full segment fits.
        assert_eq!(out.len(), 1);
        assert_eq!(engine.bytes_in_flight(), 1000);
        assert!(engine.bytes_in_flight() <= engine.congestion().current_send_window());
    }

    #[test]
    fn test_ack_for_unsent_or_old_data_is_ignored() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 1000]);
        engine.poll_transmit(now);

        assert_eq!(engine.on_ack(SeqNum(ISN + 5000), u16::MAX, now), AckOutcome::default());
        assert_eq!(engine.on_ack(SeqNum(ISN - 10), u16::MAX, now), AckOutcome::default());
        assert_eq!(engine.snd_una(), SeqNum(ISN));
        assert_eq!(engine.in_flight_count(), 1);
    }

    #[test]
    fn test_rtt_sampled_from_fresh_segment() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 1000]);
        engine.poll_transmit(now);

        engine.on_ack(SeqNum(ISN + 1000), u16::MAX, now + Duration::from_millis(80));
        assert_eq!(engine.rtt().srtt(), Some(Duration::from_millis(80)));
        assert!(!engine.timer().is_armed());
    }

    #[test]
    fn test_karn_discards_sample_from_retransmission() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 1000]);
        engine.poll_transmit(now);

        let later = now + Duration::from_millis(500);
        let resent = engine.on_timeout(later).unwrap().unwrap();
        assert!(resent.retransmission);
        assert_eq!(resent.seq, SeqNum(ISN));

        engine.on_ack(SeqNum(ISN + 1000), u16::MAX, later + Duration::from_millis(20));
        assert_eq!(engine.rtt().srtt(), None);
    }

    #[test]
    fn test_timeout_resends_oldest_and_collapses_window() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 8000]);
        engine.poll_transmit(now);
        for i in 1..=3 {
            engine.on_ack(SeqNum(ISN + i * 1000), u16::MAX, now);
            engine.poll_transmit(now);
        }
        assert!(engine.in_flight_count() > 1);
        let oldest = engine.snd_una();

        let resent = engine.on_timeout(now + Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(resent.seq, oldest);
        assert_eq!(engine.congestion().congestion_window(), MSS as u32);
        assert_eq!(engine.congestion().state(), CongestionState::SlowStart);
        // Zero-length samples pinned the RTO at its floor; one back-off doubles it.
        assert_eq!(engine.rtt().rto(), Duration::from_millis(200));
    }

    #[test]
    fn test_retransmission_limit_fails_transfer() {
        let mut config = config();
        config.reliability.max_retransmissions = 2;
        let mut engine = engine(&config);
        let mut now = Instant::now();
        engine.write(&[1; 10]);
        engine.poll_transmit(now);

        for _ in 0..2 {
            now += Duration::from_secs(10);
            assert!(engine.on_timeout(now).unwrap().is_some());
        }
        now += Duration::from_secs(10);
        assert_eq!(
            engine.on_timeout(now),
            Err(FailureReason::RetransmissionLimitExceeded { seq: ISN })
        );
    }

    #[test]
    fn test_syn_uses_handshake_retry_limit() {
        let mut config = config();
        config.reliability.handshake_max_retries = 1;
        let mut engine = engine(&config);
        let now = Instant::now();

        let syn = engine.send_syn(now);
        assert_eq!(syn.flags, Flags::SYN);
        assert_eq!(engine.snd_nxt(), SeqNum(ISN + 1));

        let resent = engine.on_timeout(now).unwrap().unwrap();
        assert_eq!(resent.flags, Flags::SYN);
        // SYN retries leave the congestion state alone.
        assert_eq!(engine.congestion().slow_start_threshold(), 64 * 1024);
        assert_eq!(engine.on_timeout(now), Err(FailureReason::HandshakeTimeout));
    }

    #[test]
    fn test_fin_follows_data_and_consumes_sequence_number() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 500]);
        engine.close();

        let out = engine.poll_transmit(now);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].payload.len(), 500);
        assert_eq!(out[1].flags, Flags::FIN);
        assert_eq!(out[1].seq, SeqNum(ISN + 500));
        assert_eq!(engine.snd_nxt(), SeqNum(ISN + 501));
        assert!(!engine.fin_acked());

        // Only a single FIN is ever queued.
        assert!(engine.poll_transmit(now).is_empty());

        engine.on_ack(SeqNum(ISN + 501), u16::MAX, now);
        assert!(engine.fin_acked());
        assert!(engine.is_drained());
    }

    #[test]
    fn test_fin_waits_for_window() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 3000]);
        engine.close();

        let out = engine.poll_transmit(now);
        assert_eq!(out.len(), 1);
        assert!(out.iter().all(|s| s.flags != Flags::FIN));
    }

    #[test]
    fn test_zero_window_probe() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 1000]);
        engine.poll_transmit(now);
        engine.on_ack(SeqNum(ISN + 1000), 0, now);

        engine.write(&[2; 100]);
        assert!(engine.poll_transmit(now).is_empty());
        assert!(engine.timer().is_armed());

        let probe = engine.on_timeout(now + Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(probe.payload.len(), 1);
        assert_eq!(probe.seq, SeqNum(ISN + 1000));
        assert!(engine.timer().is_armed());

        // The window reopens: the rest flows normally.
        engine.on_ack(SeqNum(ISN + 1001), u16::MAX, now + Duration::from_secs(2));
        let out = engine.poll_transmit(now + Duration::from_secs(2));
        assert_eq!(out.iter().map(|s| s.payload.len()).sum::<usize>(), 99);
    }

    #[test]
    fn test_answered_probes_never_exhaust_retransmissions() {
        let mut config = config();
        config.reliability.max_retransmissions = 2;
        let mut engine = engine(&config);
        let mut now = Instant::now();
        engine.write(&[1; 1000]);
        engine.poll_transmit(now);
        engine.on_ack(SeqNum(ISN + 1000), 0, now);
        engine.write(&[2; 100]);
        engine.poll_transmit(now);

        // The receiver stays full for a long time but answers every probe.
        for _ in 0..10 {
            now += Duration::from_secs(10);
            let probe = engine.on_timeout(now).unwrap().unwrap();
            assert_eq!(probe.seq, SeqNum(ISN + 1000));
            assert_eq!(engine.on_ack(SeqNum(ISN + 1000), 0, now), AckOutcome::default());
        }
        assert_eq!(engine.in_flight_count(), 1);
    }

    #[test]
    fn test_huge_mss_is_clamped_to_datagram_payload() {
        let mut config = config();
        config.connection.mss = 1 << 20;
        config.connection.send_buffer_capacity_bytes = 1 << 20;
        config.congestion_control.initial_cwnd_segments = 2;
        let mut engine = engine(&config);
        engine.write(&vec![3; 100_000]);

        let out = engine.poll_transmit(Instant::now());
        assert!(!out.is_empty());
        for segment in out {
            assert!(segment.payload.len() <= crate::packet::MAX_PAYLOAD_SIZE);
            let wire = crate::packet::Segment::new(
                segment.seq,
                SeqNum(0),
                segment.flags,
                0,
                segment.payload.clone(),
            );
            let decoded = crate::packet::Segment::decode(&wire.encode()).unwrap();
            assert_eq!(decoded.payload, segment.payload);
        }
    }

    #[test]
    fn test_zero_mss_agrees_with_congestion_window() {
        let mut config = config();
        config.connection.mss = 0;
        let mut engine = engine(&config);
        engine.write(&[1; 10]);

        let out = engine.poll_transmit(Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload.len(), 1);
        assert_eq!(engine.congestion().congestion_window(), 1);
    }

    #[test]
    fn test_duplicate_acks_carry_window_updates() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 1000]);
        engine.poll_transmit(now);

        for window in [4000, 3000] {
            let outcome = engine.on_ack(SeqNum(ISN), window, now);
            assert!(outcome.duplicate);
            assert!(outcome.fast_retransmit.is_none());
            assert_eq!(engine.peer_window(), u32::from(window));
        }
        let outcome = engine.on_ack(SeqNum(ISN), 2000, now);
        assert!(outcome.duplicate);
        assert_eq!(outcome.fast_retransmit.unwrap().seq, SeqNum(ISN));
    }

    #[test]
    fn test_no_duplicates_without_outstanding_data() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(!engine.on_ack(SeqNum(ISN), 1000, now).duplicate);
        }
        assert_eq!(engine.peer_window(), 1000);
    }

    #[test]
    fn test_record_stats() {
        let config = config();
        let mut engine = engine(&config);
        let now = Instant::now();
        engine.write(&[1; 1500]);
        engine.poll_transmit(now);
        engine.on_timeout(now + Duration::from_secs(1)).unwrap();

        let mut stats = ConnectionStats::default();
        engine.record_stats(&mut stats);
        assert_eq!(stats.bytes_sent, 1000);
        assert_eq!(stats.retransmissions, 1);
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.congestion_window, MSS as u32);
    }
}
