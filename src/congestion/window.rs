//! Window bookkeeping shared by every strategy: slow start, loss reactions,
//! duplicate-ACK counting and the flow-control clamp.
//!
//! 所有策略共享的窗口记账：慢启动、丢包响应、重复ACK计数以及流量控制钳制。

use super::{CongestionState, DuplicateAckAction};
use crate::config::Config;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub(crate) struct WindowState {
    pub(crate) cwnd: u32,
    pub(crate) ssthresh: u32,
    pub(crate) state: CongestionState,
    pub(crate) mss: u32,
    pub(crate) peer_window: u32,
    pub(crate) dup_acks: u32,
    dup_ack_threshold: u32,
    /// Bytes acknowledged since the last congestion-avoidance increase.
    pub(crate) bytes_acked_in_round: u32,
}

impl WindowState {
    pub(crate) fn new(config: &Config) -> Self {
        let mss = config.effective_mss() as u32;
        Self {
            cwnd: config
                .congestion_control
                .initial_cwnd_segments
                .max(1)
                .saturating_mul(mss),
            ssthresh: config.congestion_control.initial_ssthresh.max(mss),
            state: CongestionState::SlowStart,
            mss,
            peer_window: u32::from(u16::MAX),
            dup_acks: 0,
            dup_ack_threshold: config.reliability.dup_ack_threshold.max(1),
            bytes_acked_in_round: 0,
        }
    }

    pub(crate) fn send_window(&self) -> u32 {
        self.cwnd.min(self.peer_window)
    }

    pub(crate) fn set_peer_window(&mut self, window: u32) {
        self.peer_window = window;
        self.clamp();
    }

    /// Leaves fast recovery if active. Returns `true` when it did.
    pub(crate) fn exit_fast_recovery(&mut self) -> bool {
        self.dup_acks = 0;
        if self.state != CongestionState::FastRecovery {
            return false;
        }
        self.cwnd = self.ssthresh;
        self.state = CongestionState::CongestionAvoidance;
        self.bytes_acked_in_round = 0;
        debug!(cwnd = self.cwnd, "Fast recovery complete, entering congestion avoidance");
        true
    }

    /// One slow-start step. Moves to congestion avoidance at the threshold.
    pub(crate) fn slow_start_step(&mut self) {
        self.cwnd = self.cwnd.saturating_add(self.mss);
        trace!(cwnd = self.cwnd, "Slow start: cwnd increased");
        if self.cwnd >= self.ssthresh {
            self.state = CongestionState::CongestionAvoidance;
            self.bytes_acked_in_round = 0;
            debug!(cwnd = self.cwnd, ssthresh = self.ssthresh, "Entering congestion avoidance");
        }
    }

    /// Accumulates acknowledged bytes and reports how many full windows
    /// have been acknowledged since the last call that returned non-zero.
    pub(crate) fn complete_rounds(&mut self, bytes_acked: u32) -> u32 {
        self.bytes_acked_in_round = self.bytes_acked_in_round.saturating_add(bytes_acked);
        let mut rounds = 0;
        while self.cwnd > 0 && self.bytes_acked_in_round >= self.cwnd {
            self.bytes_acked_in_round -= self.cwnd;
            rounds += 1;
        }
        rounds
    }

    /// Counts a duplicate ACK. On the threshold-th one the window is cut to
    /// `cwnd * decrease` and fast recovery begins.
    pub(crate) fn duplicate_ack(&mut self, decrease: f64) -> DuplicateAckAction {
        self.dup_acks += 1;

        if self.state == CongestionState::FastRecovery {
            self.cwnd = self.cwnd.saturating_add(self.mss);
            self.clamp();
            trace!(cwnd = self.cwnd, "Fast recovery: cwnd inflated");
            return DuplicateAckAction::None;
        }

        if self.dup_acks < self.dup_ack_threshold {
            return DuplicateAckAction::None;
        }

        self.ssthresh = self.reduced(decrease);
        self.cwnd = self
            .ssthresh
            .saturating_add(self.dup_ack_threshold * self.mss);
        self.state = CongestionState::FastRecovery;
        self.clamp();
        debug!(
            ssthresh = self.ssthresh,
            cwnd = self.cwnd,
            "Duplicate ACK threshold reached, entering fast recovery"
        );
        DuplicateAckAction::FastRetransmit
    }

    /// Retransmission timeout: collapse to one segment and restart slow start.
    pub(crate) fn timeout(&mut self, decrease: f64) {
        self.ssthresh = self.reduced(decrease);
        self.cwnd = self.mss;
        self.state = CongestionState::SlowStart;
        self.dup_acks = 0;
        self.bytes_acked_in_round = 0;
        debug!(
            ssthresh = self.ssthresh,
            cwnd = self.cwnd,
            "Retransmission timeout, back to slow start"
        );
    }

    /// The congestion window never outgrows what the peer can take, but it
    /// always allows at least one segment.
    pub(crate) fn clamp(&mut self) {
        let ceiling = self.peer_window.max(self.mss);
        if self.cwnd > ceiling {
            self.cwnd = ceiling;
        }
    }

    fn reduced(&self, decrease: f64) -> u32 {
        ((f64::from(self.cwnd) * decrease).round() as u32).max(self.mss)
    }
}
