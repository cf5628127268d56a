//! An implementation of a Vegas-like, latency-based congestion control algorithm.
//!
//! 一个类Vegas、基于延迟的拥塞控制算法的实现。

use super::window::WindowState;
use super::{AckEvent, CongestionControl, CongestionState, DuplicateAckAction};
use crate::config::{CongestionAlgorithm, Config};
use std::time::Duration;
use tracing::trace;

const VEGAS_DECREASE: f64 = 0.5;

/// A Vegas-like congestion controller.
///
/// Slow start and loss handling are Reno's. In congestion avoidance the
/// window is adjusted once per round trip by comparing the expected
/// throughput (`cwnd / min_rtt`) against the actual one (`cwnd / rtt`).
///
/// 一个类Vegas的拥塞控制器。
#[derive(Debug)]
pub struct Vegas {
    pub(super) window: WindowState,

    pub(super) min_rtt: Option<Duration>,

    /// The last measured RTT.
    last_rtt: Option<Duration>,

    alpha_segments: u32,

    beta_segments: u32,
}

impl Vegas {
    pub fn new(config: &Config) -> Self {
        Self {
            window: WindowState::new(config),
            min_rtt: None,
            last_rtt: None,
            alpha_segments: config.congestion_control.vegas_alpha_segments,
            beta_segments: config.congestion_control.vegas_beta_segments,
        }
    }

    fn update_rtt_stats(&mut self, rtt: Duration) {
        self.last_rtt = Some(rtt);
        self.min_rtt = Some(self.min_rtt.map_or(rtt, |min| min.min(rtt)));
    }

    /// Estimated number of this connection's segments queued in the network.
    fn queued_segments(&self) -> Option<f64> {
        let (min_rtt, rtt) = (self.min_rtt?, self.last_rtt?);
        if rtt.is_zero() {
            return None;
        }
        let cwnd_segments = f64::from(self.window.cwnd) / f64::from(self.window.mss);
        let expected = cwnd_segments / min_rtt.as_secs_f64().max(f64::EPSILON);
        let actual = cwnd_segments / rtt.as_secs_f64();
        Some((expected - actual) * min_rtt.as_secs_f64())
    }

    fn congestion_avoidance(&mut self, bytes_acked: u32) {
        if self.window.complete_rounds(bytes_acked) == 0 {
            return;
        }

        let mss = self.window.mss;
        match self.queued_segments() {
            Some(diff) if diff < f64::from(self.alpha_segments) => {
                self.window.cwnd = self.window.cwnd.saturating_add(mss);
                trace!(cwnd = self.window.cwnd, diff, "Congestion Avoidance: increasing cwnd");
            }
            Some(diff) if diff > f64::from(self.beta_segments) => {
                self.window.cwnd = self.window.cwnd.saturating_sub(mss).max(mss);
                trace!(cwnd = self.window.cwnd, diff, "Congestion Avoidance: decreasing cwnd");
            }
            Some(diff) => {
                trace!(cwnd = self.window.cwnd, diff, "Congestion Avoidance: cwnd stable");
            }
            None => {
                // No usable RTT yet, behave like Reno.
                self.window.cwnd = self.window.cwnd.saturating_add(mss);
            }
        }
    }
}

impl CongestionControl for Vegas {
    fn on_ack(&mut self, ack: &AckEvent) {
        self.window.peer_window = ack.advertised_window;
        if let Some(rtt) = ack.rtt {
            self.update_rtt_stats(rtt);
        }

        if !self.window.exit_fast_recovery() {
            match self.window.state {
                CongestionState::SlowStart => self.window.slow_start_step(),
                CongestionState::CongestionAvoidance => self.congestion_avoidance(ack.bytes_acked),
                CongestionState::FastRecovery => {}
            }
        }

        self.window.clamp();
    }

    fn on_timeout(&mut self) {
        self.window.timeout(VEGAS_DECREASE);
    }

    fn on_duplicate_ack(&mut self) -> DuplicateAckAction {
        self.window.duplicate_ack(VEGAS_DECREASE)
    }

    fn on_window_update(&mut self, advertised_window: u32) {
        self.window.set_peer_window(advertised_window);
    }

    fn current_send_window(&self) -> u32 {
        self.window.send_window()
    }

    fn congestion_window(&self) -> u32 {
        self.window.cwnd
    }

    fn slow_start_threshold(&self) -> u32 {
        self.window.ssthresh
    }

    fn state(&self) -> CongestionState {
        self.window.state
    }

    fn algorithm(&self) -> CongestionAlgorithm {
        CongestionAlgorithm::Vegas
    }
}
