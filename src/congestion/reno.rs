//! Classic TCP Reno congestion control.
//!
//! 经典的 TCP Reno 拥塞控制。

use super::window::WindowState;
use super::{AckEvent, CongestionControl, CongestionState, DuplicateAckAction};
use crate::config::{CongestionAlgorithm, Config};
use tracing::trace;

const RENO_DECREASE: f64 = 0.5;

/// A Reno congestion controller.
///
/// - Slow start: `cwnd += MSS` per new ACK until `cwnd >= ssthresh`.
/// - Congestion avoidance: `cwnd += MSS` per full window of acknowledged bytes.
/// - Fast recovery on the duplicate-ACK threshold: `ssthresh = cwnd / 2`,
///   `cwnd = ssthresh + 3 * MSS`, left on the next new ACK with `cwnd = ssthresh`.
/// - Timeout: `ssthresh = cwnd / 2`, `cwnd = MSS`, back to slow start.
///
/// Reno 拥塞控制器。
#[derive(Debug)]
pub struct Reno {
    pub(super) window: WindowState,
}

impl Reno {
    pub fn new(config: &Config) -> Self {
        Self {
            window: WindowState::new(config),
        }
    }
}

impl CongestionControl for Reno {
    fn on_ack(&mut self, ack: &AckEvent) {
        self.window.peer_window = ack.advertised_window;

        if !self.window.exit_fast_recovery() {
            match self.window.state {
                CongestionState::SlowStart => self.window.slow_start_step(),
                CongestionState::CongestionAvoidance => {
                    let rounds = self.window.complete_rounds(ack.bytes_acked);
                    if rounds > 0 {
                        self.window.cwnd = self
                            .window
                            .cwnd
                            .saturating_add(rounds * self.window.mss);
                        trace!(cwnd = self.window.cwnd, "Congestion avoidance: cwnd increased");
                    }
                }
                CongestionState::FastRecovery => {}
            }
        }

        self.window.clamp();
    }

    fn on_timeout(&mut self) {
        self.window.timeout(RENO_DECREASE);
    }

    fn on_duplicate_ack(&mut self) -> DuplicateAckAction {
        self.window.duplicate_ack(RENO_DECREASE)
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
        CongestionAlgorithm::Reno
    }
}
