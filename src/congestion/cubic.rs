//! CUBIC congestion control (RFC 8312), sharing Reno's loss detection.
//!
//! CUBIC 拥塞控制（RFC 8312），与 Reno 共享丢包检测。

use super::window::WindowState;
use super::{AckEvent, CongestionControl, CongestionState, DuplicateAckAction};
use crate::config::{CongestionAlgorithm, Config};
use tokio::time::Instant;
use tracing::trace;

/// A CUBIC congestion controller.
///
/// In congestion avoidance the window follows `W(t) = C (t - K)^3 + W_max`
/// (in segments), where `W_max` is the window at the last loss and `K` is the
/// time needed to climb back to it. It never grows slower than Reno would.
///
/// CUBIC 拥塞控制器。
#[derive(Debug)]
pub struct Cubic {
    pub(super) window: WindowState,
    c: f64,
    beta: f64,
    /// Window, in segments, just before the last reduction.
    pub(super) w_max: f64,
    /// Start of the current growth epoch.
    epoch_start: Option<Instant>,
    /// Window, in segments, at the start of the epoch.
    origin: f64,
    k: f64,
}

impl Cubic {
    pub fn new(config: &Config) -> Self {
        Self {
            window: WindowState::new(config),
            c: config.congestion_control.cubic_c,
            beta: config.congestion_control.cubic_beta,
            w_max: 0.0,
            epoch_start: None,
            origin: 0.0,
            k: 0.0,
        }
    }

    fn cwnd_segments(&self) -> f64 {
        f64::from(self.window.cwnd) / f64::from(self.window.mss)
    }

    fn record_loss(&mut self) {
        self.w_max = self.cwnd_segments();
        self.epoch_start = None;
    }

    fn congestion_avoidance(&mut self, ack: &AckEvent) {
        let mss = f64::from(self.window.mss);
        let cwnd = self.cwnd_segments();

        let epoch_start = match self.epoch_start {
            Some(start) => start,
            None => {
                if cwnd < self.w_max {
                    self.k = ((self.w_max - cwnd) / self.c).cbrt();
                    self.origin = self.w_max;
                } else {
                    self.k = 0.0;
                    self.origin = cwnd;
                }
                self.epoch_start = Some(ack.now);
                ack.now
            }
        };

        let t = ack.now.duration_since(epoch_start).as_secs_f64();
        let target = self.origin + self.c * (t - self.k).powi(3);

        // Reno-equivalent growth, one segment per window of acknowledged bytes.
        let reno_rounds = self.window.complete_rounds(ack.bytes_acked);

        let cubic_increase = if target > cwnd {
            ((target - cwnd) / cwnd * mss) as u32
        } else {
            0
        };
        let increase = cubic_increase.max(reno_rounds * self.window.mss);
        if increase > 0 {
            self.window.cwnd = self.window.cwnd.saturating_add(increase);
            trace!(
                cwnd = self.window.cwnd,
                target_segments = target,
                "CUBIC: cwnd increased"
            );
        }
    }
}

impl CongestionControl for Cubic {
    fn on_ack(&mut self, ack: &AckEvent) {
        self.window.peer_window = ack.advertised_window;

        if !self.window.exit_fast_recovery() {
            match self.window.state {
                CongestionState::SlowStart => self.window.slow_start_step(),
                CongestionState::CongestionAvoidance => self.congestion_avoidance(ack),
                CongestionState::FastRecovery => {}
            }
        }

        self.window.clamp();
    }

    fn on_timeout(&mut self) {
        self.record_loss();
        self.window.timeout(self.beta);
    }

    fn on_duplicate_ack(&mut self) -> DuplicateAckAction {
        let before = self.cwnd_segments();
        let action = self.window.duplicate_ack(self.beta);
        if action == DuplicateAckAction::FastRetransmit {
            self.w_max = before;
            self.epoch_start = None;
        }
        action
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
        CongestionAlgorithm::Cubic
    }
}
