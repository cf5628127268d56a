//! An estimator for the round-trip time (RTT).
//! RTT 估算器。

use std::time::Duration;

const ALPHA: f64 = 1.0 / 8.0;
const BETA: f64 = 1.0 / 4.0;

/// An estimator for the round-trip time (RTT), based on RFC 6298.
///
/// 一个基于 RFC 6298 的 RTT 估算器。
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// The smoothed round-trip time, in seconds. `None` before the first sample.
    /// 平滑的往返时间（秒）。第一个样本之前为 `None`。
    srtt: Option<f64>,
    /// The round-trip time variation, in seconds.
    /// 往返时间变化量（秒）。
    rttvar: f64,
    /// The retransmission timeout computed from the estimates.
    /// 根据估计值计算的重传超时时间。
    base_rto: Duration,
    /// Number of consecutive back-offs applied on top of `base_rto`.
    /// 在 `base_rto` 之上连续应用的退避次数。
    backoff_exponent: u32,
    min_rto: Duration,
    max_rto: Duration,
}

impl RttEstimator {
    /// Creates a new RTT estimator with a given initial RTO and bounds.
    ///
    /// 使用给定的初始 RTO 和边界创建一个新的 RTT 估算器。
    pub fn new(initial_rto: Duration, min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            srtt: None,
            rttvar: 0.0,
            base_rto: initial_rto.clamp(min_rto, max_rto),
            backoff_exponent: 0,
            min_rto,
            max_rto,
        }
    }

    /// Returns the current RTO value, including back-off.
    ///
    /// 返回当前的 RTO 值（包括退避）。
    pub fn rto(&self) -> Duration {
        let factor = 1u32 << self.backoff_exponent.min(16);
        self.base_rto.saturating_mul(factor).min(self.max_rto)
    }

    /// The smoothed RTT, if at least one sample has been taken.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt.map(Duration::from_secs_f64)
    }

    pub fn rttvar(&self) -> Duration {
        Duration::from_secs_f64(self.rttvar)
    }

    /// Doubles the RTO after a retransmission timeout.
    ///
    /// 重传超时后将 RTO 加倍。
    pub fn backoff(&mut self) {
        if self.rto() < self.max_rto {
            self.backoff_exponent += 1;
        }
    }

    /// Updates the RTT estimator with a new sample.
    ///
    /// Callers must not pass samples taken from retransmitted segments.
    ///
    /// 使用一个新的样本更新 RTT 估算器。调用者不得传入来自重传分段的样本。
    pub fn update(&mut self, rtt_sample: Duration) {
        let sample = rtt_sample.as_secs_f64();

        let srtt = match self.srtt {
            None => {
                self.rttvar = sample / 2.0;
                sample
            }
            Some(srtt) => {
                let delta = (srtt - sample).abs();
                self.rttvar = (1.0 - BETA) * self.rttvar + BETA * delta;
                (1.0 - ALPHA) * srtt + ALPHA * sample
            }
        };
        self.srtt = Some(srtt);

        let rto = Duration::from_secs_f64(srtt + 4.0 * self.rttvar);
        self.base_rto = rto.clamp(self.min_rto, self.max_rto);
        self.backoff_exponent = 0;
    }
}
