//! Defines the pluggable congestion control interface.
//! 定义了可插拔的拥塞控制接口。
//!
//! A connection picks one strategy when it is opened and keeps it for its
//! whole life. Every strategy speaks the same small event contract: new
//! cumulative ACKs, duplicate ACKs, retransmission timeouts and peer window
//! updates go in, a send window in bytes comes out.

use crate::config::{CongestionAlgorithm, Config};
use crate::packet::SeqNum;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

pub mod cubic;
pub mod reno;
pub mod vegas;
mod window;

pub use cubic::Cubic;
pub use reno::Reno;
pub use vegas::Vegas;

/// The phase of a congestion controller.
/// 拥塞控制器所处的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionState {
    /// The window grows by one segment per new ACK.
    /// 每个新ACK使窗口增长一个分段。
    #[default]
    SlowStart,
    /// The window grows by roughly one segment per round trip.
    /// 窗口大约每个往返增长一个分段。
    CongestionAvoidance,
    /// A fast retransmit is outstanding; duplicate ACKs inflate the window.
    /// 快速重传进行中；重复ACK会膨胀窗口。
    FastRecovery,
}

impl fmt::Display for CongestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SlowStart => "slow-start",
            Self::CongestionAvoidance => "congestion-avoidance",
            Self::FastRecovery => "fast-recovery",
        };
        f.write_str(name)
    }
}

/// A new cumulative acknowledgment, as observed by the send engine.
///
/// 发送引擎观察到的一个新的累积确认。
#[derive(Debug, Clone, Copy)]
pub struct AckEvent {
    /// The acknowledged sequence number (next byte the peer expects).
    /// 被确认的序列号（对端期望的下一个字节）。
    pub ack_number: SeqNum,
    /// The receive window the peer advertised with this ACK, in bytes.
    /// 对端随此ACK通告的接收窗口（字节）。
    pub advertised_window: u32,
    /// How many bytes of sequence space this ACK newly covers.
    /// 此ACK新覆盖的序列空间字节数。
    pub bytes_acked: u32,
    /// A round-trip sample, absent when only retransmitted segments were acked.
    /// 往返时间样本；当仅确认了重传分段时为空。
    pub rtt: Option<Duration>,
    pub now: Instant,
}

/// What the sender should do after a duplicate ACK.
/// 收到重复ACK后发送方应执行的动作。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateAckAction {
    /// Keep waiting.
    None,
    /// Retransmit the oldest unacknowledged segment now.
    FastRetransmit,
}

/// A trait for congestion control algorithms.
///
/// All quantities are in bytes.
///
/// 拥塞控制算法的 trait。所有数量均以字节为单位。
pub trait CongestionControl: fmt::Debug + Send + Sync + 'static {
    /// Called for every ACK that advances the cumulative acknowledgment point.
    ///
    /// 每当累积确认点前进时调用。
    fn on_ack(&mut self, ack: &AckEvent);

    /// Called when the retransmission timer fires.
    ///
    /// 当重传定时器触发时调用。
    fn on_timeout(&mut self);

    /// Called for every duplicate ACK. Returns [`DuplicateAckAction::FastRetransmit`]
    /// exactly once per loss event.
    ///
    /// 每个重复ACK时调用。每个丢包事件恰好返回一次 [`DuplicateAckAction::FastRetransmit`]。
    fn on_duplicate_ack(&mut self) -> DuplicateAckAction;

    /// Called when the peer advertises a new receive window without acknowledging new data.
    ///
    /// 当对端通告新的接收窗口但未确认新数据时调用。
    fn on_window_update(&mut self, advertised_window: u32);

    /// How many bytes may be in flight: `min(cwnd, peer window)`.
    ///
    /// 允许在途的字节数：`min(cwnd, 对端窗口)`。
    fn current_send_window(&self) -> u32;

    fn congestion_window(&self) -> u32;

    fn slow_start_threshold(&self) -> u32;

    fn state(&self) -> CongestionState;

    fn algorithm(&self) -> CongestionAlgorithm;
}

/// Builds the strategy named by `config.congestion_control.algorithm`.
///
/// 根据 `config.congestion_control.algorithm` 构建拥塞控制策略。
pub fn new_controller(config: &Config) -> Box<dyn CongestionControl> {
    match config.congestion_control.algorithm {
        CongestionAlgorithm::Reno => Box::new(Reno::new(config)),
        CongestionAlgorithm::Cubic => Box::new(Cubic::new(config)),
        CongestionAlgorithm::Vegas => Box::new(Vegas::new(config)),
    }
}

#[cfg(test)]
mod tests;
