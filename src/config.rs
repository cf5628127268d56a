//! 定义了连接和协议的可配置参数。
//! Defines configurable parameters for connections and the protocol.

use crate::packet::MAX_PAYLOAD_SIZE;
use std::{fmt, str::FromStr, time::Duration};

/// A structure containing all configurable parameters for a connection.
///
/// 包含所有连接可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Reliability-related parameters.
    /// 可靠性相关参数。
    pub reliability: ReliabilityConfig,

    /// Congestion control-related parameters.
    /// 拥塞控制相关参数。
    pub congestion_control: CongestionControlConfig,

    /// Connection and buffer-related parameters.
    /// 连接和缓冲区相关参数。
    pub connection: ConnectionConfig,
}

/// Reliability-related parameters.
///
/// 可靠性相关参数。
#[derive(Debug, Clone)]
pub struct ReliabilityConfig {
    /// The retransmission timeout used before the first RTT sample.
    /// 在第一个RTT样本之前使用的重传超时。
    pub initial_rto: Duration,
    /// The minimum RTO value. The RTO will not be allowed to fall below this.
    /// 最小RTO值。RTO不允许低于此值。
    pub min_rto: Duration,
    /// The maximum RTO value, including exponential back-off.
    /// 最大RTO值，包括指数退避。
    pub max_rto: Duration,
    /// How many times the same segment may be retransmitted before the
    /// connection is considered dead.
    /// 同一分段在连接被视为失效之前可以重传的次数。
    pub max_retransmissions: u32,
    /// The number of duplicate ACKs that triggers a fast retransmit.
    /// 触发快速重传的重复ACK数量。
    pub dup_ack_threshold: u32,
    /// Maximum retries for the SYN and SYN-ACK control segments.
    /// SYN和SYN-ACK控制分段的最大重试次数。
    pub handshake_max_retries: u32,
    /// The shortest time a fully closed connection lingers to absorb late
    /// retransmissions. The actual linger also covers several of the
    /// connection's current RTOs.
    /// 完全关闭的连接为吸收迟到重传而逗留的最短时长。实际逗留时长还会覆盖连接当前的若干个RTO。
    pub time_wait: Duration,
}

/// Congestion control-related parameters.
///
/// 拥塞控制相关参数。
#[derive(Debug, Clone)]
pub struct CongestionControlConfig {
    /// The congestion control strategy used by new connections.
    /// 新连接使用的拥塞控制策略。
    pub algorithm: CongestionAlgorithm,
    /// The initial congestion window size in segments.
    /// 初始拥塞窗口大小（以分段为单位）。
    pub initial_cwnd_segments: u32,
    /// The initial slow start threshold in bytes.
    /// 初始慢启动阈值（以字节为单位）。
    pub initial_ssthresh: u32,
    /// Cubic scaling constant `C`.
    /// Cubic 缩放常数 `C`。
    pub cubic_c: f64,
    /// Cubic multiplicative decrease factor.
    /// Cubic 乘性减小因子。
    pub cubic_beta: f64,
    /// The lower bound of the `diff` value in the Vegas algorithm, in segments.
    /// If the estimated number of queued segments is below this, the window is increased.
    /// Vegas算法中 `diff` 值的下限（以分段为单位）。如果估计的排队分段数量低于此值，则增加窗口。
    pub vegas_alpha_segments: u32,
    /// The upper bound of the `diff` value in the Vegas algorithm, in segments.
    /// If the estimated number of queued segments is above this, the window is decreased.
    /// Vegas算法中 `diff` 值的上限（以分段为单位）。如果估计的排队分段数量高于此值，则减小窗口。
    pub vegas_beta_segments: u32,
}

/// Connection and buffer-related parameters.
///
/// 连接和缓冲区相关参数。
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum segment size: the largest payload carried by one segment.
    /// Clamped to `1..=MAX_PAYLOAD_SIZE` when used, see [`Config::effective_mss`].
    /// 最大分段大小：单个分段携带的最大载荷。
    pub mss: usize,
    /// The capacity of the user-side send buffer in bytes. Data written by the
    /// user is stored here before being segmented.
    /// 用户端发送缓冲区的容量（以字节为单位）。用户写入的数据在分段前存储在此处。
    pub send_buffer_capacity_bytes: usize,
    /// The capacity of the reassembly buffer in bytes. This is also the largest
    /// window this side will ever advertise, so it is capped at `u16::MAX`.
    ///
    /// 重组缓冲区的容量（以字节为单位）。这也是本端通告的最大窗口，因此上限为 `u16::MAX`。
    pub recv_buffer_capacity_bytes: usize,
    /// The maximum time a connection can go without hearing from its peer
    /// while it still has unfinished business.
    ///
    /// 连接在仍有未完成工作时可以不收到对端任何消息的最长时间。
    pub idle_timeout: Duration,
}

impl Config {
    /// The segment size actually used: at least one byte, and never more
    /// than a single datagram can carry.
    /// 实际使用的分段大小：至少一个字节，且不超过单个数据报的承载能力。
    pub fn effective_mss(&self) -> usize {
        self.connection.mss.clamp(1, MAX_PAYLOAD_SIZE)
    }

    /// The receive capacity actually used on the wire.
    /// 实际在线路上使用的接收容量。
    pub fn effective_recv_capacity(&self) -> u16 {
        self.connection.recv_buffer_capacity_bytes.min(u16::MAX as usize) as u16
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(1000),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(60),
            max_retransmissions: 8,
            dup_ack_threshold: 3,
            handshake_max_retries: 5,
            time_wait: Duration::from_secs(2),
        }
    }
}

impl Default for CongestionControlConfig {
    fn default() -> Self {
        Self {
            algorithm: CongestionAlgorithm::Reno,
            initial_cwnd_segments: 1,
            initial_ssthresh: 32 * 1024,
            cubic_c: 0.4,
            cubic_beta: 0.7,
            vegas_alpha_segments: 2,
            vegas_beta_segments: 4,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mss: 1200,
            send_buffer_capacity_bytes: 256 * 1024,
            recv_buffer_capacity_bytes: u16::MAX as usize,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// The enumerated set of congestion control strategies.
///
/// 拥塞控制策略的枚举集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CongestionAlgorithm {
    /// Classic TCP Reno.
    #[default]
    Reno,
    /// TCP Cubic window growth.
    Cubic,
    /// Latency-based TCP Vegas.
    Vegas,
}

/// Returned when an algorithm name is not recognised.
/// 当算法名称无法识别时返回。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown congestion control algorithm `{0}` (expected reno, cubic or vegas)")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for CongestionAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reno" => Ok(Self::Reno),
            "cubic" => Ok(Self::Cubic),
            "vegas" => Ok(Self::Vegas),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for CongestionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reno => "reno",
            Self::Cubic => "cubic",
            Self::Vegas => "vegas",
        };
        f.write_str(name)
    }
}
