//! Connection counters and per-run transfer reports.
//! 连接计数器和每次传输的报告。

use crate::congestion::CongestionState;
use std::fmt;
use std::time::Duration;

const MB: f64 = 1024.0 * 1024.0;

/// A snapshot of one connection's counters.
///
/// 单个连接计数器的快照。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    /// Segments handed to the socket, including retransmissions and pure ACKs.
    /// 交给套接字的分段数，包括重传和纯ACK。
    pub segments_sent: u64,
    /// Payload bytes sent for the first time.
    /// 首次发送的载荷字节数。
    pub bytes_sent: u64,
    /// All retransmissions, fast or timer driven.
    /// 所有重传（快速重传或定时器驱动）。
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    pub timeouts: u64,
    pub segments_received: u64,
    /// Payload bytes delivered to the application in order.
    /// 按序交付给应用的载荷字节数。
    pub bytes_delivered: u64,
    /// Segments whose data had already been received.
    /// 数据已被接收过的分段数。
    pub duplicate_segments: u64,
    /// Datagrams dropped because they failed to decode.
    /// 因解码失败而丢弃的数据报数。
    pub dropped_datagrams: u64,
    pub congestion_window: u32,
    pub slow_start_threshold: u32,
    pub congestion_state: CongestionState,
    pub srtt: Option<Duration>,
    pub rto: Duration,
}

/// One measured transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRun {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferRun {
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }

    /// Throughput in MiB per second. Zero for an instantaneous run.
    ///
    /// 以每秒MiB计的吞吐量。瞬时完成的传输为零。
    pub fn throughput_mb_s(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.bytes as f64 / MB) / secs
    }
}

/// Accumulates the runs of a benchmark session and renders a summary.
///
/// The summary lists each run's time and speed followed by the averages of
/// both, where the average speed is the mean of the per-run speeds.
///
/// 累积一次基准测试会话的各次传输并生成摘要。
#[derive(Debug, Clone, Default)]
pub struct TransferReport {
    runs: Vec<TransferRun>,
}

impl TransferReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed run and returns it.
    pub fn record(&mut self, bytes: u64, elapsed: Duration) -> TransferRun {
        let run = TransferRun { bytes, elapsed };
        self.runs.push(run);
        run
    }

    pub fn runs(&self) -> &[TransferRun] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn average_elapsed_ms(&self) -> f64 {
        self.average(TransferRun::elapsed_ms)
    }

    pub fn average_throughput_mb_s(&self) -> f64 {
        self.average(TransferRun::throughput_mb_s)
    }

    fn average(&self, metric: impl Fn(&TransferRun) -> f64) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        self.runs.iter().map(metric).sum::<f64>() / self.runs.len() as f64
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----------------------------")?;
        writeln!(f, "-      * Statistics *      -")?;
        for (i, run) in self.runs.iter().enumerate() {
            writeln!(
                f,
                "Run #{} Data: Time={:.2}ms; Speed={:.2}MB/s",
                i + 1,
                run.elapsed_ms(),
                run.throughput_mb_s()
            )?;
        }
        writeln!(f, "Average time: {:.2}ms", self.average_elapsed_ms())?;
        writeln!(f, "Average bandwidth: {:.2}MB/s", self.average_throughput_mb_s())?;
        write!(f, "----------------------------")
    }
}
