//! The per-connection retransmission alarm.
//! 每个连接的重传闹钟。
//!
//! Exactly one alarm exists per connection. It covers the oldest outstanding
//! segment and is re-armed whenever the acknowledgment point moves.

use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// A single-shot alarm.
///
/// The timer does not spawn anything: the owning event loop awaits
/// [`RetransmissionTimer::expired`] inside its `select!`.
///
/// 单次触发的闹钟。定时器本身不会创建任何任务：所属的事件循环在其 `select!` 中等待
/// [`RetransmissionTimer::expired`]。
#[derive(Debug, Default, Clone)]
pub struct RetransmissionTimer {
    deadline: Option<Instant>,
}

impl RetransmissionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer for `deadline`, replacing any previous deadline.
    ///
    /// 为 `deadline` 设置定时器，替换之前的截止时间。
    pub fn start(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    /// Arms the timer only if it is not already running.
    pub fn start_if_idle(&mut self, deadline: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(deadline);
        }
    }

    /// Disarms the timer.
    ///
    /// 解除定时器。
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Re-arms the timer one RTO from `now` after an ACK advanced the window.
    ///
    /// 在ACK推进窗口后，从 `now` 起重新设置一个RTO的定时器。
    pub fn restart_on_ack(&mut self, now: Instant, rto: Duration) {
        self.deadline = Some(now + rto);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Resolves when the deadline passes. Never resolves while disarmed.
    ///
    /// 截止时间过后完成。未设置时永不完成。
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}
