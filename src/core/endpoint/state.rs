//! Defines the connection state machine for an endpoint.
//!
//! 定义端点的连接状态机。

use std::fmt;

/// The state of a connection.
/// 连接的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The active side has sent its SYN and waits for the SYN-ACK.
    /// 主动方已发送SYN，正在等待SYN-ACK。
    SynSent,

    /// The passive side has answered a SYN and waits for the final ACK.
    /// 被动方已响应SYN，正在等待最后的ACK。
    SynReceived,

    /// The connection is fully established and can send/receive data.
    /// 连接已完全建立，可以发送/接收数据。
    Established,

    /// We closed first; our FIN is not yet acknowledged.
    /// 本端先关闭；FIN尚未被确认。
    FinWait1,

    /// Our FIN is acknowledged; waiting for the peer's FIN.
    /// 本端FIN已被确认；正在等待对端的FIN。
    FinWait2,

    /// The peer closed first; we may still send until the application closes.
    /// 对端先关闭；在应用关闭之前本端仍可发送。
    CloseWait,

    /// Both sides sent FIN at the same time; waiting for the ACK of ours.
    /// 双方同时发送了FIN；正在等待对本端FIN的确认。
    Closing,

    /// The peer closed first and so did we; waiting for the ACK of our FIN.
    /// 对端先关闭，本端随后也关闭；正在等待对本端FIN的确认。
    LastAck,

    /// Both FINs are acknowledged; lingering to re-acknowledge a late FIN.
    /// 双方FIN均已确认；逗留以重新确认迟到的FIN。
    TimeWait,

    /// The connection is fully closed and the endpoint should terminate.
    /// 连接已完全关闭，端点应当终止。
    Closed,
}

impl ConnectionState {
    /// Whether the send engine may release segments in this state.
    ///
    /// 在此状态下发送引擎是否可以释放分段。
    pub fn can_transmit(self) -> bool {
        matches!(
            self,
            Self::Established | Self::CloseWait | Self::FinWait1 | Self::LastAck | Self::Closing
        )
    }

    /// Whether the application may still queue data.
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::Established | Self::CloseWait)
    }

    /// Whether inbound data and FINs are still processed.
    pub fn accepts_data(self) -> bool {
        matches!(
            self,
            Self::Established | Self::FinWait1 | Self::FinWait2
        )
    }

    /// States in which the connection waits on the peer to finish closing.
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            Self::FinWait1 | Self::FinWait2 | Self::Closing | Self::LastAck
        )
    }

    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::SynSent | Self::SynReceived)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RECEIVED",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::CloseWait => "CLOSE_WAIT",
            Self::Closing => "CLOSING",
            Self::LastAck => "LAST_ACK",
            Self::TimeWait => "TIME_WAIT",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn test_state_capabilities() {
        assert!(Established.accepts_writes());
        assert!(CloseWait.accepts_writes());
        assert!(!FinWait1.accepts_writes());

        // A FIN still has to go out after the application closes.
        assert!(FinWait1.can_transmit());
        assert!(LastAck.can_transmit());
        assert!(!FinWait2.can_transmit());
        assert!(!SynSent.can_transmit());

        assert!(FinWait2.accepts_data());
        assert!(!CloseWait.accepts_data());
        assert!(SynReceived.is_handshaking());
        assert_eq!(TimeWait.to_string(), "TIME_WAIT");
    }
}
