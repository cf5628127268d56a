//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the reliable stream library.
/// 可靠流库的主要错误类型。
///
/// Only [`Error::ConnectionClosed`] and [`Error::TransferFailed`] are produced
/// by an established connection. Retransmissions, reordering and checksum
/// failures are absorbed by the transport and never show up here.
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred while binding or using the socket.
    /// 绑定或使用套接字时发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during address parsing.
    /// 地址解析期间发生错误。
    #[error("Address parsing error: {0}")]
    AddressParse(#[from] std::net::AddrParseError),

    /// The connection is closed; no further operations are possible.
    /// 连接已关闭，无法再进行任何操作。
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection failed permanently.
    /// 连接永久失败。
    #[error("Transfer failed: {0}")]
    TransferFailed(#[from] FailureReason),
}

/// Why a connection was torn down with an error.
/// 连接因错误而被拆除的原因。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The same segment was retransmitted too many times without being acknowledged.
    /// 同一个分段重传次数过多仍未被确认。
    #[error("retransmission limit exceeded for segment seq={seq}")]
    RetransmissionLimitExceeded { seq: u32 },

    /// The three-way handshake did not complete.
    /// 三次握手未完成。
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The peer answered the handshake with an unexpected segment.
    /// 对端以意外的分段响应了握手。
    #[error("malformed handshake: {0}")]
    MalformedHandshake(&'static str),

    /// The peer reset the connection.
    /// 对端重置了连接。
    #[error("connection reset by peer")]
    PeerReset,

    /// Nothing was received from the peer for longer than the idle timeout.
    /// 超过空闲超时时间未收到对端的任何数据。
    #[error("connection idle timeout")]
    IdleTimeout,

    /// The underlying socket failed while the connection was running.
    /// 连接运行期间底层套接字失败。
    #[error("socket failure: {0}")]
    Socket(String),
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Io(e) => e,
            Error::AddressParse(e) => std::io::Error::new(ErrorKind::InvalidInput, e),
            Error::ConnectionClosed => ErrorKind::NotConnected.into(),
            Error::TransferFailed(reason) => {
                let kind = match reason {
                    FailureReason::PeerReset => ErrorKind::ConnectionReset,
                    FailureReason::HandshakeTimeout
                    | FailureReason::IdleTimeout
                    | FailureReason::RetransmissionLimitExceeded { .. } => ErrorKind::TimedOut,
                    FailureReason::MalformedHandshake(_) => ErrorKind::InvalidData,
                    FailureReason::Socket(_) => ErrorKind::BrokenPipe,
                };
                std::io::Error::new(kind, reason)
            }
        }
    }
}
