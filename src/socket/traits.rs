//! The datagram socket abstraction the transport runs on.
//!
//! 传输层所依赖的数据报套接字抽象。
use crate::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// An unreliable datagram socket: each `send_to` is one segment on the wire.
///
/// Datagrams may be lost, duplicated or reordered; the connection layer on
/// top copes with all of that. Implemented for [`tokio::net::UdpSocket`] and
/// for the in-memory [`SimulatedSocket`](crate::testing::SimulatedSocket).
///
/// 不可靠的数据报套接字：每次 `send_to` 在线路上就是一个分段。
/// 数据报可能丢失、重复或乱序，上层的连接层负责处理这些情况。
#[async_trait]
pub trait AsyncUdpSocket: Send + Sync + 'static {
    /// Sends one datagram to `target`.
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize>;

    /// Waits for the next datagram and returns its length and source.
    /// 等待下一个数据报，返回其长度和来源地址。
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> Result<SocketAddr>;
}

#[async_trait]
impl AsyncUdpSocket for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize> {
        Ok(UdpSocket::send_to(self, buf, target).await?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(UdpSocket::recv_from(self, buf).await?)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(UdpSocket::local_addr(self)?)
    }
}

/// A datagram socket that [`ReliableUdpSocket::bind`](super::ReliableUdpSocket::bind)
/// can create from an address.
///
/// 可由 `ReliableUdpSocket::bind` 根据地址创建的数据报套接字。
#[async_trait]
pub trait BindableUdpSocket: AsyncUdpSocket + Sized {
    async fn bind(addr: SocketAddr) -> Result<Self>;
}

#[async_trait]
impl BindableUdpSocket for UdpSocket {
    async fn bind(addr: SocketAddr) -> Result<Self> {
        Ok(UdpSocket::bind(addr).await?)
    }
}
