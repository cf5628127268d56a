//! The user-facing stream API.
//!
//! A [`Stream`] is a handle to one connection's endpoint task. Besides the
//! explicit `send` / `recv` / `close` methods it implements `AsyncRead` and
//! `AsyncWrite`, so it can be used with `tokio::io` utilities.
//!
//! 面向用户的流 API。
//!
//! [`Stream`] 是单个连接端点任务的句柄。除了显式的 `send` / `recv` / `close`
//! 方法之外，它还实现了 `AsyncRead` 和 `AsyncWrite`，可以配合 `tokio::io` 工具使用。

use crate::core::endpoint::StreamCommand;
use crate::error::{Error, Result};
use crate::stats::ConnectionStats;
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    /// The peer's FIN has been consumed.
    Finished,
    /// The connection failure has been reported once.
    Failed,
}

/// A reliable, ordered, stream-oriented connection.
///
/// Dropping a `Stream` without calling [`Stream::close`] resets the
/// connection and discards unacknowledged data.
///
/// 一个可靠、有序、面向流的连接。
/// 未调用 [`Stream::close`] 就丢弃 `Stream` 会重置连接并丢弃未确认的数据。
#[derive(Debug)]
pub struct Stream {
    peer: SocketAddr,
    /// Sends commands to the `Endpoint` worker task.
    commands_tx: mpsc::UnboundedSender<StreamCommand>,
    /// Receives ordered data, then either end-of-stream or the failure.
    data_rx: mpsc::UnboundedReceiver<Result<Bytes>>,
    /// Chunks received but not yet read through `AsyncRead`.
    read_buffer: VecDeque<Bytes>,
    read_state: ReadState,
    stats_rx: watch::Receiver<ConnectionStats>,
    /// `close` was requested; dropping no longer resets.
    closed: bool,
    pending_write: Option<oneshot::Receiver<Result<()>>>,
    pending_close: Option<oneshot::Receiver<Result<()>>>,
}

impl Stream {
    pub(crate) fn new(
        peer: SocketAddr,
        commands_tx: mpsc::UnboundedSender<StreamCommand>,
        data_rx: mpsc::UnboundedReceiver<Result<Bytes>>,
        stats_rx: watch::Receiver<ConnectionStats>,
    ) -> Self {
        Self {
            peer,
            commands_tx,
            data_rx,
            read_buffer: VecDeque::new(),
            read_state: ReadState::Open,
            stats_rx,
            closed: false,
            pending_write: None,
            pending_close: None,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Queues `data` for reliable delivery.
    ///
    /// Returns once every byte is in the send buffer, which suspends the
    /// caller while the buffer is full. Delivery itself is confirmed only
    /// by [`Stream::close`].
    ///
    /// 将 `data` 排队以可靠投递。
    /// 所有字节进入发送缓冲区后返回；缓冲区满时调用方会被挂起。
    pub async fn send(&mut self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        let (done, rx) = oneshot::channel();
        self.commands_tx
            .send(StreamCommand::Send { data, done })
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Receives the next chunk of in-order data.
    ///
    /// `Ok(None)` means the peer has finished sending. A connection failure
    /// is returned once as [`Error::TransferFailed`]; later calls get
    /// [`Error::ConnectionClosed`].
    ///
    /// 接收下一块有序数据。`Ok(None)` 表示对端已结束发送。
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.read_buffer.pop_front() {
            return Ok(Some(chunk));
        }
        match self.read_state {
            ReadState::Open => {}
            ReadState::Finished => return Ok(None),
            ReadState::Failed => return Err(Error::ConnectionClosed),
        }
        match self.data_rx.recv().await {
            Some(Ok(chunk)) => {
                self.consumed(&chunk);
                Ok(Some(chunk))
            }
            Some(Err(e)) => {
                self.read_state = ReadState::Failed;
                Err(e)
            }
            None => {
                self.read_state = ReadState::Finished;
                Ok(None)
            }
        }
    }

    /// A lazy stream of received chunks that ends at the peer's FIN.
    ///
    /// 按需产出已接收数据块的流，在对端FIN处结束。
    pub fn incoming(&mut self) -> impl futures::Stream<Item = Result<Bytes>> + '_ {
        futures::stream::unfold(Some(self), |stream| async move {
            let stream = stream?;
            match stream.recv().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(stream))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Closes the sending side gracefully.
    ///
    /// Resolves once all queued data and our FIN have been acknowledged.
    /// Reading remains possible until the peer closes its side.
    ///
    /// 优雅地关闭发送方向。
    /// 当所有排队数据和本端FIN都被确认后返回。对端关闭之前仍可读取。
    pub async fn close(&mut self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.commands_tx
            .send(StreamCommand::Close { done })
            .map_err(|_| Error::ConnectionClosed)?;
        self.closed = true;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// The latest statistics published by the endpoint.
    pub fn stats(&self) -> ConnectionStats {
        self.stats_rx.borrow().clone()
    }

    /// Whether the endpoint task has terminated.
    pub fn is_closed(&self) -> bool {
        self.commands_tx.is_closed()
    }

    /// Hands the chunk's bytes back to the receive window.
    fn consumed(&self, chunk: &Bytes) {
        let _ = self
            .commands_tx
            .send(StreamCommand::Consumed { len: chunk.len() });
    }

    fn poll_pending_write(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(rx) = self.pending_write.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(Pin::new(rx).poll(cx));
        self.pending_write = None;
        Poll::Ready(match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(io::ErrorKind::BrokenPipe.into()),
        })
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        // At most one write is outstanding beyond the send buffer.
        ready!(this.poll_pending_write(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let (done, rx) = oneshot::channel();
        let command = StreamCommand::Send {
            data: Bytes::copy_from_slice(buf),
            done,
        };
        if this.commands_tx.send(command).is_err() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        this.pending_write = Some(rx);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_pending_write(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_pending_write(cx))?;

        if this.pending_close.is_none() {
            if this.closed {
                return Poll::Ready(Ok(()));
            }
            let (done, rx) = oneshot::channel();
            if this.commands_tx.send(StreamCommand::Close { done }).is_err() {
                return Poll::Ready(Err(io::ErrorKind::NotConnected.into()));
            }
            this.closed = true;
            this.pending_close = Some(rx);
        }

        let Some(rx) = this.pending_close.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(Pin::new(rx).poll(cx));
        this.pending_close = None;
        Poll::Ready(match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(io::ErrorKind::NotConnected.into()),
        })
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = buf.filled().len();
        loop {
            // Leftover data from a previous read goes first.
            while let Some(chunk) = this.read_buffer.front_mut() {
                let len = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..len]);
                chunk.advance(len);
                if chunk.is_empty() {
                    this.read_buffer.pop_front();
                }
                if buf.remaining() == 0 {
                    return Poll::Ready(Ok(()));
                }
            }
            if buf.filled().len() > start {
                return Poll::Ready(Ok(()));
            }

            match this.read_state {
                ReadState::Open => {}
                // Zero bytes read signals EOF.
                ReadState::Finished => return Poll::Ready(Ok(())),
                ReadState::Failed => {
                    return Poll::Ready(Err(Error::ConnectionClosed.into()));
                }
            }

            match ready!(this.data_rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.consumed(&chunk);
                    this.read_buffer.push_back(chunk);
                }
                Some(Err(e)) => {
                    this.read_state = ReadState::Failed;
                    return Poll::Ready(Err(e.into()));
                }
                None => {
                    this.read_state = ReadState::Finished;
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.commands_tx.send(StreamCommand::Abort);
        }
    }
}
