//! The task that reads the socket on behalf of one connection.
//!
//! 代表单个连接读取套接字的任务。

use super::{ConnectionSlot, traits::AsyncUdpSocket};
use crate::packet::{HEADER_SIZE, Segment};
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Receive buffer size. Large enough for any segment a peer may send.
pub(crate) const MAX_DATAGRAM_SIZE: usize = HEADER_SIZE + u16::MAX as usize;

/// Reads datagrams from `socket`, decodes those from `peer` and forwards
/// them to the endpoint until the endpoint goes away.
///
/// Datagrams from other addresses and datagrams that fail to decode are
/// dropped. The slot is held for the lifetime of the task, so the socket is
/// free for a new connection only once nothing reads it any more.
///
/// 从 `socket` 读取数据报，解码来自 `peer` 的数据报并转发给端点，直到端点退出。
/// 来自其他地址或解码失败的数据报会被丢弃。
pub(crate) async fn relay_task<S: AsyncUdpSocket>(
    socket: Arc<S>,
    peer: SocketAddr,
    segments_tx: mpsc::Sender<Segment>,
    dropped: Arc<AtomicU64>,
    _slot: ConnectionSlot,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, from) = tokio::select! {
            _ = segments_tx.closed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    debug!(error = %e, "Socket receive failed, stopping relay");
                    break;
                }
            },
        };

        if from != peer {
            trace!(%from, "Dropping datagram from unknown address");
            dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        let segment = match Segment::decode(&buf[..len]) {
            Ok(segment) => segment,
            Err(e) => {
                trace!(%from, len, error = %e, "Dropping malformed datagram");
                dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if segments_tx.send(segment).await.is_err() {
            break;
        }
    }
    trace!(%peer, "Relay finished");
}
