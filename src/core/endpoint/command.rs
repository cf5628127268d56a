//! Defines the commands sent from the `Stream` handle to the `Endpoint` worker.
//! 定义从 `Stream` 句柄发送到 `Endpoint` 工作任务的命令。

use crate::error::Result;
use bytes::Bytes;
use tokio::sync::oneshot;

/// Commands sent from the `Stream` handle to the `Endpoint` worker.
#[derive(Debug)]
pub enum StreamCommand {
    /// Queue bytes for sending. `done` fires once every byte has been taken
    /// into the send buffer.
    /// 将字节排队发送。当所有字节都进入发送缓冲区后 `done` 触发。
    Send {
        data: Bytes,
        done: oneshot::Sender<Result<()>>,
    },
    /// Graceful close. `done` fires once our FIN is acknowledged.
    /// 优雅关闭。当本端FIN被确认后 `done` 触发。
    Close { done: oneshot::Sender<Result<()>> },
    /// The application took `len` delivered bytes off the data channel.
    /// 应用从数据通道取走了 `len` 个已交付字节。
    Consumed { len: usize },
    /// The handle was dropped without closing: reset the connection.
    /// 句柄在未关闭的情况下被丢弃：重置连接。
    Abort,
}
