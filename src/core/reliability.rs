//! The reliability layer.
//!
//! This layer is responsible for sequencing, cumulative acknowledgments,
//! retransmissions (RTO and fast retransmit) and reordering. The send and
//! receive engines are plain state machines driven by the endpoint; they
//! never touch a socket or spawn a task.
//!
//! 可靠性层。
//!
//! 该层负责序列化、累积确认、重传（RTO和快速重传）和重排序。
//! 发送和接收引擎是由端点驱动的普通状态机，它们从不直接访问套接字或创建任务。

pub mod recv_engine;
pub mod rtt;
pub mod send_engine;
pub mod timer;

pub use recv_engine::{ReceiveEngine, ReceiveOutcome};
pub use send_engine::{AckOutcome, OutgoingSegment, SendEngine};
