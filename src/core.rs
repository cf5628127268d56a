//! The protocol core: per-connection endpoint task, reliability engines and
//! the user-facing stream.
//! 协议核心：每个连接的端点任务、可靠性引擎以及面向用户的流。

pub mod endpoint;
pub mod reliability;
pub mod stream;

#[cfg(test)]
mod test_utils;
